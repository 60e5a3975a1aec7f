//! Route reconstruction.
//!
//! Turns an unordered bag of pings into ordered, contiguous trips:
//! pings are bucketed by route id, short buckets are dropped as noise,
//! each surviving bucket is sorted by timestamp and paired with its
//! static [`Route`] metadata.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;

use crate::store::TrackingStore;
use crate::{
    AnalyticsError, BoundingRegion, EntityKind, GpsPoint, OptionExt, Ping, Result, Route,
    RouteId, UserId,
};

/// Source of static route metadata.
pub trait RouteCatalog {
    fn route(&self, id: RouteId) -> Option<Route>;
}

impl RouteCatalog for HashMap<RouteId, Route> {
    fn route(&self, id: RouteId) -> Option<Route> {
        self.get(&id).cloned()
    }
}

impl RouteCatalog for [Route] {
    fn route(&self, id: RouteId) -> Option<Route> {
        self.iter().find(|r| r.id == id).cloned()
    }
}

impl RouteCatalog for Vec<Route> {
    fn route(&self, id: RouteId) -> Option<Route> {
        self.as_slice().route(id)
    }
}

// ============================================================================
// Active Route
// ============================================================================

/// A reconstructed trip: static route metadata plus its ordered pings.
///
/// Pings are sorted ascending by timestamp and all carry the route's id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRoute {
    route: Route,
    pings: Vec<Ping>,
}

/// Derived statistics of an [`ActiveRoute`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteStats {
    /// Declared distance in whole kilometers
    pub distance_km: i64,
    /// Declared travel time in whole minutes
    pub travel_time_min: i64,
    /// Average speed in km/h. Non-finite when the travel time is zero.
    pub avg_speed_kmh: f64,
    /// Highest ping speed in whole km/h
    pub max_speed_kmh: i64,
}

impl RouteStats {
    /// Average speed for display: non-finite values show as 0.
    pub fn avg_speed_display(&self) -> i64 {
        if self.avg_speed_kmh.is_finite() {
            self.avg_speed_kmh as i64
        } else {
            0
        }
    }
}

impl ActiveRoute {
    /// Pair a route with its pings, sorting them by timestamp.
    ///
    /// Fails when there are no pings or a ping belongs to another route.
    pub fn new(route: Route, mut pings: Vec<Ping>) -> Result<Self> {
        if pings.is_empty() {
            return Err(AnalyticsError::Internal {
                message: format!("route {} has no pings", route.id),
            });
        }
        if let Some(stray) = pings.iter().find(|p| p.route_id != route.id) {
            return Err(AnalyticsError::Internal {
                message: format!(
                    "ping {} belongs to route {}, not {}",
                    stray.id, stray.route_id, route.id
                ),
            });
        }
        sort_pings(&mut pings);
        Ok(Self { route, pings })
    }

    pub fn id(&self) -> RouteId {
        self.route.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn pings(&self) -> &[Ping] {
        &self.pings
    }

    /// Owner of the trip, taken from the first ping.
    pub fn user_id(&self) -> UserId {
        self.pings[0].user_id
    }

    pub fn first_timestamp(&self) -> DateTime<Utc> {
        self.pings[0].timestamp
    }

    pub fn points(&self) -> Vec<GpsPoint> {
        self.pings.iter().map(Ping::point).collect()
    }

    /// The ping at the middle of the trajectory.
    pub fn middle_ping(&self) -> &Ping {
        let idx = (self.pings.len() / 2).min(self.pings.len() - 1);
        &self.pings[idx]
    }

    pub fn bounds(&self) -> Option<BoundingRegion> {
        BoundingRegion::from_points(&self.points())
    }

    /// `floor(distance_m) / 1000` rounded to two decimals, then truncated.
    pub fn distance_km(&self) -> i64 {
        let km = self.route.distance.floor() / 1000.0;
        ((km * 100.0).round() / 100.0).trunc() as i64
    }

    /// Declared travel time of the static route, floored to minutes.
    pub fn travel_time_min(&self) -> i64 {
        let ms = (self.route.end_time - self.route.start_time).num_milliseconds();
        ms.div_euclid(60_000)
    }

    /// Span covered by the pings themselves, floored to minutes.
    ///
    /// Not used for speed; the declared route span is.
    pub fn ping_span_min(&self) -> i64 {
        let last = self.pings[self.pings.len() - 1].timestamp;
        (last - self.first_timestamp()).num_milliseconds().div_euclid(60_000)
    }

    /// `round(distance_km / (travel_time_min / 60))`, non-finite for zero time.
    pub fn avg_speed_kmh(&self) -> f64 {
        let hours = self.travel_time_min() as f64 / 60.0;
        (self.distance_km() as f64 / hours).round()
    }

    pub fn max_speed_kmh(&self) -> i64 {
        self.pings
            .iter()
            .map(|p| (p.speed_mps * 3.6).floor() as i64)
            .max()
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RouteStats {
        RouteStats {
            distance_km: self.distance_km(),
            travel_time_min: self.travel_time_min(),
            avg_speed_kmh: self.avg_speed_kmh(),
            max_speed_kmh: self.max_speed_kmh(),
        }
    }
}

fn sort_pings(pings: &mut [Ping]) {
    pings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
}

// ============================================================================
// Grouping
// ============================================================================

/// Partition pings by route id.
fn bucket_by_route(pings: &[Ping]) -> BTreeMap<RouteId, Vec<Ping>> {
    let mut buckets: BTreeMap<RouteId, Vec<Ping>> = BTreeMap::new();
    for ping in pings {
        buckets.entry(ping.route_id).or_default().push(ping.clone());
    }
    buckets
}

#[cfg(not(feature = "parallel"))]
fn sort_buckets(buckets: &mut [Vec<Ping>]) {
    for bucket in buckets.iter_mut() {
        sort_pings(bucket);
    }
}

#[cfg(feature = "parallel")]
fn sort_buckets(buckets: &mut [Vec<Ping>]) {
    use rayon::prelude::*;
    buckets.par_iter_mut().for_each(|bucket| sort_pings(bucket));
}

/// Group raw pings into reconstructed trips.
///
/// Buckets with fewer than `min_pings` pings are discarded as noise, buckets
/// without catalog metadata are dropped without failing the batch. Output is
/// ordered by each trip's earliest timestamp.
///
/// Calling this twice on identical input yields element-wise equal results.
pub fn group_into_routes<C>(pings: &[Ping], catalog: &C, min_pings: usize) -> Vec<ActiveRoute>
where
    C: RouteCatalog + ?Sized,
{
    let buckets = bucket_by_route(pings);

    let (ids, mut kept): (Vec<RouteId>, Vec<Vec<Ping>>) = buckets
        .into_iter()
        .filter(|(route_id, bucket)| {
            if bucket.len() < min_pings {
                debug!(
                    "[Reconstructor] Dropping route {}: {} pings, minimum {}",
                    route_id,
                    bucket.len(),
                    min_pings
                );
                return false;
            }
            true
        })
        .unzip();

    sort_buckets(&mut kept);

    let mut routes: Vec<ActiveRoute> = ids
        .into_iter()
        .zip(kept)
        .filter_map(|(route_id, bucket)| {
            match catalog.route(route_id).ok_or_not_found(EntityKind::Route, route_id) {
                Ok(route) => Some(ActiveRoute {
                    route,
                    pings: bucket,
                }),
                Err(e) => {
                    debug!("[Reconstructor] Dropping bucket: {}", e);
                    None
                }
            }
        })
        .collect();

    routes.sort_by(|a, b| {
        a.first_timestamp()
            .cmp(&b.first_timestamp())
            .then(a.id().cmp(&b.id()))
    });

    debug!(
        "[Reconstructor] {} pings -> {} routes",
        pings.len(),
        routes.len()
    );
    routes
}

/// Reconstruct trips, fetching the metadata of every qualifying bucket
/// from the store.
///
/// Metadata lookups run concurrently. A missing route drops its bucket;
/// a failed lookup fails the whole call.
pub async fn reconstruct_from_store<S>(
    pings: &[Ping],
    store: &S,
    min_pings: usize,
) -> Result<Vec<ActiveRoute>>
where
    S: TrackingStore,
{
    let mut counts: BTreeMap<RouteId, usize> = BTreeMap::new();
    for ping in pings {
        *counts.entry(ping.route_id).or_default() += 1;
    }
    let wanted: Vec<RouteId> = counts
        .into_iter()
        .filter(|&(_, count)| count >= min_pings)
        .map(|(id, _)| id)
        .collect();

    let lookups = join_all(wanted.iter().map(|&id| store.fetch_route_by_id(id))).await;

    let mut catalog: HashMap<RouteId, Route> = HashMap::with_capacity(wanted.len());
    for (id, lookup) in wanted.into_iter().zip(lookups) {
        match lookup? {
            Some(route) => {
                catalog.insert(id, route);
            }
            None => warn!("[Reconstructor] No metadata for route {}", id),
        }
    }

    Ok(group_into_routes(pings, &catalog, min_pings))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 2, 8, 0, 0).unwrap()
    }

    fn ping(id: u64, route_id: RouteId, secs: i64) -> Ping {
        Ping {
            id,
            user_id: 1,
            route_id,
            timestamp: t0() + Duration::seconds(secs),
            latitude: 49.0 + secs as f64 * 0.0001,
            longitude: 8.4,
            speed_mps: 5.0,
        }
    }

    fn route(id: RouteId, minutes: i64, distance: f64) -> Route {
        Route {
            id,
            start_time: t0(),
            end_time: t0() + Duration::minutes(minutes),
            distance,
        }
    }

    fn catalog(routes: Vec<Route>) -> HashMap<RouteId, Route> {
        routes.into_iter().map(|r| (r.id, r)).collect()
    }

    #[test]
    fn test_short_buckets_are_noise() {
        let mut pings: Vec<Ping> = (0..12).map(|i| ping(i, 1, i as i64)).collect();
        pings.push(ping(100, 2, 0));
        pings.push(ping(101, 2, 1));

        let routes = group_into_routes(&pings, &catalog(vec![route(1, 30, 5000.0)]), 10);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id(), 1);
        assert_eq!(routes[0].pings().len(), 12);
    }

    #[test]
    fn test_exactly_threshold_is_kept() {
        let pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        let routes = group_into_routes(&pings, &catalog(vec![route(1, 30, 5000.0)]), 10);
        assert_eq!(routes.len(), 1);

        let routes = group_into_routes(&pings[..9], &catalog(vec![route(1, 30, 5000.0)]), 10);
        assert!(routes.is_empty());
    }

    #[test]
    fn test_missing_metadata_drops_only_that_bucket() {
        let mut pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        pings.extend((0..10).map(|i| ping(50 + i, 2, 100 + i as i64)));

        let routes = group_into_routes(&pings, &catalog(vec![route(2, 30, 5000.0)]), 10);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].id(), 2);
    }

    #[test]
    fn test_pings_sorted_and_routes_ordered_by_start() {
        // Route 5 starts later than route 9; input shuffled
        let mut pings: Vec<Ping> = Vec::new();
        for i in (0..10).rev() {
            pings.push(ping(i, 5, 600 + i as i64 * 10));
            pings.push(ping(100 + i, 9, i as i64 * 10));
        }

        let cat = catalog(vec![route(5, 10, 1000.0), route(9, 10, 1000.0)]);
        let routes = group_into_routes(&pings, &cat, 10);
        assert_eq!(routes.iter().map(|r| r.id()).collect::<Vec<_>>(), vec![9, 5]);

        for r in &routes {
            assert!(r
                .pings()
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp));
            assert!(r.pings().iter().all(|p| p.route_id == r.id()));
        }
    }

    #[test]
    fn test_shuffled_input_keeps_grouping_properties() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        for seed in 0..25u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut pings = Vec::new();
            let mut routes = Vec::new();
            let mut expected: HashMap<RouteId, usize> = HashMap::new();

            for route_id in 1..=rng.gen_range(1..8u64) {
                let count = rng.gen_range(0..20u64);
                for i in 0..count {
                    let secs = rng.gen_range(0..3600i64);
                    pings.push(ping(route_id * 1000 + i, route_id, secs));
                }
                // Some trips have no metadata
                if rng.gen_bool(0.8) {
                    routes.push(route(route_id, 60, 1000.0));
                    if count >= 10 {
                        expected.insert(route_id, count as usize);
                    }
                }
            }
            pings.shuffle(&mut rng);

            let result = group_into_routes(&pings, &catalog(routes), 10);
            let found: HashMap<RouteId, usize> =
                result.iter().map(|r| (r.id(), r.pings().len())).collect();
            assert_eq!(found, expected, "seed {}", seed);

            for r in &result {
                assert!(r.pings().len() >= 10, "seed {}", seed);
                assert!(
                    r.pings().windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
                    "seed {}",
                    seed
                );
                assert!(r.pings().iter().all(|p| p.route_id == r.id()));
            }
            assert!(
                result
                    .windows(2)
                    .all(|w| w[0].pings()[0].timestamp <= w[1].pings()[0].timestamp),
                "seed {}",
                seed
            );
        }
    }

    #[test]
    fn test_grouping_is_referentially_stable() {
        let pings: Vec<Ping> = (0..30).map(|i| ping(i, i % 2, (30 - i) as i64)).collect();
        let cat = catalog(vec![route(0, 10, 1000.0), route(1, 10, 1000.0)]);
        let first = group_into_routes(&pings, &cat, 10);
        let second = group_into_routes(&pings, &cat, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_distance_km_rounds_then_truncates() {
        let pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        let cases = [
            (12_400.0, 12),
            (994.0, 0),
            (999.0, 1), // 0.999 -> "1.00"
            (9_999.7, 10), // floor -> 9999 -> 9.999 -> "10.00"
            (1_994.0, 1),
        ];
        for (meters, km) in cases {
            let r = ActiveRoute::new(route(1, 30, meters), pings.clone()).unwrap();
            assert_eq!(r.distance_km(), km, "distance {}", meters);
        }
    }

    #[test]
    fn test_speed_statistics() {
        let mut pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        pings[4].speed_mps = 13.9; // 50.04 km/h
        let r = ActiveRoute::new(route(1, 30, 12_400.0), pings).unwrap();

        let stats = r.stats();
        assert_eq!(stats.distance_km, 12);
        assert_eq!(stats.travel_time_min, 30);
        assert_eq!(stats.avg_speed_kmh, 24.0);
        assert_eq!(stats.max_speed_kmh, 50);
        assert_eq!(stats.avg_speed_display(), 24);
    }

    #[test]
    fn test_zero_travel_time_is_non_finite() {
        let pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        let r = ActiveRoute::new(route(1, 0, 12_400.0), pings.clone()).unwrap();
        assert!(!r.avg_speed_kmh().is_finite());
        assert_eq!(r.stats().avg_speed_display(), 0);

        // Zero distance over zero time is NaN, still not a crash
        let r = ActiveRoute::new(route(1, 0, 0.0), pings).unwrap();
        assert!(r.avg_speed_kmh().is_nan());
        assert_eq!(r.stats().avg_speed_display(), 0);
    }

    #[test]
    fn test_travel_time_floors_partial_minutes() {
        let pings: Vec<Ping> = (0..10).map(|i| ping(i, 1, i as i64)).collect();
        let mut meta = route(1, 0, 1000.0);
        meta.end_time = meta.start_time + Duration::seconds(119);
        let r = ActiveRoute::new(meta, pings).unwrap();
        assert_eq!(r.travel_time_min(), 1);
        assert_eq!(r.ping_span_min(), 0);
    }

    #[test]
    fn test_active_route_rejects_foreign_pings() {
        let mut pings: Vec<Ping> = (0..3).map(|i| ping(i, 1, i as i64)).collect();
        pings.push(ping(9, 2, 9));
        assert!(ActiveRoute::new(route(1, 10, 1000.0), pings).is_err());
        assert!(ActiveRoute::new(route(1, 10, 1000.0), vec![]).is_err());
    }

    #[test]
    fn test_middle_ping_and_bounds() {
        let pings: Vec<Ping> = (0..11).map(|i| ping(i, 1, i as i64)).collect();
        let r = ActiveRoute::new(route(1, 10, 1000.0), pings).unwrap();
        assert_eq!(r.middle_ping().id, 5);
        let b = r.bounds().unwrap();
        assert_eq!(b.south, 49.0);
        assert!((b.north - 49.001).abs() < 1e-9);
    }
}
