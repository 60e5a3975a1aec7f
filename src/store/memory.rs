//! In-memory tracking-point store.
//!
//! Answers every store request from loaded pings, routes and users. Region
//! lookups go through an R-tree over ping positions; weekday, hour and date
//! filters apply to the start of a trip (its earliest ping, UTC).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use rstar::primitives::GeomWithData;
use rstar::RTree;

use super::TrackingStore;
use crate::query::{HourRange, Weekday};
use crate::{BoundingRegion, Ping, Result, Route, RouteId, User, UserId};

/// Ping position in R-tree coordinates (`[lng, lat]`) tagged with its index.
type IndexedPing = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone, Copy)]
struct TripInfo {
    start: DateTime<Utc>,
    owner: UserId,
}

/// Store backed by in-process collections.
#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    pings: Vec<Ping>,
    index: RTree<IndexedPing>,
    trips: HashMap<RouteId, TripInfo>,
    routes: BTreeMap<RouteId, Route>,
    users: BTreeMap<UserId, User>,
}

impl MemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from complete collections.
    pub fn from_parts(pings: Vec<Ping>, routes: Vec<Route>, users: Vec<User>) -> Self {
        let mut store = Self::new();
        store.routes = routes.into_iter().map(|r| (r.id, r)).collect();
        store.users = users.into_iter().map(|u| (u.id, u)).collect();
        store.add_pings(pings);
        store
    }

    /// Add pings and rebuild the spatial index.
    pub fn add_pings(&mut self, pings: impl IntoIterator<Item = Ping>) {
        self.pings.extend(pings);
        self.rebuild();
    }

    pub fn add_route(&mut self, route: Route) {
        self.routes.insert(route.id, route);
    }

    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.len()
    }

    fn rebuild(&mut self) {
        let entries: Vec<IndexedPing> = self
            .pings
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([p.longitude, p.latitude], i))
            .collect();
        self.index = RTree::bulk_load(entries);

        self.trips.clear();
        for ping in &self.pings {
            self.trips
                .entry(ping.route_id)
                .and_modify(|trip| {
                    if ping.timestamp < trip.start {
                        trip.start = ping.timestamp;
                        trip.owner = ping.user_id;
                    }
                })
                .or_insert(TripInfo {
                    start: ping.timestamp,
                    owner: ping.user_id,
                });
        }
    }

    fn in_region(&self, region: &BoundingRegion) -> Vec<&Ping> {
        let mut found: Vec<usize> = self
            .index
            .locate_in_envelope(&region.envelope())
            .map(|entry| entry.data)
            .collect();
        found.sort_unstable();
        found.into_iter().map(|i| &self.pings[i]).collect()
    }

    fn trip_matches(&self, route_id: RouteId, filter: impl Fn(&DateTime<Utc>) -> bool) -> bool {
        self.trips
            .get(&route_id)
            .map(|trip| filter(&trip.start))
            .unwrap_or(false)
    }

    fn starts_in_window(start: &DateTime<Utc>, weekday: Weekday, hours: HourRange) -> bool {
        start.weekday() == weekday && hours.contains(start.hour())
    }

    /// Every ping of the trips accepted by `keep`.
    fn trip_pings(&self, keep: impl Fn(RouteId) -> bool) -> Vec<Ping> {
        self.pings
            .iter()
            .filter(|p| keep(p.route_id))
            .cloned()
            .collect()
    }

    /// Routes with a ping in `origin` followed later by a ping in `destination`.
    fn origin_destination_routes(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
    ) -> Vec<RouteId> {
        let mut earliest_origin: HashMap<RouteId, DateTime<Utc>> = HashMap::new();
        for ping in self.in_region(origin) {
            earliest_origin
                .entry(ping.route_id)
                .and_modify(|t| *t = (*t).min(ping.timestamp))
                .or_insert(ping.timestamp);
        }

        let mut matched: Vec<RouteId> = self
            .in_region(destination)
            .into_iter()
            .filter(|p| {
                earliest_origin
                    .get(&p.route_id)
                    .map(|t| p.timestamp > *t)
                    .unwrap_or(false)
            })
            .map(|p| p.route_id)
            .collect();
        matched.sort_unstable();
        matched.dedup();
        matched
    }
}

impl TrackingStore for MemoryTrackingStore {
    async fn fetch_by_region(&self, region: &BoundingRegion) -> Result<Vec<Ping>> {
        Ok(self.in_region(region).into_iter().cloned().collect())
    }

    async fn fetch_by_region_and_weekday_and_hour_range(
        &self,
        region: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        Ok(self
            .in_region(region)
            .into_iter()
            .filter(|p| {
                self.trip_matches(p.route_id, |start| {
                    Self::starts_in_window(start, weekday, hours)
                })
            })
            .cloned()
            .collect())
    }

    async fn fetch_by_date_and_hour_range(
        &self,
        date: NaiveDate,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        Ok(self.trip_pings(|route_id| {
            self.trip_matches(route_id, |start| {
                start.date_naive() == date && hours.contains(start.hour())
            })
        }))
    }

    async fn fetch_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Ping>> {
        Ok(self.trip_pings(|route_id| {
            self.trip_matches(route_id, |trip_start| {
                let day = trip_start.date_naive();
                day >= start && day <= end
            })
        }))
    }

    async fn fetch_by_origin_and_destination(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
    ) -> Result<Vec<Ping>> {
        let routes = self.origin_destination_routes(origin, destination);
        Ok(self.trip_pings(|route_id| routes.binary_search(&route_id).is_ok()))
    }

    async fn fetch_by_origin_and_destination_and_weekday_and_hour_range(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>> {
        let routes = self.origin_destination_routes(origin, destination);
        Ok(self.trip_pings(|route_id| {
            routes.binary_search(&route_id).is_ok()
                && self.trip_matches(route_id, |start| {
                    Self::starts_in_window(start, weekday, hours)
                })
        }))
    }

    async fn fetch_by_route(&self, route_id: RouteId) -> Result<Vec<Ping>> {
        Ok(self.trip_pings(|id| id == route_id))
    }

    async fn fetch_route_by_id(&self, route_id: RouteId) -> Result<Option<Route>> {
        Ok(self.routes.get(&route_id).cloned())
    }

    async fn fetch_routes_by_user(&self, user_id: UserId) -> Result<Vec<Route>> {
        Ok(self
            .routes
            .values()
            .filter(|r| {
                self.trips
                    .get(&r.id)
                    .map(|trip| trip.owner == user_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn fetch_users(&self) -> Result<Vec<User>> {
        Ok(self.users.values().cloned().collect())
    }

    async fn fetch_user_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.users.get(&user_id).cloned())
    }
}
