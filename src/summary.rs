//! Table projection of reconstructed routes.
//!
//! [`RouteRow`] is one line of the route table, sortable by any column;
//! [`RouteSummary`] holds the averages shown above it.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::reconstruct::ActiveRoute;
use crate::{RouteId, UserId};

/// Sortable columns of the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    Route,
    Date,
    Distance,
    StartTime,
    EndTime,
    TravelTime,
    AvgSpeed,
    User,
}

/// One row of the route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRow {
    pub route_id: RouteId,
    pub date: NaiveDate,
    pub distance_km: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub travel_time_min: i64,
    /// Display value; 0 when the travel time is zero
    pub avg_speed_kmh: i64,
    pub user_id: UserId,
}

impl RouteRow {
    pub fn from_route(route: &ActiveRoute) -> Self {
        let stats = route.stats();
        let meta = route.route();
        Self {
            route_id: route.id(),
            date: meta.start_time.date_naive(),
            distance_km: stats.distance_km,
            start_time: meta.start_time,
            end_time: meta.end_time,
            travel_time_min: stats.travel_time_min,
            avg_speed_kmh: stats.avg_speed_display(),
            user_id: route.user_id(),
        }
    }

    /// Cells as displayed: id, date, distance, start, end, duration, speed, user.
    pub fn cells(&self) -> [String; 8] {
        [
            self.route_id.to_string(),
            self.date.format("%d.%m.%Y").to_string(),
            format!("{} km", self.distance_km),
            self.start_time.format("%H:%M").to_string(),
            self.end_time.format("%H:%M").to_string(),
            format!("{} min", self.travel_time_min),
            format!("{} km/h", self.avg_speed_kmh),
            self.user_id.to_string(),
        ]
    }

    fn compare(&self, other: &Self, column: SortColumn) -> Ordering {
        match column {
            SortColumn::Route => self.route_id.cmp(&other.route_id),
            SortColumn::Date => self.start_time.cmp(&other.start_time),
            SortColumn::Distance => self.distance_km.cmp(&other.distance_km),
            // Clock time only, as shown in the cell
            SortColumn::StartTime => self.start_time.time().cmp(&other.start_time.time()),
            SortColumn::EndTime => self.end_time.time().cmp(&other.end_time.time()),
            SortColumn::TravelTime => (self.end_time - self.start_time)
                .cmp(&(other.end_time - other.start_time)),
            SortColumn::AvgSpeed => self.avg_speed_kmh.cmp(&other.avg_speed_kmh),
            SortColumn::User => self.user_id.cmp(&other.user_id),
        }
    }
}

/// Project routes into table rows, keeping their order.
pub fn rows(routes: &[ActiveRoute]) -> Vec<RouteRow> {
    routes.iter().map(RouteRow::from_route).collect()
}

/// Stable sort by one column.
pub fn sort_rows(rows: &mut [RouteRow], column: SortColumn, ascending: bool) {
    rows.sort_by(|a, b| {
        let ord = a.compare(b, column);
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

/// Averages over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub count: usize,
    pub avg_distance_km: f64,
    pub avg_travel_time_min: f64,
    /// Mean over routes with a finite average speed
    pub avg_speed_kmh: f64,
}

impl RouteSummary {
    /// Zero averages for an empty set.
    pub fn from_routes(routes: &[ActiveRoute]) -> Self {
        if routes.is_empty() {
            return Self::default();
        }
        let n = routes.len() as f64;
        let stats: Vec<_> = routes.iter().map(ActiveRoute::stats).collect();

        let speeds: Vec<f64> = stats
            .iter()
            .map(|s| s.avg_speed_kmh)
            .filter(|v| v.is_finite())
            .collect();
        let avg_speed_kmh = if speeds.is_empty() {
            0.0
        } else {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        };

        Self {
            count: routes.len(),
            avg_distance_km: stats.iter().map(|s| s.distance_km as f64).sum::<f64>() / n,
            avg_travel_time_min: stats.iter().map(|s| s.travel_time_min as f64).sum::<f64>() / n,
            avg_speed_kmh,
        }
    }

    /// Display strings: distance, travel time, speed (whole numbers).
    pub fn labels(&self) -> [String; 3] {
        [
            format!("{:.0} km", self.avg_distance_km),
            format!("{:.0} min", self.avg_travel_time_min),
            format!("{:.0} km/h", self.avg_speed_kmh),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ping, Route};
    use chrono::{Duration, TimeZone};

    fn active(id: RouteId, user_id: UserId, start_hour: u32, minutes: i64, meters: f64) -> ActiveRoute {
        let start = Utc.with_ymd_and_hms(2020, 3, id as u32, start_hour, 0, 0).unwrap();
        let pings = vec![Ping {
            id,
            user_id,
            route_id: id,
            timestamp: start,
            latitude: 49.0,
            longitude: 8.4,
            speed_mps: 1.0,
        }];
        ActiveRoute::new(
            Route {
                id,
                start_time: start,
                end_time: start + Duration::minutes(minutes),
                distance: meters,
            },
            pings,
        )
        .unwrap()
    }

    #[test]
    fn test_row_projection() {
        let row = RouteRow::from_route(&active(2, 9, 7, 30, 12_400.0));
        assert_eq!(row.route_id, 2);
        assert_eq!(row.distance_km, 12);
        assert_eq!(row.travel_time_min, 30);
        assert_eq!(row.avg_speed_kmh, 24);
        assert_eq!(
            row.cells(),
            [
                "2".to_string(),
                "02.03.2020".to_string(),
                "12 km".to_string(),
                "07:00".to_string(),
                "07:30".to_string(),
                "30 min".to_string(),
                "24 km/h".to_string(),
                "9".to_string(),
            ]
        );
    }

    #[test]
    fn test_sort_by_columns() {
        let routes = vec![
            active(1, 3, 9, 60, 5_000.0),
            active(2, 1, 7, 10, 20_000.0),
            active(3, 2, 8, 30, 1_000.0),
        ];
        let mut table = rows(&routes);

        sort_rows(&mut table, SortColumn::Distance, false);
        assert_eq!(table.iter().map(|r| r.route_id).collect::<Vec<_>>(), vec![2, 1, 3]);

        sort_rows(&mut table, SortColumn::StartTime, true);
        assert_eq!(table.iter().map(|r| r.route_id).collect::<Vec<_>>(), vec![2, 3, 1]);

        sort_rows(&mut table, SortColumn::User, true);
        assert_eq!(table.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![1, 2, 3]);

        sort_rows(&mut table, SortColumn::TravelTime, true);
        assert_eq!(table[0].route_id, 2);
    }

    #[test]
    fn test_summary_averages() {
        assert_eq!(RouteSummary::from_routes(&[]), RouteSummary::default());
        assert_eq!(
            RouteSummary::default().labels(),
            ["0 km".to_string(), "0 min".to_string(), "0 km/h".to_string()]
        );

        let routes = vec![
            active(1, 1, 8, 30, 12_000.0), // 24 km/h
            active(2, 1, 8, 60, 30_000.0), // 30 km/h
            active(3, 1, 8, 0, 6_000.0),   // zero time, non-finite speed
        ];
        let summary = RouteSummary::from_routes(&routes);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.avg_distance_km, 16.0);
        assert_eq!(summary.avg_travel_time_min, 30.0);
        assert_eq!(summary.avg_speed_kmh, 27.0);
        assert_eq!(summary.labels()[2], "27 km/h");
    }
}
