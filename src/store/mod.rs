//! Tracking-point store boundary.
//!
//! The store supplies raw pings for spatial/temporal/identity filters plus
//! the static route and user metadata. Query execution and timeouts belong
//! to the implementation; the core only builds descriptors and dispatches
//! them through [`execute`].

use chrono::NaiveDate;
use log::debug;

use crate::query::{HourRange, PingQuery, Weekday};
use crate::{BoundingRegion, Ping, Result, Route, RouteId, User, UserId};

pub mod memory;
pub use memory::MemoryTrackingStore;

#[cfg(feature = "http")]
pub mod http;

/// Requests the core issues against the tracking-point store.
///
/// All futures run on one logical thread; implementations need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait TrackingStore {
    async fn fetch_by_region(&self, region: &BoundingRegion) -> Result<Vec<Ping>>;

    async fn fetch_by_region_and_weekday_and_hour_range(
        &self,
        region: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>>;

    async fn fetch_by_date_and_hour_range(
        &self,
        date: NaiveDate,
        hours: HourRange,
    ) -> Result<Vec<Ping>>;

    async fn fetch_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Ping>>;

    async fn fetch_by_origin_and_destination(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
    ) -> Result<Vec<Ping>>;

    async fn fetch_by_origin_and_destination_and_weekday_and_hour_range(
        &self,
        origin: &BoundingRegion,
        destination: &BoundingRegion,
        weekday: Weekday,
        hours: HourRange,
    ) -> Result<Vec<Ping>>;

    /// Pings of one route, in any order.
    async fn fetch_by_route(&self, route_id: RouteId) -> Result<Vec<Ping>>;

    async fn fetch_route_by_id(&self, route_id: RouteId) -> Result<Option<Route>>;

    async fn fetch_routes_by_user(&self, user_id: UserId) -> Result<Vec<Route>>;

    async fn fetch_users(&self) -> Result<Vec<User>>;

    async fn fetch_user_by_id(&self, user_id: UserId) -> Result<Option<User>>;
}

/// Dispatch a query descriptor to the matching store request.
pub async fn execute<S: TrackingStore>(store: &S, query: &PingQuery) -> Result<Vec<Ping>> {
    debug!("[Store] Executing {:?}", query);
    match query {
        PingQuery::WithinRegion { region } => store.fetch_by_region(region).await,
        PingQuery::WithinRegionOnWeekday { region, window } => {
            store
                .fetch_by_region_and_weekday_and_hour_range(region, window.weekday, window.hours)
                .await
        }
        PingQuery::OnDate { date, hours } => store.fetch_by_date_and_hour_range(*date, *hours).await,
        PingQuery::DateRange { start, end } => store.fetch_by_date_range(*start, *end).await,
        PingQuery::OriginDestination { pair } => {
            store
                .fetch_by_origin_and_destination(&pair.origin, &pair.destination)
                .await
        }
        PingQuery::OriginDestinationOnWeekday { pair, window } => {
            store
                .fetch_by_origin_and_destination_and_weekday_and_hour_range(
                    &pair.origin,
                    &pair.destination,
                    window.weekday,
                    window.hours,
                )
                .await
        }
        PingQuery::ByRoute { route_id } => store.fetch_by_route(*route_id).await,
    }
}
