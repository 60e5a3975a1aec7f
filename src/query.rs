//! Spatial query builder.
//!
//! Translates drawn regions plus optional weekday/hour filters into
//! immutable [`PingQuery`] descriptors. Inputs are validated here; malformed
//! regions never reach the store. The builder never executes a query.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use chrono::Weekday;

use crate::{AnalyticsError, BoundingRegion, Result, RouteId};

/// Weekday from its index, 0 = Monday .. 6 = Sunday.
pub fn weekday_from_index(index: u32) -> Result<Weekday> {
    u8::try_from(index)
        .ok()
        .and_then(|i| Weekday::try_from(i).ok())
        .ok_or(AnalyticsError::InvalidWeekday { index })
}

/// Index of a weekday, 0 = Monday .. 6 = Sunday.
pub fn weekday_index(weekday: Weekday) -> u32 {
    weekday.num_days_from_monday()
}

/// Half-open hour interval `[start_hour, end_hour)` within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HourRange {
    start_hour: u32,
    end_hour: u32,
}

impl HourRange {
    /// The whole day, 0..24.
    pub const ALL_DAY: HourRange = HourRange {
        start_hour: 0,
        end_hour: 24,
    };

    /// Hours are 0..=24 with `start_hour < end_hour`.
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self> {
        if end_hour > 24 || start_hour >= end_hour {
            return Err(AnalyticsError::InvalidHourRange {
                start_hour,
                end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

impl Default for HourRange {
    fn default() -> Self {
        Self::ALL_DAY
    }
}

/// Weekday plus start-hour filter applied to the first ping of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub weekday: Weekday,
    pub hours: HourRange,
}

impl TimeWindow {
    pub fn new(weekday: Weekday, hours: HourRange) -> Self {
        Self { weekday, hours }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            weekday: Weekday::Mon,
            hours: HourRange::ALL_DAY,
        }
    }
}

/// An ordered origin/destination region pair.
///
/// The origin is always the chronologically first leg; order is never
/// inferred from geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginDestination {
    pub origin: BoundingRegion,
    pub destination: BoundingRegion,
}

impl OriginDestination {
    pub fn new(origin: BoundingRegion, destination: BoundingRegion) -> Result<Self> {
        origin.validate()?;
        destination.validate()?;
        Ok(Self {
            origin,
            destination,
        })
    }
}

/// Immutable description of one store request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PingQuery {
    WithinRegion {
        region: BoundingRegion,
    },
    WithinRegionOnWeekday {
        region: BoundingRegion,
        window: TimeWindow,
    },
    OnDate {
        date: NaiveDate,
        hours: HourRange,
    },
    DateRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    OriginDestination {
        pair: OriginDestination,
    },
    OriginDestinationOnWeekday {
        pair: OriginDestination,
        window: TimeWindow,
    },
    ByRoute {
        route_id: RouteId,
    },
}

impl PingQuery {
    /// Query for pings inside one region, optionally restricted to a weekday
    /// and start-hour window.
    pub fn within_region(region: BoundingRegion, window: Option<TimeWindow>) -> Result<Self> {
        region.validate()?;
        Ok(match window {
            Some(window) => PingQuery::WithinRegionOnWeekday { region, window },
            None => PingQuery::WithinRegion { region },
        })
    }

    /// Query for trips leaving `origin` and later reaching `destination`.
    pub fn origin_destination(
        origin: BoundingRegion,
        destination: BoundingRegion,
        window: Option<TimeWindow>,
    ) -> Result<Self> {
        let pair = OriginDestination::new(origin, destination)?;
        Ok(match window {
            Some(window) => PingQuery::OriginDestinationOnWeekday { pair, window },
            None => PingQuery::OriginDestination { pair },
        })
    }

    /// Query for one calendar day, restricted to a start-hour range.
    pub fn on_date(date: NaiveDate, hours: HourRange) -> Self {
        PingQuery::OnDate { date, hours }
    }

    /// Query for an inclusive period; the end must be after the start.
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(AnalyticsError::InvalidDateRange { start, end });
        }
        Ok(PingQuery::DateRange { start, end })
    }

    pub fn by_route(route_id: RouteId) -> Self {
        PingQuery::ByRoute { route_id }
    }
}
