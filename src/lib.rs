//! # Route Analytics
//!
//! Map-driven analytics over raw GPS pings.
//!
//! This library provides:
//! - Trip reconstruction from an unordered bag of timestamped pings
//! - Typed query descriptors built from user-drawn regions and time filters
//! - A draw-gesture state machine for single-region and origin/destination input
//! - A render synchronizer that keeps a map layer collection consistent with
//!   asynchronously arriving query results
//! - Per-mode query consumers (spatial, temporal, weekday, user,
//!   origin/destination) sharing one reconciliation loop
//!
//! ## Features
//!
//! - **`parallel`** - Sort ping buckets in parallel with rayon
//! - **`http`** - Enable the HTTP tracking-point store client
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use route_analytics::{group_into_routes, Ping, Route};
//! use std::collections::HashMap;
//!
//! let start = Utc.with_ymd_and_hms(2020, 3, 2, 8, 0, 0).unwrap();
//! let pings: Vec<Ping> = (0..12)
//!     .map(|i| Ping {
//!         id: i,
//!         user_id: 1,
//!         route_id: 7,
//!         timestamp: start + chrono::Duration::seconds(i as i64 * 30),
//!         latitude: 49.0 + i as f64 * 0.001,
//!         longitude: 8.4,
//!         speed_mps: 5.0,
//!     })
//!     .collect();
//!
//! let mut catalog = HashMap::new();
//! catalog.insert(7, Route {
//!     id: 7,
//!     start_time: start,
//!     end_time: start + chrono::Duration::minutes(30),
//!     distance: 12_400.0,
//! });
//!
//! let routes = group_into_routes(&pings, &catalog, 10);
//! assert_eq!(routes.len(), 1);
//! assert_eq!(routes[0].stats().distance_km, 12);
//! ```

use chrono::{DateTime, Utc};
use rstar::AABB;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{AnalyticsError, EntityKind, OptionExt, Result};

// Runtime configuration
pub mod config;
pub use config::{AnalyticsConfig, StoreConfig};

// Route reconstruction (pings -> ordered trips)
pub mod reconstruct;
pub use reconstruct::{group_into_routes, reconstruct_from_store, ActiveRoute, RouteCatalog, RouteStats};

// Query descriptors built from drawn regions and time filters
pub mod query;
pub use query::{HourRange, OriginDestination, PingQuery, TimeWindow, Weekday};

// Tracking-point store boundary
pub mod store;
pub use store::{execute, MemoryTrackingStore, TrackingStore};
#[cfg(feature = "http")]
pub use store::http::HttpTrackingStore;

// Draw-gesture interpretation
pub mod gesture;
pub use gesture::{GestureMachine, GestureMode, GestureOutcome, GestureSession, GestureState};

// Map render synchronization and region pub/sub
pub mod render;
pub use render::{
    region_drawn, region_edited, DrawOptions, HeadlessMap, LayerHandle, LayerIdentity,
    LayerSnapshot, LayerStyle, MapBackend, RegionEvent, RegionSubscriber, RenderSynchronizer,
    SharedRenderer, SubscriberId,
};

// Table projection and aggregate statistics
pub mod summary;
pub use summary::{RouteRow, RouteSummary, SortColumn};

// Per-mode query consumers
pub mod consumer;
pub use consumer::{
    ConsumerStatus, OriginDestinationConsumer, SpatialConsumer, TemporalConsumer, UserConsumer,
    WeekdayConsumer,
};

// ============================================================================
// Core Types
// ============================================================================

pub type PingId = u64;
pub type RouteId = u64;
pub type UserId = u64;

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_analytics::GpsPoint;
/// let point = GpsPoint::new(49.0069, 8.4037); // Karlsruhe
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One raw timestamped GPS sample.
///
/// Field names on the wire follow the tracking-data endpoint
/// (`route`, `user`, `lat`, `lng`, `speed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub id: PingId,
    #[serde(rename = "user")]
    pub user_id: UserId,
    #[serde(rename = "route")]
    pub route_id: RouteId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
    /// Speed in m/s
    #[serde(rename = "speed")]
    pub speed_mps: f64,
}

impl Ping {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Stored trip metadata, independent of the ping trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Declared distance in meters
    pub distance: f64,
}

/// A tracked user (owner of routes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(rename = "type", default)]
    pub user_type: String,
    /// Accumulated travel time as reported by the store
    #[serde(default)]
    pub total_time: f64,
    /// Accumulated distance in meters
    #[serde(default)]
    pub total_distance: f64,
}

/// A rectangular lat/lng filter drawn by the user.
///
/// Construction does not validate; the query builder rejects regions with
/// `south > north` or `west > east`. Degenerate regions (a line or a point)
/// are valid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl BoundingRegion {
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    /// Normalized region spanned by two opposite corners of a drag gesture.
    pub fn from_corners(a: GpsPoint, b: GpsPoint) -> Self {
        Self {
            south: a.latitude.min(b.latitude),
            north: a.latitude.max(b.latitude),
            west: a.longitude.min(b.longitude),
            east: a.longitude.max(b.longitude),
        }
    }

    /// Smallest region containing all points, `None` when empty.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut region = Self::new(first.latitude, first.latitude, first.longitude, first.longitude);
        for p in &points[1..] {
            region.south = region.south.min(p.latitude);
            region.north = region.north.max(p.latitude);
            region.west = region.west.min(p.longitude);
            region.east = region.east.max(p.longitude);
        }
        Some(region)
    }

    pub fn is_valid(&self) -> bool {
        self.south <= self.north && self.west <= self.east
    }

    /// Reject malformed regions with [`AnalyticsError::InvalidRegion`].
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AnalyticsError::InvalidRegion { region: *self })
        }
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.south
            && point.latitude <= self.north
            && point.longitude >= self.west
            && point.longitude <= self.east
    }

    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }

    /// Envelope in R-tree coordinates (`[lng, lat]`).
    pub fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.west, self.south], [self.east, self.north])
    }
}

impl std::fmt::Display for BoundingRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(south={}, north={}, west={}, east={})",
            self.south, self.north, self.west, self.east
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(49.0069, 8.4037).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_region_validity() {
        assert!(BoundingRegion::new(1.0, 2.0, 3.0, 4.0).validate().is_ok());
        // Degenerate line and point are accepted
        assert!(BoundingRegion::new(1.0, 1.0, 3.0, 4.0).validate().is_ok());
        assert!(BoundingRegion::new(1.0, 1.0, 3.0, 3.0).validate().is_ok());

        assert!(matches!(
            BoundingRegion::new(2.0, 1.0, 3.0, 4.0).validate(),
            Err(AnalyticsError::InvalidRegion { .. })
        ));
        assert!(matches!(
            BoundingRegion::new(1.0, 2.0, 4.0, 3.0).validate(),
            Err(AnalyticsError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_region_from_corners_normalizes() {
        let region =
            BoundingRegion::from_corners(GpsPoint::new(49.1, 8.5), GpsPoint::new(49.0, 8.4));
        assert_eq!(region, BoundingRegion::new(49.0, 49.1, 8.4, 8.5));
        assert!(region.contains(&GpsPoint::new(49.05, 8.45)));
        assert!(region.contains(&GpsPoint::new(49.0, 8.4)));
        assert!(!region.contains(&GpsPoint::new(48.99, 8.45)));
    }

    #[test]
    fn test_region_from_points() {
        assert!(BoundingRegion::from_points(&[]).is_none());
        let region = BoundingRegion::from_points(&[
            GpsPoint::new(49.0, 8.5),
            GpsPoint::new(49.2, 8.4),
            GpsPoint::new(49.1, 8.6),
        ])
        .unwrap();
        assert_eq!(region, BoundingRegion::new(49.0, 49.2, 8.4, 8.6));
        assert_eq!(region.center(), GpsPoint::new(49.1, 8.5));
    }

    #[test]
    fn test_ping_wire_format() {
        let json = r#"{"id":1,"speed":4.2,"timestamp":"2020-03-02T08:15:00.000Z","route":7,"lat":49.0,"lng":8.4,"user":3}"#;
        let ping: Ping = serde_json::from_str(json).unwrap();
        assert_eq!(ping.route_id, 7);
        assert_eq!(ping.user_id, 3);
        assert_eq!(ping.speed_mps, 4.2);
        assert_eq!(ping.point(), GpsPoint::new(49.0, 8.4));
    }
}
