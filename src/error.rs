//! Unified error handling for the route-analytics library.
//!
//! Every fallible operation in the crate returns [`Result`]. Failures that
//! the reconciliation loop must absorb (store errors, missing metadata) are
//! still reported through this type and then logged and converted into an
//! empty result by the caller.

use thiserror::Error;

use crate::BoundingRegion;

/// What kind of entity a [`AnalyticsError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Route,
    User,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Route => write!(f, "route"),
            EntityKind::User => write!(f, "user"),
        }
    }
}

/// Unified error type for route-analytics operations.
#[derive(Debug, Clone, Error)]
pub enum AnalyticsError {
    /// Bounding box with south > north or west > east
    #[error("Invalid region {region}: south must be <= north and west <= east")]
    InvalidRegion { region: BoundingRegion },

    /// Hour filter outside 0..=24 or with start >= end
    #[error("Invalid hour range {start_hour}..{end_hour}")]
    InvalidHourRange { start_hour: u32, end_hour: u32 },

    /// Weekday index outside 0..=6
    #[error("Invalid weekday index {index}, expected 0 (Monday) to 6 (Sunday)")]
    InvalidWeekday { index: u32 },

    /// Period whose end is not after its start
    #[error("Invalid date range: {start} is not before {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Referenced metadata does not exist
    #[error("No {kind} found for id {id}")]
    NotFound { kind: EntityKind, id: u64 },

    /// Rendering call before the surface was bound to a live map
    #[error("Render surface is not bound to a map")]
    NotBound,

    /// Store/network failure
    #[error("{}", store_message(.message, .status_code))]
    Store {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn store_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("Store error ({}): {}", code, message),
        None => format!("Store error: {}", message),
    }
}

impl AnalyticsError {
    /// Shorthand for a store failure without an HTTP status.
    pub fn store(message: impl Into<String>) -> Self {
        AnalyticsError::Store {
            message: message.into(),
            status_code: None,
        }
    }
}

/// Result type alias for route-analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Extension trait for converting Option to AnalyticsError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found error.
    fn ok_or_not_found(self, kind: EntityKind, id: u64) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, kind: EntityKind, id: u64) -> Result<T> {
        self.ok_or(AnalyticsError::NotFound { kind, id })
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AnalyticsError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalyticsError::InvalidRegion {
            region: BoundingRegion::new(2.0, 1.0, 0.0, 1.0),
        };
        assert!(err.to_string().contains("south=2, north=1"));

        let err = AnalyticsError::Store {
            message: "connection refused".to_string(),
            status_code: Some(502),
        };
        assert_eq!(err.to_string(), "Store error (502): connection refused");
        assert_eq!(
            AnalyticsError::store("timeout").to_string(),
            "Store error: timeout"
        );
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_not_found(EntityKind::Route, 7);
        assert!(matches!(
            result,
            Err(AnalyticsError::NotFound {
                kind: EntityKind::Route,
                id: 7
            })
        ));
        assert_eq!(
            result.unwrap_err().to_string(),
            "No route found for id 7"
        );
    }
}
