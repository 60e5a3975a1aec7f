//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AnalyticsError, Result};

/// Configuration for reconstruction, rendering and the consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Minimum number of pings for a bucket to count as a trip.
    /// Shorter buckets are discarded as measurement noise. Default: 10
    pub min_pings_per_route: usize,

    /// Default polyline color. Default: "#000"
    pub route_color: String,

    /// Color of the highlighted polyline. Default: "#ffff00"
    pub highlight_color: String,

    /// Color used for user-drawn rectangles. Default: "#008b58"
    pub shape_color: String,

    /// Default polyline weight in pixels. Default: 3
    pub route_weight: u32,

    /// Weight of the highlighted polyline. Default: 6
    pub highlight_weight: u32,

    /// Initial draw cap of the spatial consumer. Default: 100
    pub initial_max_routes: usize,

    /// Upper bound for the spatial draw cap. Default: 999
    pub max_routes_limit: usize,

    /// Capacity of the tooltip user lookup cache. Default: 256
    pub user_cache_capacity: usize,

    /// Store client settings
    pub store: StoreConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            min_pings_per_route: 10,
            route_color: "#000".to_string(),
            highlight_color: "#ffff00".to_string(),
            shape_color: "#008b58".to_string(),
            route_weight: 3,
            highlight_weight: 6,
            initial_max_routes: 100,
            max_routes_limit: 999,
            user_cache_capacity: 256,
            store: StoreConfig::default(),
        }
    }
}

/// Settings for the HTTP tracking-point store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Default: "http://localhost:8080"
    pub base_url: String,
    /// Per-request timeout. Default: 30
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AnalyticsConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| AnalyticsError::Config {
            message: format!("invalid config JSON: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| AnalyticsError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_pings_per_route == 0 {
            return Err(config_error("min_pings_per_route must be at least 1"));
        }
        if self.route_weight == 0 || self.highlight_weight == 0 {
            return Err(config_error("polyline weights must be positive"));
        }
        if self.initial_max_routes > self.max_routes_limit {
            return Err(config_error(&format!(
                "initial_max_routes ({}) exceeds max_routes_limit ({})",
                self.initial_max_routes, self.max_routes_limit
            )));
        }
        if self.user_cache_capacity == 0 {
            return Err(config_error("user_cache_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> AnalyticsError {
    AnalyticsError::Config {
        message: message.to_string(),
    }
}
