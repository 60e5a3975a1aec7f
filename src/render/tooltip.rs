//! Tooltip text for drawn routes.
//!
//! The owner's username is the only part that needs the store. Lookups are
//! cached per user id; a missing user only drops the username line.

use std::cell::RefCell;
use std::num::NonZeroUsize;

use log::{debug, warn};
use lru::LruCache;

use crate::reconstruct::ActiveRoute;
use crate::store::TrackingStore;
use crate::{AnalyticsError, EntityKind, OptionExt, Result, UserId};

/// Tooltip text of one route.
pub fn tooltip_text(route: &ActiveRoute, username: Option<&str>) -> String {
    let stats = route.stats();
    let meta = route.route();
    let mut lines = vec![
        format!("Date: {}", meta.start_time.format("%d.%m.%Y")),
        format!("Distance: {} km", stats.distance_km),
        format!("Start: {}", meta.start_time.format("%H:%M")),
        format!("End: {}", meta.end_time.format("%H:%M")),
        format!("Duration: {} min", stats.travel_time_min),
        format!("Max speed: {} km/h", stats.max_speed_kmh),
        format!("Avg speed: {} km/h", stats.avg_speed_display()),
    ];
    if let Some(name) = username {
        lines.push(format!("User: {}", name));
    }
    lines.join("\n")
}

/// Builds tooltips, caching owner lookups.
pub struct TooltipBuilder {
    // None caches a confirmed-missing user
    users: RefCell<LruCache<UserId, Option<String>>>,
}

impl TooltipBuilder {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            users: RefCell::new(LruCache::new(capacity)),
        }
    }

    /// Username of `user_id`, failing with `NotFound` when the store has no
    /// such user.
    pub async fn username<S: TrackingStore>(&self, store: &S, user_id: UserId) -> Result<String> {
        let cached = self.users.borrow_mut().get(&user_id).cloned();
        let name = match cached {
            Some(name) => name,
            None => {
                let name = store.fetch_user_by_id(user_id).await?.map(|u| u.username);
                self.users.borrow_mut().put(user_id, name.clone());
                name
            }
        };
        name.ok_or_not_found(EntityKind::User, user_id)
    }

    pub async fn tooltip<S: TrackingStore>(&self, store: &S, route: &ActiveRoute) -> String {
        match self.username(store, route.user_id()).await {
            Ok(name) => tooltip_text(route, Some(&name)),
            Err(AnalyticsError::NotFound { .. }) => {
                debug!("[Tooltip] No user {} for route {}", route.user_id(), route.id());
                tooltip_text(route, None)
            }
            Err(e) => {
                warn!("[Tooltip] User lookup for route {} failed: {}", route.id(), e);
                tooltip_text(route, None)
            }
        }
    }

    /// Tooltips for every route, in order.
    pub async fn tooltips<S: TrackingStore>(&self, store: &S, routes: &[ActiveRoute]) -> Vec<String> {
        let mut texts = Vec::with_capacity(routes.len());
        for route in routes {
            texts.push(self.tooltip(store, route).await);
        }
        texts
    }

    pub fn cached_users(&self) -> usize {
        self.users.borrow().len()
    }
}
