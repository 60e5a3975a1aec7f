//! User consumer: compare hand-picked routes of one user.
//!
//! Routes are added one at a time from the selected user's route list and
//! drawn under the user's identity in the consumer's color. Several user
//! consumers can share one map; each clears only its own user's layers.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};

use super::{ConsumerFilter, ConsumerStatus, DrawPlan, IdentityScope, Reconciler, ViewportAction};
use crate::reconstruct::ActiveRoute;
use crate::render::{LayerIdentity, SharedRenderer};
use crate::store::TrackingStore;
use crate::summary::{RouteRow, RouteSummary};
use crate::{
    AnalyticsConfig, AnalyticsError, EntityKind, OptionExt, Result, Route, RouteId, User, UserId,
};

const LABEL: &str = "[UserConsumer]";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserFilter {
    pub user: Option<UserId>,
}

impl ConsumerFilter for UserFilter {
    // Results are committed route by route, never fetched from the filter
    fn is_complete(&self) -> bool {
        false
    }
}

pub struct UserConsumer<S> {
    inner: Reconciler<UserFilter, S>,
    color: RefCell<String>,
    users: RefCell<Vec<User>>,
    available: RefCell<Vec<Route>>,
}

impl<S: TrackingStore + 'static> UserConsumer<S> {
    pub fn new(
        renderer: SharedRenderer,
        store: Rc<S>,
        config: &AnalyticsConfig,
        color: impl Into<String>,
    ) -> Self {
        Self {
            inner: Reconciler::new(LABEL, renderer, store, config, UserFilter::default(), None),
            color: RefCell::new(color.into()),
            users: RefCell::new(Vec::new()),
            available: RefCell::new(Vec::new()),
        }
    }

    pub fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    pub fn color(&self) -> String {
        self.color.borrow().clone()
    }

    /// Change the stroke color; already drawn routes are redrawn.
    pub fn set_color(&self, color: impl Into<String>) {
        *self.color.borrow_mut() = color.into();
        self.inner.invalidate();
    }

    pub fn user(&self) -> Option<UserId> {
        self.inner.filter().user
    }

    pub fn users(&self) -> Vec<User> {
        self.users.borrow().clone()
    }

    /// Routes of the selected user that can be added.
    pub fn available_routes(&self) -> Vec<Route> {
        self.available.borrow().clone()
    }

    pub async fn load_users(&self) -> Result<Vec<User>> {
        let users = self.inner.store().fetch_users().await?;
        info!("{} Loaded {} users", LABEL, users.len());
        *self.users.borrow_mut() = users.clone();
        Ok(users)
    }

    /// Switch to `user_id`, dropping the routes shown for the previous user.
    ///
    /// Ignored while a request of this consumer is in flight; returns whether
    /// the switch happened.
    pub async fn select_user(&self, user_id: UserId) -> Result<bool> {
        if self.inner.is_fetching() {
            debug!("{} Busy, ignoring switch to user {}", LABEL, user_id);
            return Ok(false);
        }

        self.inner.set_fetching(true);
        let result = self.inner.store().fetch_routes_by_user(user_id).await;
        self.inner.set_fetching(false);
        let routes = result?;

        debug!("{} User {} has {} routes", LABEL, user_id, routes.len());
        *self.available.borrow_mut() = routes;
        self.inner.update_filter(|f| f.user = Some(user_id));
        self.inner.commit(Vec::new());
        Ok(true)
    }

    /// Fetch one route of the selected user and add it to the comparison.
    ///
    /// Ignored while a request of this consumer is in flight. The result is
    /// dropped if the consumer was unmounted or switched user meanwhile.
    /// Returns whether the route was added.
    pub async fn add_route(&self, route_id: RouteId) -> Result<bool> {
        let user_id = self.user().ok_or_internal("no user selected")?;
        let route = self
            .available
            .borrow()
            .iter()
            .find(|r| r.id == route_id)
            .cloned()
            .ok_or_not_found(EntityKind::Route, route_id)?;
        if self.inner.is_fetching() {
            debug!("{} Busy, ignoring route {}", LABEL, route_id);
            return Ok(false);
        }

        self.inner.set_fetching(true);
        let result = self.inner.store().fetch_by_route(route_id).await;
        self.inner.set_fetching(false);
        let pings = result?;

        if !self.inner.is_mounted() {
            debug!("{} Unmounted while fetching route {}", LABEL, route_id);
            return Ok(false);
        }
        if self.user() != Some(user_id) {
            debug!(
                "{} User changed while fetching route {}, discarding",
                LABEL, route_id
            );
            return Ok(false);
        }
        if pings.is_empty() {
            return Err(AnalyticsError::NotFound {
                kind: EntityKind::Route,
                id: route_id,
            });
        }

        let active = ActiveRoute::new(route, pings)?;
        let mut routes = self.inner.routes().as_ref().clone();
        routes.push(active);
        self.inner.commit(routes);
        Ok(true)
    }

    /// Remove the most recently added route. Returns false when none is left.
    pub fn remove_last_route(&self) -> bool {
        let mut routes = self.inner.routes().as_ref().clone();
        if routes.pop().is_none() {
            return false;
        }
        self.inner.commit(routes);
        true
    }

    pub fn remove_all_routes(&self) {
        if !self.inner.routes().is_empty() {
            self.inner.commit(Vec::new());
        }
    }

    /// Draw the current routes and pan to the last one added.
    pub async fn settle(&self) -> Result<()> {
        let color = self.color();
        self.inner
            .render(move |filter: &UserFilter, routes: &[ActiveRoute]| DrawPlan {
                scope: match filter.user {
                    Some(user_id) => IdentityScope::Owner(LayerIdentity::User(user_id)),
                    None => IdentityScope::PerRoute,
                },
                color: Some(color.clone()),
                draw: true,
                viewport: routes
                    .last()
                    .map(|r| ViewportAction::PanTo(r.middle_ping().point()))
                    .unwrap_or(ViewportAction::Keep),
            })
            .await
    }

    pub fn status(&self) -> ConsumerStatus {
        self.inner.status()
    }

    pub fn routes(&self) -> Rc<Vec<ActiveRoute>> {
        self.inner.routes()
    }

    pub fn rows(&self) -> Vec<RouteRow> {
        self.inner.rows()
    }

    pub fn summary(&self) -> RouteSummary {
        self.inner.summary()
    }

    pub fn highlight(&self, route_id: RouteId) -> Result<bool> {
        self.inner.highlight(route_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{HeadlessMap, RenderSynchronizer, Viewport};
    use crate::store::MemoryTrackingStore;
    use crate::Ping;
    use chrono::{Duration, TimeZone, Utc};

    fn user(id: UserId, name: &str) -> User {
        User {
            id,
            username: name.to_string(),
            user_type: String::new(),
            total_time: 0.0,
            total_distance: 0.0,
        }
    }

    // Users 1 and 2 with two routes each; route ids are user * 10 + n
    fn store() -> MemoryTrackingStore {
        let mut store = MemoryTrackingStore::new();
        store.add_user(user(1, "alice"));
        store.add_user(user(2, "bob"));
        for user_id in 1..=2u64 {
            for n in 1..=2u64 {
                let route_id = user_id * 10 + n;
                let start = Utc.with_ymd_and_hms(2020, 3, n as u32, 8, 0, 0).unwrap();
                store.add_route(Route {
                    id: route_id,
                    start_time: start,
                    end_time: start + Duration::minutes(10),
                    distance: 2_000.0,
                });
                store.add_pings((0..5).map(|i| Ping {
                    id: route_id * 100 + i,
                    user_id,
                    route_id,
                    timestamp: start + Duration::seconds(i as i64 * 60),
                    latitude: 49.0 + i as f64 * 0.01,
                    longitude: 8.0 + route_id as f64 * 0.01,
                    speed_mps: 3.0,
                }));
            }
        }
        store
    }

    fn setup() -> (SharedRenderer, HeadlessMap, Rc<MemoryTrackingStore>) {
        let config = AnalyticsConfig::default();
        let map = HeadlessMap::new();
        let renderer = RenderSynchronizer::shared(&config);
        renderer.borrow_mut().bind(Box::new(map.clone()));
        (renderer, map, Rc::new(store()))
    }

    #[tokio::test]
    async fn test_add_and_remove_routes() {
        let (renderer, map, store) = setup();
        let consumer = UserConsumer::new(
            Rc::clone(&renderer),
            store,
            &AnalyticsConfig::default(),
            "#ff0000",
        );
        consumer.mount().unwrap();

        assert_eq!(consumer.load_users().await.unwrap().len(), 2);
        consumer.select_user(1).await.unwrap();
        assert_eq!(consumer.available_routes().len(), 2);
        assert_eq!(consumer.status(), ConsumerStatus::NoRoutes);

        assert!(consumer.add_route(11).await.unwrap());
        assert!(consumer.add_route(12).await.unwrap());
        consumer.settle().await.unwrap();
        assert_eq!(consumer.status(), ConsumerStatus::Showing(2));

        let layers = renderer.borrow().layers();
        assert_eq!(layers.len(), 2);
        assert!(layers.iter().all(|l| l.identity == LayerIdentity::User(1)));
        assert!(layers.iter().all(|l| l.style.color == "#ff0000"));
        // Panned to the middle ping of route 12
        let middle = consumer.routes()[1].middle_ping().point();
        assert_eq!(middle.latitude, consumer.routes()[1].pings()[2].latitude);
        assert_eq!(map.state().viewport, Some(Viewport::Center(middle)));

        assert!(consumer.remove_last_route());
        consumer.settle().await.unwrap();
        assert_eq!(map.polyline_count(), 1);
        assert_eq!(consumer.routes()[0].id(), 11);

        consumer.remove_all_routes();
        consumer.settle().await.unwrap();
        assert_eq!(map.polyline_count(), 0);
        assert!(!consumer.remove_last_route());
    }

    #[tokio::test]
    async fn test_unknown_route_and_no_user() {
        let (renderer, _map, store) = setup();
        let consumer = UserConsumer::new(renderer, store, &AnalyticsConfig::default(), "#00f");
        consumer.mount().unwrap();
        assert!(matches!(
            consumer.add_route(11).await,
            Err(AnalyticsError::Internal { .. })
        ));

        consumer.select_user(1).await.unwrap();
        // Route 21 belongs to user 2
        assert!(matches!(
            consumer.add_route(21).await,
            Err(AnalyticsError::NotFound {
                kind: EntityKind::Route,
                id: 21
            })
        ));
    }

    #[tokio::test]
    async fn test_color_change_redraws() {
        let (renderer, _map, store) = setup();
        let consumer = UserConsumer::new(
            Rc::clone(&renderer),
            store,
            &AnalyticsConfig::default(),
            "#00f",
        );
        consumer.mount().unwrap();
        consumer.select_user(2).await.unwrap();
        consumer.add_route(21).await.unwrap();
        consumer.settle().await.unwrap();

        consumer.set_color("#0f0");
        consumer.settle().await.unwrap();
        let layers = renderer.borrow().layers();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].style.color, "#0f0");
    }

    #[tokio::test]
    async fn test_switching_user_clears_previous_layers() {
        let (renderer, map, store) = setup();
        let consumer = UserConsumer::new(
            Rc::clone(&renderer),
            store,
            &AnalyticsConfig::default(),
            "#00f",
        );
        consumer.mount().unwrap();
        consumer.select_user(1).await.unwrap();
        consumer.add_route(11).await.unwrap();
        consumer.settle().await.unwrap();

        consumer.select_user(2).await.unwrap();
        consumer.settle().await.unwrap();
        assert_eq!(map.polyline_count(), 0);
        assert_eq!(consumer.user(), Some(2));
    }
}
