//! Query consumers.
//!
//! Each analysis mode is a thin wrapper around one [`Reconciler`]: a filter
//! descriptor, a fetch function and a draw plan. The reconciler runs the
//! same loop for every mode:
//!
//! 1. If the committed routes changed since the last draw, remove the
//!    layers this consumer drew last time (by handle), draw the new routes, adjust the viewport, and stop.
//! 2. Else, if a fetch is in flight, do nothing.
//! 3. Else, if the filter changed and is complete, run exactly one fetch,
//!    reconstruct its pings and commit the routes.
//!
//! Drawing always happens before the next fetch decision, so a completed
//! fetch is rendered before the consumer checks whether another is needed.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::future::Future;
use std::rc::Rc;

use log::{debug, info, warn};

pub mod origin_destination;
pub mod spatial;
pub mod temporal;
pub mod user;
pub mod weekday;

pub use origin_destination::{OriginDestinationConsumer, OriginDestinationFilter};
pub use spatial::{SpatialConsumer, SpatialFilter};
pub use temporal::{TemporalConsumer, TemporalFilter, TemporalSelection};
pub use user::{UserConsumer, UserFilter};
pub use weekday::{WeekdayConsumer, WeekdayFilter};

use crate::gesture::{GestureMachine, GestureMode, GestureOutcome, GestureSession};
use crate::query::OriginDestination;
use crate::reconstruct::ActiveRoute;
use crate::render::{
    DrawOptions, LayerHandle, LayerIdentity, RegionEvent, RegionSubscriber, SharedRenderer,
    SubscriberId, TooltipBuilder,
};
use crate::store::TrackingStore;
use crate::summary::{self, RouteRow, RouteSummary};
use crate::{AnalyticsConfig, BoundingRegion, GpsPoint, Result, RouteId};

/// What a consumer shows right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// No query has run yet
    Idle,
    /// A fetch is pending or in flight
    Loading,
    /// The last fetch returned nothing, or failed
    NoRoutes,
    Showing(usize),
}

/// Filter descriptor of one consumer mode.
pub trait ConsumerFilter: Clone + PartialEq + Debug + 'static {
    /// Whether the filter holds enough input to issue a fetch.
    fn is_complete(&self) -> bool;

    fn apply_region(&mut self, _region: BoundingRegion) {}

    fn apply_pair(&mut self, _pair: OriginDestination) {}
}

/// How a consumer tags its layers.
///
/// Whatever the tag, a consumer removes only the handles it drew itself, so
/// two consumers showing the same route each keep their own layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IdentityScope {
    /// One identity per drawn route.
    PerRoute,
    /// All routes grouped under one owner; stale layers of the owner are
    /// cleared before drawing.
    Owner(LayerIdentity),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ViewportAction {
    Keep,
    Fit(BoundingRegion),
    PanTo(GpsPoint),
}

/// How to draw a committed result set.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DrawPlan {
    pub scope: IdentityScope,
    pub color: Option<String>,
    /// False clears without drawing.
    pub draw: bool,
    pub viewport: ViewportAction,
}

impl DrawPlan {
    pub fn per_route(viewport: ViewportAction) -> Self {
        Self {
            scope: IdentityScope::PerRoute,
            color: None,
            draw: true,
            viewport,
        }
    }
}

/// State shared between a consumer and its region subscriber.
pub(crate) struct ConsumerCore<F> {
    filter: F,
    revision: u64,
    fetched_revision: Option<u64>,
    routes: Rc<Vec<ActiveRoute>>,
    generation: u64,
    drawn_generation: Option<u64>,
    fetching: bool,
    mounted: bool,
    drawn: Vec<LayerHandle>,
    /// Origin of a new pair whose predecessor's shapes must go
    shape_reset: Option<BoundingRegion>,
}

impl<F: ConsumerFilter> ConsumerCore<F> {
    fn new(filter: F) -> Self {
        Self {
            filter,
            revision: 0,
            fetched_revision: None,
            routes: Rc::new(Vec::new()),
            generation: 0,
            drawn_generation: None,
            fetching: false,
            mounted: false,
            drawn: Vec::new(),
            shape_reset: None,
        }
    }

    /// Apply `change`; a changed filter (or a forced update from a new
    /// gesture) becomes a new revision to fetch.
    fn update_filter(&mut self, change: impl FnOnce(&mut F), force: bool) -> bool {
        let before = self.filter.clone();
        change(&mut self.filter);
        if force || self.filter != before {
            self.revision += 1;
            true
        } else {
            false
        }
    }

    fn has_pending_fetch(&self) -> bool {
        self.filter.is_complete() && self.fetched_revision != Some(self.revision)
    }

    fn is_busy(&self) -> bool {
        self.fetching || self.has_pending_fetch()
    }

    fn needs_draw(&self) -> bool {
        self.mounted && self.generation > 0 && self.drawn_generation != Some(self.generation)
    }

    fn commit(&mut self, routes: Vec<ActiveRoute>) {
        self.routes = Rc::new(routes);
        self.generation += 1;
    }

    fn status(&self) -> ConsumerStatus {
        if self.fetching || (self.mounted && self.has_pending_fetch()) {
            ConsumerStatus::Loading
        } else if self.generation == 0 {
            ConsumerStatus::Idle
        } else if self.routes.is_empty() {
            ConsumerStatus::NoRoutes
        } else {
            ConsumerStatus::Showing(self.routes.len())
        }
    }
}

/// Region subscriber feeding drawn regions through a gesture machine into
/// the consumer's filter.
struct GestureSubscriber<F> {
    label: &'static str,
    core: Rc<RefCell<ConsumerCore<F>>>,
    machine: RefCell<GestureMachine>,
}

impl<F: ConsumerFilter> RegionSubscriber for GestureSubscriber<F> {
    fn on_region(&self, event: &RegionEvent) {
        let mut core = self.core.borrow_mut();
        if !core.mounted {
            return;
        }
        let busy = core.is_busy();
        let region = event.region();

        match self.machine.borrow_mut().on_region(region, busy) {
            Ok(GestureOutcome::Ignored) => {
                debug!("{} Busy, ignoring region {}", self.label, region);
            }
            Ok(GestureOutcome::OriginStored { replaced_pair }) => {
                debug!("{} Origin stored: {}", self.label, region);
                if replaced_pair {
                    core.shape_reset = Some(region);
                }
            }
            Ok(GestureOutcome::PairCompleted(pair)) => {
                debug!(
                    "{} Pair complete: {} -> {}",
                    self.label, pair.origin, pair.destination
                );
                core.update_filter(|f| f.apply_pair(pair), true);
            }
            Ok(GestureOutcome::Region(region)) => {
                debug!("{} Region: {}", self.label, region);
                core.update_filter(|f| f.apply_region(region), true);
            }
            Err(e) => warn!("{} Rejected region: {}", self.label, e),
        }
    }
}

/// The reconciliation loop shared by every consumer mode.
pub(crate) struct Reconciler<F, S> {
    label: &'static str,
    core: Rc<RefCell<ConsumerCore<F>>>,
    renderer: SharedRenderer,
    store: Rc<S>,
    tooltips: TooltipBuilder,
    min_pings: usize,
    gesture: Option<Rc<GestureSubscriber<F>>>,
    subscription: Cell<Option<SubscriberId>>,
}

impl<F: ConsumerFilter, S: TrackingStore> Reconciler<F, S> {
    pub fn new(
        label: &'static str,
        renderer: SharedRenderer,
        store: Rc<S>,
        config: &AnalyticsConfig,
        filter: F,
        gesture_mode: Option<GestureMode>,
    ) -> Self {
        let core = Rc::new(RefCell::new(ConsumerCore::new(filter)));
        let gesture = gesture_mode.map(|mode| {
            Rc::new(GestureSubscriber {
                label,
                core: Rc::clone(&core),
                machine: RefCell::new(GestureMachine::new(mode)),
            })
        });
        Self {
            label,
            core,
            renderer,
            store,
            tooltips: TooltipBuilder::new(config.user_cache_capacity),
            min_pings: config.min_pings_per_route,
            gesture,
            subscription: Cell::new(None),
        }
    }

    pub fn store(&self) -> &Rc<S> {
        &self.store
    }

    pub fn min_pings(&self) -> usize {
        self.min_pings
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start receiving regions (gesture modes) and allow drawing.
    ///
    /// A gesture mode needs a bound map for its draw control; on `NotBound`
    /// nothing changes and mounting can be retried after binding.
    pub fn mount(&self) -> Result<()> {
        if self.core.borrow().mounted {
            return Ok(());
        }

        if let Some(gesture) = &self.gesture {
            let mut renderer = self.renderer.borrow_mut();
            renderer.add_draw_control()?;
            gesture.machine.borrow_mut().reset();
            let subscriber: Rc<dyn RegionSubscriber> = gesture.clone();
            self.subscription.set(Some(renderer.attach(subscriber)));
        }
        self.core.borrow_mut().mounted = true;
        info!("{} Mounted", self.label);
        Ok(())
    }

    /// Detach, drop this consumer's shapes and layers. A fetch still in
    /// flight completes without committing.
    pub fn unmount(&self) -> Result<()> {
        let drawn = {
            let mut core = self.core.borrow_mut();
            if !core.mounted {
                return Ok(());
            }
            core.mounted = false;
            core.drawn_generation = None;
            core.shape_reset = None;
            std::mem::take(&mut core.drawn)
        };

        let mut renderer = self.renderer.borrow_mut();
        if let Some(id) = self.subscription.take() {
            renderer.detach(id);
            // Shapes belong to the draw control; other gesture consumers
            // may still be using both
            if renderer.remove_draw_control()? {
                renderer.clear_shapes()?;
            }
        }
        if !drawn.is_empty() {
            renderer.remove_layers(&drawn)?;
        }
        info!("{} Unmounted", self.label);
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.core.borrow().mounted
    }

    // ========================================================================
    // State access
    // ========================================================================

    pub fn filter(&self) -> F {
        self.core.borrow().filter.clone()
    }

    pub fn update_filter(&self, change: impl FnOnce(&mut F)) -> bool {
        self.core.borrow_mut().update_filter(change, false)
    }

    pub fn status(&self) -> ConsumerStatus {
        self.core.borrow().status()
    }

    pub fn routes(&self) -> Rc<Vec<ActiveRoute>> {
        Rc::clone(&self.core.borrow().routes)
    }

    pub fn rows(&self) -> Vec<RouteRow> {
        summary::rows(&self.routes())
    }

    pub fn summary(&self) -> RouteSummary {
        RouteSummary::from_routes(&self.routes())
    }

    pub fn gesture_session(&self) -> Option<GestureSession> {
        self.gesture
            .as_ref()
            .map(|g| *g.machine.borrow().session())
    }

    /// Replace the result set directly (modes without a descriptor fetch).
    pub fn commit(&self, routes: Vec<ActiveRoute>) {
        self.core.borrow_mut().commit(routes);
    }

    /// Redraw the current result set without refetching.
    pub fn invalidate(&self) {
        let mut core = self.core.borrow_mut();
        if core.generation > 0 {
            core.drawn_generation = None;
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.core.borrow().fetching
    }

    pub fn set_fetching(&self, fetching: bool) {
        self.core.borrow_mut().fetching = fetching;
    }

    pub fn highlight(&self, route_id: RouteId) -> Result<bool> {
        self.renderer.borrow_mut().highlight(route_id)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Run the loop until nothing is left to draw or fetch.
    ///
    /// Store failures are absorbed into an empty result; rendering errors
    /// such as `NotBound` are returned.
    pub async fn settle<Fetch, Fut, Plan>(&self, fetch: Fetch, plan: Plan) -> Result<()>
    where
        Fetch: Fn(Rc<S>, F) -> Fut,
        Fut: Future<Output = Result<Vec<ActiveRoute>>>,
        Plan: Fn(&F, &[ActiveRoute]) -> DrawPlan,
    {
        loop {
            if self.render_pending(&plan).await? {
                continue;
            }
            if !self.fetch_pending(&fetch).await {
                return Ok(());
            }
        }
    }

    /// Draw-only loop for modes that commit results themselves.
    pub async fn render<Plan>(&self, plan: Plan) -> Result<()>
    where
        Plan: Fn(&F, &[ActiveRoute]) -> DrawPlan,
    {
        while self.render_pending(&plan).await? {}
        Ok(())
    }

    fn apply_shape_reset(&self) -> Result<()> {
        let pending = self.core.borrow_mut().shape_reset.take();
        if let Some(origin) = pending {
            let mut renderer = self.renderer.borrow_mut();
            renderer.clear_shapes()?;
            renderer.add_shape(&origin)?;
        }
        Ok(())
    }

    /// Step 1. Returns whether anything was drawn.
    async fn render_pending<Plan>(&self, plan: &Plan) -> Result<bool>
    where
        Plan: Fn(&F, &[ActiveRoute]) -> DrawPlan,
    {
        self.apply_shape_reset()?;

        let (generation, routes, filter) = {
            let core = self.core.borrow();
            if !core.needs_draw() {
                return Ok(false);
            }
            (core.generation, Rc::clone(&core.routes), core.filter.clone())
        };

        let plan = plan(&filter, routes.as_slice());
        let tooltips = if plan.draw {
            self.tooltips.tooltips(&*self.store, routes.as_slice()).await
        } else {
            Vec::new()
        };

        let mut core = self.core.borrow_mut();
        if !core.mounted || core.generation != generation {
            // Superseded while resolving tooltips
            return Ok(core.mounted);
        }

        let mut renderer = self.renderer.borrow_mut();
        renderer.remove_layers(&std::mem::take(&mut core.drawn))?;
        if let IdentityScope::Owner(owner) = &plan.scope {
            renderer.clear_by_identity(owner)?;
        }

        let mut drawn: Vec<LayerHandle> = Vec::with_capacity(routes.len());
        if plan.draw {
            for (route, tooltip) in routes.iter().zip(tooltips) {
                let identity = match &plan.scope {
                    IdentityScope::PerRoute => LayerIdentity::Route(route.id()),
                    IdentityScope::Owner(owner) => owner.clone(),
                };
                let mut options = DrawOptions::default().identity(identity).tooltip(tooltip);
                if let Some(color) = &plan.color {
                    options = options.color(color.clone());
                }
                drawn.push(renderer.draw(route, options)?);
            }

            match plan.viewport {
                ViewportAction::Keep => {}
                ViewportAction::Fit(region) => renderer.fit_bounds(&region)?,
                ViewportAction::PanTo(point) => renderer.pan_to(point)?,
            }
        }

        info!(
            "{} Drew {} of {} routes",
            self.label,
            if plan.draw { routes.len() } else { 0 },
            routes.len()
        );
        core.drawn = drawn;
        core.drawn_generation = Some(generation);
        Ok(true)
    }

    /// Steps 2 and 3. Returns whether a result was committed.
    async fn fetch_pending<Fetch, Fut>(&self, fetch: &Fetch) -> bool
    where
        Fetch: Fn(Rc<S>, F) -> Fut,
        Fut: Future<Output = Result<Vec<ActiveRoute>>>,
    {
        let filter = {
            let mut core = self.core.borrow_mut();
            if !core.mounted || core.fetching || !core.has_pending_fetch() {
                return false;
            }
            core.fetching = true;
            core.fetched_revision = Some(core.revision);
            core.filter.clone()
        };

        debug!("{} Fetching for {:?}", self.label, filter);
        let result = fetch(Rc::clone(&self.store), filter).await;

        let mut core = self.core.borrow_mut();
        core.fetching = false;
        if !core.mounted {
            debug!("{} Unmounted during fetch, discarding result", self.label);
            core.fetched_revision = None;
            return false;
        }

        let routes = match result {
            Ok(routes) => routes,
            Err(e) => {
                warn!("{} Fetch failed: {}", self.label, e);
                Vec::new()
            }
        };
        info!("{} Fetched {} routes", self.label, routes.len());
        core.commit(routes);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{region_drawn, HeadlessMap, RenderSynchronizer};
    use crate::store::MemoryTrackingStore;
    use crate::{AnalyticsError, Ping, Route};
    use chrono::{Duration, TimeZone, Utc};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct TestFilter {
        region: Option<BoundingRegion>,
    }

    impl ConsumerFilter for TestFilter {
        fn is_complete(&self) -> bool {
            self.region.is_some()
        }

        fn apply_region(&mut self, region: BoundingRegion) {
            self.region = Some(region);
        }
    }

    fn active(id: RouteId) -> ActiveRoute {
        let start = Utc.with_ymd_and_hms(2020, 3, 2, 8, 0, 0).unwrap();
        let pings = vec![Ping {
            id,
            user_id: 1,
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
                end_time: start + Duration::minutes(5),
                distance: 1000.0,
            },
            pings,
        )
        .unwrap()
    }

    fn setup() -> (SharedRenderer, HeadlessMap, Reconciler<TestFilter, MemoryTrackingStore>) {
        let config = AnalyticsConfig::default();
        let map = HeadlessMap::new();
        let renderer = RenderSynchronizer::shared(&config);
        renderer.borrow_mut().bind(Box::new(map.clone()));
        let reconciler = Reconciler::new(
            "[Test]",
            Rc::clone(&renderer),
            Rc::new(MemoryTrackingStore::new()),
            &config,
            TestFilter::default(),
            Some(GestureMode::SingleRegion),
        );
        (renderer, map, reconciler)
    }

    fn plan(_: &TestFilter, _: &[ActiveRoute]) -> DrawPlan {
        DrawPlan::per_route(ViewportAction::Keep)
    }

    #[tokio::test]
    async fn test_region_triggers_one_fetch_then_draw() {
        let (renderer, map, reconciler) = setup();
        reconciler.mount().unwrap();
        assert_eq!(reconciler.status(), ConsumerStatus::Idle);

        region_drawn(&renderer, BoundingRegion::new(0.0, 1.0, 0.0, 1.0)).unwrap();
        assert_eq!(reconciler.status(), ConsumerStatus::Loading);

        let calls = Cell::new(0);
        reconciler
            .settle(
                |_store, _filter| {
                    calls.set(calls.get() + 1);
                    async { Ok(vec![active(1), active(2)]) }
                },
                plan,
            )
            .await
            .unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(reconciler.status(), ConsumerStatus::Showing(2));
        assert_eq!(map.polyline_count(), 2);

        // Nothing changed: no refetch, no redraw
        reconciler
            .settle(
                |_store, _filter| {
                    calls.set(calls.get() + 1);
                    async { Ok(Vec::new()) }
                },
                plan,
            )
            .await
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(map.polyline_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_commits_empty() {
        let (renderer, map, reconciler) = setup();
        reconciler.mount().unwrap();
        reconciler.commit(vec![active(1)]);
        reconciler.render(plan).await.unwrap();
        assert_eq!(map.polyline_count(), 1);

        region_drawn(&renderer, BoundingRegion::new(0.0, 1.0, 0.0, 1.0)).unwrap();
        reconciler
            .settle(
                |_store, _filter| async { Err(AnalyticsError::store("boom")) },
                plan,
            )
            .await
            .unwrap();

        assert_eq!(reconciler.status(), ConsumerStatus::NoRoutes);
        assert_eq!(map.polyline_count(), 0);
    }

    #[tokio::test]
    async fn test_unmount_detaches_and_clears() {
        let (renderer, map, reconciler) = setup();
        reconciler.mount().unwrap();
        reconciler.mount().unwrap();
        assert_eq!(renderer.borrow().subscriber_count(), 1);
        assert!(map.state().draw_control);

        reconciler.commit(vec![active(1)]);
        reconciler.render(plan).await.unwrap();
        region_drawn(&renderer, BoundingRegion::new(0.0, 1.0, 0.0, 1.0)).unwrap();

        reconciler.unmount().unwrap();
        assert_eq!(renderer.borrow().subscriber_count(), 0);
        assert!(!map.state().draw_control);
        assert!(map.state().shapes.is_empty());
        assert_eq!(map.polyline_count(), 0);

        // Regions after unmount reach nobody
        region_drawn(&renderer, BoundingRegion::new(0.0, 1.0, 0.0, 1.0)).unwrap();
        assert_eq!(reconciler.filter().region, Some(BoundingRegion::new(0.0, 1.0, 0.0, 1.0)));
    }

    #[test]
    fn test_failed_mount_changes_nothing() {
        let config = AnalyticsConfig::default();
        let renderer = RenderSynchronizer::shared(&config);
        let reconciler: Reconciler<TestFilter, MemoryTrackingStore> = Reconciler::new(
            "[Test]",
            Rc::clone(&renderer),
            Rc::new(MemoryTrackingStore::new()),
            &config,
            TestFilter::default(),
            Some(GestureMode::SingleRegion),
        );

        assert!(matches!(reconciler.mount(), Err(AnalyticsError::NotBound)));
        assert!(!reconciler.is_mounted());
        assert_eq!(renderer.borrow().subscriber_count(), 0);

        let map = HeadlessMap::new();
        renderer.borrow_mut().bind(Box::new(map.clone()));
        reconciler.mount().unwrap();
        assert!(reconciler.is_mounted());
        assert!(map.state().draw_control);
        assert_eq!(renderer.borrow().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_unbound_render_surfaces_not_bound() {
        let (renderer, _map, reconciler) = setup();
        reconciler.mount().unwrap();
        renderer.borrow_mut().unbind();
        reconciler.commit(vec![active(1)]);
        assert!(matches!(
            reconciler.render(plan).await,
            Err(AnalyticsError::NotBound)
        ));
    }
}
