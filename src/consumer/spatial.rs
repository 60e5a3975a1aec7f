//! Spatial consumer: every trip with a ping inside one drawn region.

use std::cell::Cell;
use std::rc::Rc;

use log::{debug, info};

use super::{ConsumerFilter, ConsumerStatus, DrawPlan, Reconciler, ViewportAction};
use crate::reconstruct::{reconstruct_from_store, ActiveRoute};
use crate::render::SharedRenderer;
use crate::store::{execute, TrackingStore};
use crate::summary::{RouteRow, RouteSummary};
use crate::{AnalyticsConfig, BoundingRegion, OptionExt, PingQuery, Result, RouteId};

const LABEL: &str = "[SpatialConsumer]";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialFilter {
    pub region: Option<BoundingRegion>,
}

impl ConsumerFilter for SpatialFilter {
    fn is_complete(&self) -> bool {
        self.region.is_some()
    }

    fn apply_region(&mut self, region: BoundingRegion) {
        self.region = Some(region);
    }
}

/// Shows every trip crossing the last drawn region.
///
/// Result sets larger than the route cap are kept (and summarized) but not
/// drawn. Changing the cap redraws without refetching.
pub struct SpatialConsumer<S> {
    inner: Reconciler<SpatialFilter, S>,
    max_routes: Cell<usize>,
    max_routes_limit: usize,
}

impl<S: TrackingStore + 'static> SpatialConsumer<S> {
    pub fn new(renderer: SharedRenderer, store: Rc<S>, config: &AnalyticsConfig) -> Self {
        Self {
            inner: Reconciler::new(
                LABEL,
                renderer,
                store,
                config,
                SpatialFilter::default(),
                Some(crate::GestureMode::SingleRegion),
            ),
            max_routes: Cell::new(config.initial_max_routes.min(config.max_routes_limit)),
            max_routes_limit: config.max_routes_limit,
        }
    }

    pub fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    pub fn region(&self) -> Option<BoundingRegion> {
        self.inner.filter().region
    }

    pub fn max_routes(&self) -> usize {
        self.max_routes.get()
    }

    /// Set the draw cap, clamped to the configured limit.
    pub fn set_max_routes(&self, max_routes: usize) {
        let max_routes = max_routes.min(self.max_routes_limit);
        if max_routes != self.max_routes.get() {
            debug!("{} Route cap {} -> {}", LABEL, self.max_routes.get(), max_routes);
            self.max_routes.set(max_routes);
            self.inner.invalidate();
        }
    }

    /// Whether the current result set exceeds the draw cap.
    pub fn exceeds_cap(&self) -> bool {
        self.inner.routes().len() > self.max_routes.get()
    }

    /// Fetch, reconstruct and draw until the consumer is up to date.
    pub async fn settle(&self) -> Result<()> {
        let min_pings = self.inner.min_pings();
        let max_routes = self.max_routes.get();
        self.inner
            .settle(
                move |store: Rc<S>, filter: SpatialFilter| async move {
                    let region = filter.region.ok_or_internal("spatial fetch without a region")?;
                    let pings = execute(&*store, &PingQuery::within_region(region, None)?).await?;
                    reconstruct_from_store(&pings, &*store, min_pings).await
                },
                move |filter: &SpatialFilter, routes: &[ActiveRoute]| {
                    let draw = routes.len() <= max_routes;
                    if !draw {
                        info!(
                            "{} {} routes exceed the cap of {}, not drawing",
                            LABEL,
                            routes.len(),
                            max_routes
                        );
                    }
                    DrawPlan {
                        draw,
                        ..DrawPlan::per_route(
                            filter
                                .region
                                .map(ViewportAction::Fit)
                                .unwrap_or(ViewportAction::Keep),
                        )
                    }
                },
            )
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
