//! Origin/destination consumer: trips that pass through a first region and
//! later through a second one.

use std::rc::Rc;

use super::{ConsumerFilter, ConsumerStatus, DrawPlan, Reconciler, ViewportAction};
use crate::gesture::{GestureMode, GestureSession};
use crate::reconstruct::{reconstruct_from_store, ActiveRoute};
use crate::render::SharedRenderer;
use crate::store::{execute, TrackingStore};
use crate::summary::{RouteRow, RouteSummary};
use crate::{AnalyticsConfig, OptionExt, OriginDestination, PingQuery, Result, RouteId};

const LABEL: &str = "[OriginDestinationConsumer]";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginDestinationFilter {
    pub pair: Option<OriginDestination>,
}

impl ConsumerFilter for OriginDestinationFilter {
    fn is_complete(&self) -> bool {
        self.pair.is_some()
    }

    fn apply_pair(&mut self, pair: OriginDestination) {
        self.pair = Some(pair);
    }
}

/// Two-gesture consumer. The first region drawn is the origin, the second
/// the destination; a third starts a new pair and removes the old shapes.
pub struct OriginDestinationConsumer<S> {
    inner: Reconciler<OriginDestinationFilter, S>,
}

impl<S: TrackingStore + 'static> OriginDestinationConsumer<S> {
    pub fn new(renderer: SharedRenderer, store: Rc<S>, config: &AnalyticsConfig) -> Self {
        Self {
            inner: Reconciler::new(
                LABEL,
                renderer,
                store,
                config,
                OriginDestinationFilter::default(),
                Some(GestureMode::OriginDestination),
            ),
        }
    }

    pub fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    /// Last completed pair.
    pub fn pair(&self) -> Option<OriginDestination> {
        self.inner.filter().pair
    }

    /// Regions drawn in the current gesture sequence.
    pub fn gesture_session(&self) -> GestureSession {
        self.inner.gesture_session().unwrap_or_default()
    }

    pub async fn settle(&self) -> Result<()> {
        let min_pings = self.inner.min_pings();
        self.inner
            .settle(
                move |store: Rc<S>, filter: OriginDestinationFilter| async move {
                    let pair = filter.pair.ok_or_internal("fetch without a complete pair")?;
                    let query = PingQuery::origin_destination(pair.origin, pair.destination, None)?;
                    let pings = execute(&*store, &query).await?;
                    reconstruct_from_store(&pings, &*store, min_pings).await
                },
                |_: &OriginDestinationFilter, _: &[ActiveRoute]| {
                    DrawPlan::per_route(ViewportAction::Keep)
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
