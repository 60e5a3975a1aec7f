//! Weekday consumer: region or origin/destination queries restricted to a
//! weekday and start-hour window.

use std::rc::Rc;

use super::{ConsumerFilter, ConsumerStatus, DrawPlan, Reconciler, ViewportAction};
use crate::gesture::{GestureMode, GestureSession};
use crate::reconstruct::{reconstruct_from_store, ActiveRoute};
use crate::render::SharedRenderer;
use crate::store::{execute, TrackingStore};
use crate::summary::{RouteRow, RouteSummary};
use crate::{
    AnalyticsConfig, BoundingRegion, HourRange, OptionExt, OriginDestination, PingQuery, Result,
    RouteId, TimeWindow, Weekday,
};

const LABEL: &str = "[WeekdayConsumer]";

#[derive(Debug, Clone, PartialEq)]
pub struct WeekdayFilter {
    pub mode: GestureMode,
    pub region: Option<BoundingRegion>,
    pub pair: Option<OriginDestination>,
    pub window: TimeWindow,
}

impl WeekdayFilter {
    fn query(&self) -> Result<PingQuery> {
        match self.mode {
            GestureMode::SingleRegion => {
                let region = self.region.ok_or_internal("weekday fetch without a region")?;
                PingQuery::within_region(region, Some(self.window))
            }
            GestureMode::OriginDestination => {
                let pair = self.pair.ok_or_internal("weekday fetch without a pair")?;
                PingQuery::origin_destination(pair.origin, pair.destination, Some(self.window))
            }
        }
    }
}

impl ConsumerFilter for WeekdayFilter {
    fn is_complete(&self) -> bool {
        match self.mode {
            GestureMode::SingleRegion => self.region.is_some(),
            GestureMode::OriginDestination => self.pair.is_some(),
        }
    }

    fn apply_region(&mut self, region: BoundingRegion) {
        self.region = Some(region);
    }

    fn apply_pair(&mut self, pair: OriginDestination) {
        self.pair = Some(pair);
    }
}

/// Weekday/hour analysis over one region or an origin/destination pair.
///
/// Changing the window refetches with the current region or pair, if any.
pub struct WeekdayConsumer<S> {
    inner: Reconciler<WeekdayFilter, S>,
}

impl<S: TrackingStore + 'static> WeekdayConsumer<S> {
    pub fn new(
        renderer: SharedRenderer,
        store: Rc<S>,
        config: &AnalyticsConfig,
        mode: GestureMode,
    ) -> Self {
        let filter = WeekdayFilter {
            mode,
            region: None,
            pair: None,
            window: TimeWindow::default(),
        };
        Self {
            inner: Reconciler::new(LABEL, renderer, store, config, filter, Some(mode)),
        }
    }

    pub fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    pub fn mode(&self) -> GestureMode {
        self.inner.filter().mode
    }

    pub fn window(&self) -> TimeWindow {
        self.inner.filter().window
    }

    pub fn gesture_session(&self) -> GestureSession {
        self.inner.gesture_session().unwrap_or_default()
    }

    pub fn set_window(&self, window: TimeWindow) {
        self.inner.update_filter(|f| f.window = window);
    }

    pub fn set_weekday(&self, weekday: Weekday) {
        self.inner.update_filter(|f| f.window.weekday = weekday);
    }

    pub fn set_hours(&self, hours: HourRange) {
        self.inner.update_filter(|f| f.window.hours = hours);
    }

    pub async fn settle(&self) -> Result<()> {
        let min_pings = self.inner.min_pings();
        self.inner
            .settle(
                move |store: Rc<S>, filter: WeekdayFilter| async move {
                    let pings = execute(&*store, &filter.query()?).await?;
                    reconstruct_from_store(&pings, &*store, min_pings).await
                },
                |filter: &WeekdayFilter, _: &[ActiveRoute]| {
                    let viewport = match (filter.mode, filter.region) {
                        (GestureMode::SingleRegion, Some(region)) => ViewportAction::Fit(region),
                        _ => ViewportAction::Keep,
                    };
                    DrawPlan::per_route(viewport)
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
