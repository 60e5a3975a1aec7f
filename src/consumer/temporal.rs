//! Temporal consumer: trips of one day (within an hour range) or of a period.

use std::rc::Rc;

use chrono::NaiveDate;

use super::{ConsumerFilter, ConsumerStatus, DrawPlan, Reconciler, ViewportAction};
use crate::reconstruct::{reconstruct_from_store, ActiveRoute};
use crate::render::SharedRenderer;
use crate::store::{execute, TrackingStore};
use crate::summary::{RouteRow, RouteSummary};
use crate::{AnalyticsConfig, HourRange, OptionExt, PingQuery, Result, RouteId};

const LABEL: &str = "[TemporalConsumer]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalSelection {
    Day { date: NaiveDate, hours: HourRange },
    /// Inclusive, end after start
    Period { start: NaiveDate, end: NaiveDate },
}

impl TemporalSelection {
    fn query(&self) -> Result<PingQuery> {
        match *self {
            TemporalSelection::Day { date, hours } => Ok(PingQuery::on_date(date, hours)),
            TemporalSelection::Period { start, end } => PingQuery::date_range(start, end),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemporalFilter {
    pub selection: Option<TemporalSelection>,
}

impl ConsumerFilter for TemporalFilter {
    fn is_complete(&self) -> bool {
        self.selection.is_some()
    }
}

/// Shows trips by start date. Takes no map gestures and leaves the viewport
/// alone.
pub struct TemporalConsumer<S> {
    inner: Reconciler<TemporalFilter, S>,
}

impl<S: TrackingStore + 'static> TemporalConsumer<S> {
    pub fn new(renderer: SharedRenderer, store: Rc<S>, config: &AnalyticsConfig) -> Self {
        Self {
            inner: Reconciler::new(
                LABEL,
                renderer,
                store,
                config,
                TemporalFilter::default(),
                None,
            ),
        }
    }

    pub fn mount(&self) -> Result<()> {
        self.inner.mount()
    }

    pub fn unmount(&self) -> Result<()> {
        self.inner.unmount()
    }

    pub fn selection(&self) -> Option<TemporalSelection> {
        self.inner.filter().selection
    }

    pub fn select_day(&self, date: NaiveDate, hours: HourRange) {
        self.inner.update_filter(|f| {
            f.selection = Some(TemporalSelection::Day { date, hours });
        });
    }

    /// Select an inclusive period. The end must be after the start; a
    /// rejected period leaves the selection unchanged.
    pub fn select_period(&self, start: NaiveDate, end: NaiveDate) -> Result<()> {
        PingQuery::date_range(start, end)?;
        self.inner.update_filter(|f| {
            f.selection = Some(TemporalSelection::Period { start, end });
        });
        Ok(())
    }

    pub async fn settle(&self) -> Result<()> {
        let min_pings = self.inner.min_pings();
        self.inner
            .settle(
                move |store: Rc<S>, filter: TemporalFilter| async move {
                    let selection = filter
                        .selection
                        .ok_or_internal("temporal fetch without a selection")?;
                    let pings = execute(&*store, &selection.query()?).await?;
                    reconstruct_from_store(&pings, &*store, min_pings).await
                },
                |_: &TemporalFilter, _: &[ActiveRoute]| DrawPlan::per_route(ViewportAction::Keep),
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
