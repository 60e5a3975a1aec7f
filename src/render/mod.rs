//! Map render synchronization.
//!
//! [`RenderSynchronizer`] owns the layer collection drawn on one map and the
//! list of region subscribers. It is created by the caller and shared with
//! every consumer as a [`SharedRenderer`]; there is no process-wide instance.
//!
//! All calls happen on one logical thread. Consumers never hold a borrow of
//! the synchronizer across a suspension point.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub mod backend;
pub mod layers;
pub mod tooltip;

pub use backend::{HeadlessMap, HeadlessState, LayerHandle, LayerStyle, MapBackend, Viewport};
pub use layers::{LayerIdentity, LayerSnapshot};
pub use tooltip::{tooltip_text, TooltipBuilder};

use crate::reconstruct::ActiveRoute;
use crate::{AnalyticsConfig, AnalyticsError, BoundingRegion, GpsPoint, Result, RouteId};
use layers::{polyline_center, LayerEntry, LayerRegistry};

/// The synchronizer as shared between consumers.
pub type SharedRenderer = Rc<RefCell<RenderSynchronizer>>;

/// Registration handle returned by [`RenderSynchronizer::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(u64);

/// A region drawn or edited on the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionEvent {
    Drawn(BoundingRegion),
    Edited(BoundingRegion),
}

impl RegionEvent {
    pub fn region(&self) -> BoundingRegion {
        match self {
            RegionEvent::Drawn(region) | RegionEvent::Edited(region) => *region,
        }
    }
}

/// Receiver of region events.
///
/// Called synchronously during the broadcast. Implementations update their
/// own state only; rendering happens later in the consumer's reconcile pass.
pub trait RegionSubscriber {
    fn on_region(&self, event: &RegionEvent);
}

/// Per-call options of [`RenderSynchronizer::draw`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawOptions {
    /// Owner tag; defaults to the route's own id.
    pub identity: Option<LayerIdentity>,
    /// Stroke color; defaults to the configured route color.
    pub color: Option<String>,
    pub tooltip: Option<String>,
}

impl DrawOptions {
    pub fn identity(mut self, identity: LayerIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }
}

/// Owner of the rendered layer collection and the region pub/sub channel.
pub struct RenderSynchronizer {
    backend: Option<Box<dyn MapBackend>>,
    layers: LayerRegistry,
    subscribers: Vec<(SubscriberId, Rc<dyn RegionSubscriber>)>,
    next_subscriber: u64,
    route_style: LayerStyle,
    highlight_style: LayerStyle,
    shape_color: String,
    /// Mounted consumers using the draw control
    draw_control_users: usize,
}

fn not_bound(operation: &str) -> AnalyticsError {
    warn!("[RenderSync] {} called before the map was bound", operation);
    AnalyticsError::NotBound
}

impl RenderSynchronizer {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            backend: None,
            layers: LayerRegistry::default(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            route_style: LayerStyle::new(config.route_color.clone(), config.route_weight),
            highlight_style: LayerStyle::new(
                config.highlight_color.clone(),
                config.highlight_weight,
            ),
            shape_color: config.shape_color.clone(),
            draw_control_users: 0,
        }
    }

    /// New unbound synchronizer ready to hand to consumers.
    pub fn shared(config: &AnalyticsConfig) -> SharedRenderer {
        Rc::new(RefCell::new(Self::new(config)))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Attach the synchronizer to a live map.
    pub fn bind(&mut self, backend: Box<dyn MapBackend>) {
        if self.backend.is_some() {
            info!("[RenderSync] Rebinding; dropping {} layers", self.layers.len());
            self.layers.clear();
        }
        self.backend = Some(backend);
        info!("[RenderSync] Bound to map");
    }

    /// Detach from the map. Layers drawn on it are forgotten.
    pub fn unbind(&mut self) -> Option<Box<dyn MapBackend>> {
        self.layers.clear();
        self.draw_control_users = 0;
        let backend = self.backend.take();
        if backend.is_some() {
            info!("[RenderSync] Unbound from map");
        }
        backend
    }

    pub fn is_bound(&self) -> bool {
        self.backend.is_some()
    }

    // ========================================================================
    // Pub/sub
    // ========================================================================

    pub fn attach(&mut self, subscriber: Rc<dyn RegionSubscriber>) -> SubscriberId {
        self.next_subscriber += 1;
        let id = SubscriberId(self.next_subscriber);
        self.subscribers.push((id, subscriber));
        debug!("[RenderSync] Attached subscriber {:?}", id);
        id
    }

    /// Remove a subscriber. Returns false if it was not attached.
    pub fn detach(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        let removed = self.subscribers.len() != before;
        debug!("[RenderSync] Detached subscriber {:?} (found: {})", id, removed);
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn subscribers_snapshot(&self) -> Vec<Rc<dyn RegionSubscriber>> {
        self.subscribers.iter().map(|(_, s)| Rc::clone(s)).collect()
    }

    // ========================================================================
    // Route layers
    // ========================================================================

    /// Add one polyline for `route`.
    ///
    /// Every call adds a new layer; callers clear before redrawing.
    pub fn draw(&mut self, route: &ActiveRoute, options: DrawOptions) -> Result<LayerHandle> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("draw"));
        };

        let identity = options
            .identity
            .unwrap_or(LayerIdentity::Route(route.id()));
        let style = LayerStyle::new(
            options
                .color
                .unwrap_or_else(|| self.route_style.color.clone()),
            self.route_style.weight,
        );
        let points = route.points();
        let handle = self.layers.allocate();

        backend.add_polyline(handle, &points, &style, options.tooltip.as_deref());
        self.layers.insert(
            handle,
            LayerEntry {
                identity: identity.clone(),
                route_id: route.id(),
                base_style: style.clone(),
                style,
                center: polyline_center(&points),
                tooltip: options.tooltip,
            },
        );

        debug!(
            "[RenderSync] Drew route {} as {:?} ({}, {} points)",
            route.id(),
            handle,
            identity,
            points.len()
        );
        Ok(handle)
    }

    /// Remove every route layer. Drawn shapes stay.
    pub fn clear_all(&mut self) -> Result<usize> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("clear_all"));
        };
        let handles = self.layers.handles();
        for handle in &handles {
            backend.remove_layer(*handle);
        }
        self.layers.clear();
        debug!("[RenderSync] Cleared {} layers", handles.len());
        Ok(handles.len())
    }

    /// Remove only the layers tagged with `identity`.
    pub fn clear_by_identity(&mut self, identity: &LayerIdentity) -> Result<usize> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("clear_by_identity"));
        };
        let handles = self.layers.handles_for_identity(identity);
        for handle in &handles {
            backend.remove_layer(*handle);
            self.layers.remove(*handle);
        }
        if !handles.is_empty() {
            debug!("[RenderSync] Cleared {} layers of {}", handles.len(), identity);
        }
        Ok(handles.len())
    }

    /// Remove exactly the given layers. Handles no longer registered (after
    /// a rebind, or already removed) are skipped.
    pub fn remove_layers(&mut self, handles: &[LayerHandle]) -> Result<usize> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("remove_layers"));
        };
        let mut removed = 0;
        for handle in handles {
            if self.layers.remove(*handle).is_some() {
                backend.remove_layer(*handle);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Highlight every layer of `route_id` and pan to it.
    ///
    /// Layers highlighted by an earlier call revert to the style they were
    /// drawn with, so exactly the target layers carry the highlight style and
    /// sit on top of the others. This differs from resetting everything to
    /// the configured route style: a layer drawn in a consumer color (user
    /// comparison) gets that color back. With default draw options the two
    /// coincide. An unknown id only reverts. Returns whether any layer
    /// matched.
    pub fn highlight(&mut self, route_id: RouteId) -> Result<bool> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("highlight"));
        };

        for handle in self.layers.take_highlighted() {
            if let Some(entry) = self.layers.get_mut(handle) {
                entry.style = entry.base_style.clone();
                backend.set_style(handle, &entry.style);
            }
        }

        let targets = self.layers.handles_for_route(route_id);
        let mut center = None;
        for handle in &targets {
            if let Some(entry) = self.layers.get_mut(*handle) {
                entry.style = self.highlight_style.clone();
                backend.set_style(*handle, &entry.style);
                center = entry.center.or(center);
            }
            self.layers.mark_highlighted(*handle);
            self.layers.bring_to_front(*handle);
            backend.bring_to_front(*handle);
        }

        if let Some(center) = center {
            backend.pan_to(center);
        }

        debug!(
            "[RenderSync] Highlighted route {} ({} layers)",
            route_id,
            targets.len()
        );
        Ok(!targets.is_empty())
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Current layers, back to front.
    pub fn layers(&self) -> Vec<LayerSnapshot> {
        self.layers.snapshot()
    }

    pub fn layers_json(&self) -> String {
        serde_json::to_string(&self.layers()).unwrap_or_else(|_| "[]".to_string())
    }

    // ========================================================================
    // Viewport
    // ========================================================================

    pub fn fit_bounds(&mut self, region: &BoundingRegion) -> Result<()> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("fit_bounds"));
        };
        backend.fit_bounds(region);
        Ok(())
    }

    pub fn pan_to(&mut self, point: GpsPoint) -> Result<()> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("pan_to"));
        };
        backend.pan_to(point);
        Ok(())
    }

    // ========================================================================
    // Shapes and draw control
    // ========================================================================

    /// Show a user-drawn rectangle.
    pub fn add_shape(&mut self, region: &BoundingRegion) -> Result<()> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("add_shape"));
        };
        backend.add_shape(region, &self.shape_color);
        Ok(())
    }

    pub fn clear_shapes(&mut self) -> Result<()> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("clear_shapes"));
        };
        backend.clear_shapes();
        Ok(())
    }

    /// Show the draw control for one more user.
    pub fn add_draw_control(&mut self) -> Result<()> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("add_draw_control"));
        };
        self.draw_control_users += 1;
        if self.draw_control_users == 1 {
            backend.set_draw_control(true);
        }
        Ok(())
    }

    /// Release one user of the draw control. The control is hidden when the
    /// last user goes; returns whether that happened.
    pub fn remove_draw_control(&mut self) -> Result<bool> {
        let Some(backend) = self.backend.as_deref_mut() else {
            return Err(not_bound("remove_draw_control"));
        };
        if self.draw_control_users == 0 {
            return Ok(false);
        }
        self.draw_control_users -= 1;
        if self.draw_control_users > 0 {
            return Ok(false);
        }
        backend.set_draw_control(false);
        Ok(true)
    }

    pub fn has_draw_control(&self) -> bool {
        self.draw_control_users > 0
    }
}

/// Report a completed draw gesture.
///
/// The rectangle is kept as a drawn shape and broadcast to every subscriber
/// in attach order. The synchronizer is not borrowed while subscribers run.
pub fn region_drawn(renderer: &SharedRenderer, region: BoundingRegion) -> Result<()> {
    let subscribers = {
        let mut sync = renderer.borrow_mut();
        sync.add_shape(&region)?;
        sync.subscribers_snapshot()
    };
    broadcast(&subscribers, RegionEvent::Drawn(region));
    Ok(())
}

/// Report an edit of an already drawn shape.
pub fn region_edited(renderer: &SharedRenderer, region: BoundingRegion) -> Result<()> {
    let subscribers = {
        let sync = renderer.borrow();
        if !sync.is_bound() {
            return Err(not_bound("region_edited"));
        }
        sync.subscribers_snapshot()
    };
    broadcast(&subscribers, RegionEvent::Edited(region));
    Ok(())
}

fn broadcast(subscribers: &[Rc<dyn RegionSubscriber>], event: RegionEvent) {
    debug!(
        "[RenderSync] Broadcasting {:?} to {} subscribers",
        event,
        subscribers.len()
    );
    for subscriber in subscribers {
        subscriber.on_region(&event);
    }
}
