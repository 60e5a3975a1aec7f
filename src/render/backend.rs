//! Map backing abstraction.
//!
//! The synchronizer drives any map through [`MapBackend`]. [`HeadlessMap`]
//! records every call in memory and serves as the backing for tests and for
//! callers that only consume the layer snapshot.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::{BoundingRegion, GpsPoint};

/// Opaque handle of one rendered polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerHandle(pub u64);

/// Stroke style of a polyline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub color: String,
    pub weight: u32,
}

impl LayerStyle {
    pub fn new(color: impl Into<String>, weight: u32) -> Self {
        Self {
            color: color.into(),
            weight,
        }
    }
}

/// Operations the synchronizer needs from a live map.
///
/// Implementations render; they never decide what to render.
pub trait MapBackend {
    fn add_polyline(
        &mut self,
        handle: LayerHandle,
        points: &[GpsPoint],
        style: &LayerStyle,
        tooltip: Option<&str>,
    );

    fn remove_layer(&mut self, handle: LayerHandle);

    fn set_style(&mut self, handle: LayerHandle, style: &LayerStyle);

    fn bring_to_front(&mut self, handle: LayerHandle);

    fn fit_bounds(&mut self, region: &BoundingRegion);

    fn pan_to(&mut self, point: GpsPoint);

    /// Show a user-drawn rectangle.
    fn add_shape(&mut self, region: &BoundingRegion, color: &str);

    fn clear_shapes(&mut self);

    fn set_draw_control(&mut self, visible: bool);
}

/// Last viewport change requested from the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Viewport {
    Bounds(BoundingRegion),
    Center(GpsPoint),
}

/// A polyline as recorded by [`HeadlessMap`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPolyline {
    pub points: Vec<GpsPoint>,
    pub style: LayerStyle,
    pub tooltip: Option<String>,
}

/// Everything a [`HeadlessMap`] has been told.
#[derive(Debug, Clone, Default)]
pub struct HeadlessState {
    pub polylines: BTreeMap<LayerHandle, RecordedPolyline>,
    /// Back to front
    pub z_order: Vec<LayerHandle>,
    pub shapes: Vec<BoundingRegion>,
    pub viewport: Option<Viewport>,
    pub draw_control: bool,
}

impl HeadlessState {
    pub fn front(&self) -> Option<LayerHandle> {
        self.z_order.last().copied()
    }
}

/// In-memory map backing.
///
/// Clones share the same state, so a caller can keep one clone for
/// inspection after handing the other to the synchronizer.
#[derive(Debug, Clone, Default)]
pub struct HeadlessMap {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, HeadlessState> {
        self.state.borrow()
    }

    pub fn polyline_count(&self) -> usize {
        self.state.borrow().polylines.len()
    }
}

impl MapBackend for HeadlessMap {
    fn add_polyline(
        &mut self,
        handle: LayerHandle,
        points: &[GpsPoint],
        style: &LayerStyle,
        tooltip: Option<&str>,
    ) {
        let mut state = self.state.borrow_mut();
        state.polylines.insert(
            handle,
            RecordedPolyline {
                points: points.to_vec(),
                style: style.clone(),
                tooltip: tooltip.map(str::to_string),
            },
        );
        state.z_order.push(handle);
    }

    fn remove_layer(&mut self, handle: LayerHandle) {
        let mut state = self.state.borrow_mut();
        state.polylines.remove(&handle);
        state.z_order.retain(|h| *h != handle);
    }

    fn set_style(&mut self, handle: LayerHandle, style: &LayerStyle) {
        if let Some(polyline) = self.state.borrow_mut().polylines.get_mut(&handle) {
            polyline.style = style.clone();
        }
    }

    fn bring_to_front(&mut self, handle: LayerHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(pos) = state.z_order.iter().position(|h| *h == handle) {
            let h = state.z_order.remove(pos);
            state.z_order.push(h);
        }
    }

    fn fit_bounds(&mut self, region: &BoundingRegion) {
        self.state.borrow_mut().viewport = Some(Viewport::Bounds(*region));
    }

    fn pan_to(&mut self, point: GpsPoint) {
        self.state.borrow_mut().viewport = Some(Viewport::Center(point));
    }

    fn add_shape(&mut self, region: &BoundingRegion, _color: &str) {
        self.state.borrow_mut().shapes.push(*region);
    }

    fn clear_shapes(&mut self) {
        self.state.borrow_mut().shapes.clear();
    }

    fn set_draw_control(&mut self, visible: bool) {
        self.state.borrow_mut().draw_control = visible;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_clones_share_state() {
        let map = HeadlessMap::new();
        let mut backend = map.clone();
        let style = LayerStyle::new("#000", 3);

        backend.add_polyline(LayerHandle(1), &[GpsPoint::new(1.0, 2.0)], &style, Some("tip"));
        backend.add_polyline(LayerHandle(2), &[GpsPoint::new(1.0, 2.0)], &style, None);
        assert_eq!(map.polyline_count(), 2);
        assert_eq!(map.state().front(), Some(LayerHandle(2)));

        backend.bring_to_front(LayerHandle(1));
        assert_eq!(map.state().z_order, vec![LayerHandle(2), LayerHandle(1)]);

        backend.remove_layer(LayerHandle(1));
        assert_eq!(map.state().z_order, vec![LayerHandle(2)]);
        assert!(!map.state().polylines.contains_key(&LayerHandle(1)));
    }
}
