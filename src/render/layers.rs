//! Layer registry: which handles each identity and route owns.

use std::collections::{BTreeSet, HashMap};

use geo::{Centroid, Coord, LineString};
use serde::{Deserialize, Serialize};

use super::backend::{LayerHandle, LayerStyle};
use crate::{GpsPoint, RouteId, UserId};

/// Owner tag of a rendered polyline.
///
/// Several layers may share a tag; [`clear_by_identity`] removes all of them.
/// Consumers that can show the same route remove their own layers by handle.
///
/// [`clear_by_identity`]: super::RenderSynchronizer::clear_by_identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LayerIdentity {
    Route(RouteId),
    User(UserId),
    Group(String),
}

impl std::fmt::Display for LayerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerIdentity::Route(id) => write!(f, "route:{}", id),
            LayerIdentity::User(id) => write!(f, "user:{}", id),
            LayerIdentity::Group(name) => write!(f, "group:{}", name),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LayerEntry {
    pub identity: LayerIdentity,
    pub route_id: RouteId,
    /// Style the layer was drawn with; highlight reverts to it.
    pub base_style: LayerStyle,
    pub style: LayerStyle,
    pub center: Option<GpsPoint>,
    pub tooltip: Option<String>,
}

/// Read-only view of one layer for presentation collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSnapshot {
    pub handle: LayerHandle,
    pub identity: LayerIdentity,
    pub route_id: RouteId,
    pub style: LayerStyle,
    pub highlighted: bool,
    /// 0 is the back-most layer
    pub z_index: usize,
    pub tooltip: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct LayerRegistry {
    entries: HashMap<LayerHandle, LayerEntry>,
    by_identity: HashMap<LayerIdentity, BTreeSet<LayerHandle>>,
    by_route: HashMap<RouteId, BTreeSet<LayerHandle>>,
    /// Back to front
    z_order: Vec<LayerHandle>,
    highlighted: BTreeSet<LayerHandle>,
    next_handle: u64,
}

impl LayerRegistry {
    pub fn allocate(&mut self) -> LayerHandle {
        self.next_handle += 1;
        LayerHandle(self.next_handle)
    }

    pub fn insert(&mut self, handle: LayerHandle, entry: LayerEntry) {
        self.by_identity
            .entry(entry.identity.clone())
            .or_default()
            .insert(handle);
        self.by_route.entry(entry.route_id).or_default().insert(handle);
        self.z_order.push(handle);
        self.entries.insert(handle, entry);
    }

    pub fn remove(&mut self, handle: LayerHandle) -> Option<LayerEntry> {
        let entry = self.entries.remove(&handle)?;
        remove_from_index(&mut self.by_identity, &entry.identity, handle);
        remove_from_index(&mut self.by_route, &entry.route_id, handle);
        self.z_order.retain(|h| *h != handle);
        self.highlighted.remove(&handle);
        Some(entry)
    }

    pub fn handles_for_identity(&self, identity: &LayerIdentity) -> Vec<LayerHandle> {
        self.by_identity
            .get(identity)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn handles_for_route(&self, route_id: RouteId) -> Vec<LayerHandle> {
        self.by_route
            .get(&route_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn handles(&self) -> Vec<LayerHandle> {
        self.z_order.clone()
    }

    pub fn get(&self, handle: LayerHandle) -> Option<&LayerEntry> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: LayerHandle) -> Option<&mut LayerEntry> {
        self.entries.get_mut(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_identity.clear();
        self.by_route.clear();
        self.z_order.clear();
        self.highlighted.clear();
    }

    pub fn mark_highlighted(&mut self, handle: LayerHandle) {
        self.highlighted.insert(handle);
    }

    /// Layers currently carrying the highlight style.
    pub fn take_highlighted(&mut self) -> Vec<LayerHandle> {
        std::mem::take(&mut self.highlighted).into_iter().collect()
    }

    pub fn bring_to_front(&mut self, handle: LayerHandle) {
        if let Some(pos) = self.z_order.iter().position(|h| *h == handle) {
            self.z_order.remove(pos);
            self.z_order.push(handle);
        }
    }

    pub fn snapshot(&self) -> Vec<LayerSnapshot> {
        self.z_order
            .iter()
            .enumerate()
            .filter_map(|(z_index, handle)| {
                self.entries.get(handle).map(|entry| LayerSnapshot {
                    handle: *handle,
                    identity: entry.identity.clone(),
                    route_id: entry.route_id,
                    style: entry.style.clone(),
                    highlighted: self.highlighted.contains(handle),
                    z_index,
                    tooltip: entry.tooltip.clone(),
                })
            })
            .collect()
    }
}

fn remove_from_index<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, BTreeSet<LayerHandle>>,
    key: &K,
    handle: LayerHandle,
) {
    if let Some(set) = index.get_mut(key) {
        set.remove(&handle);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

/// Length-weighted center of a polyline.
pub(crate) fn polyline_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect::<Vec<_>>()
        .into();
    line.centroid().map(|c| GpsPoint::new(c.y(), c.x()))
}
