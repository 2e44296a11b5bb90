//! In-memory object store with derived layer ordering and tombstones.

use crate::object::{DrawableObject, ObjectId, ObjectPatch};
use kurbo::{Point, Vec2};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct Entry {
    object: DrawableObject,
    /// Insertion sequence; breaks ties between equal provisional layers.
    seq: u64,
}

impl Entry {
    /// Sort key within the layer order. Canonical ids are ledger creation
    /// order, so every participant ranks them the same way however they
    /// arrived. Provisional objects sit above canonical ones on their layer,
    /// in local insertion order.
    fn order_key(&self) -> (u32, bool, u64) {
        let id = self.object.id();
        let rank = if id.is_canonical() { id.0 as u64 } else { self.seq };
        (self.object.layer, id.is_provisional(), rank)
    }
}

/// Owns every live drawing object on a board.
///
/// The layer order is recomputed from scratch whenever membership or any
/// object's layer changes. Ids in the tombstone set are permanently dead:
/// they cannot be looked up, updated or re-added.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects: HashMap<ObjectId, Entry>,
    /// Live ids sorted by [`Entry::order_key`], back to front.
    layer_order: Vec<ObjectId>,
    tombstones: HashSet<ObjectId>,
    next_provisional: i64,
    next_seq: u64,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            layer_order: Vec::new(),
            tombstones: HashSet::new(),
            next_provisional: -1,
            next_seq: 0,
        }
    }

    /// Insert an object. Returns false (and changes nothing) if the id is
    /// tombstoned or already present.
    pub fn add(&mut self, object: DrawableObject) -> bool {
        let id = object.id();
        if self.tombstones.contains(&id) || self.objects.contains_key(&id) {
            log::debug!("Refusing to add object {}: id already used", id);
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.objects.insert(id, Entry { object, seq });
        self.rebuild_layer_order();
        true
    }

    /// Apply a partial update. No-op (returns false) for unknown or
    /// tombstoned ids.
    ///
    /// For strokes, `points` wins over `bounds`: bounds are always re-derived
    /// from the final point sequence.
    pub fn update(&mut self, id: ObjectId, patch: ObjectPatch) -> bool {
        let Some(entry) = self.objects.get_mut(&id) else {
            return false;
        };
        let object = &mut entry.object;

        match patch.points {
            Some(points) => {
                if !object.set_points(points) {
                    if let Some(bounds) = patch.bounds {
                        object.set_bounds(bounds);
                    }
                }
            }
            None => {
                if let Some(bounds) = patch.bounds {
                    object.set_bounds(bounds);
                }
            }
        }
        if let Some(content) = patch.content {
            object.set_content(content);
        }
        if let Some(locked) = patch.locked {
            object.locked = locked;
        }
        let relayer = match patch.layer {
            Some(layer) if layer != object.layer => {
                object.layer = layer;
                true
            }
            _ => false,
        };

        if relayer {
            self.rebuild_layer_order();
        }
        true
    }

    /// Displace an object (and a stroke's points) by `delta`.
    pub fn translate(&mut self, id: ObjectId, delta: Vec2) -> bool {
        match self.objects.get_mut(&id) {
            Some(entry) => {
                entry.object.translate(delta);
                true
            }
            None => false,
        }
    }

    /// Tombstone an id. The id stays dead even if it was never present.
    /// Returns true if a live object was removed.
    pub fn delete(&mut self, id: ObjectId) -> bool {
        self.tombstones.insert(id);
        let removed = self.objects.remove(&id).is_some();
        if removed {
            self.rebuild_layer_order();
        }
        removed
    }

    pub fn get(&self, id: ObjectId) -> Option<&DrawableObject> {
        self.objects.get(&id).map(|e| &e.object)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn is_tombstoned(&self, id: ObjectId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Live or tombstoned: either way an incoming creation must not apply.
    pub fn is_known(&self, id: ObjectId) -> bool {
        self.contains(id) || self.is_tombstoned(id)
    }

    /// Objects back to front.
    pub fn objects_in_layer_order(&self) -> impl DoubleEndedIterator<Item = &DrawableObject> {
        self.layer_order
            .iter()
            .filter_map(|id| self.objects.get(id).map(|e| &e.object))
    }

    /// Topmost object whose padded bounds contain `point`.
    pub fn object_at_point(&self, point: Point) -> Option<&DrawableObject> {
        self.objects_in_layer_order().rev().find(|o| o.hit_test(point))
    }

    /// Highest layer currently in use (0 on an empty board).
    pub fn top_layer(&self) -> u32 {
        self.objects.values().map(|e| e.object.layer).max().unwrap_or(0)
    }

    /// Next provisional id: -1, -2, -3, ...
    pub fn generate_provisional_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_provisional);
        self.next_provisional -= 1;
        id
    }

    /// Remove every object and tombstone.
    ///
    /// The provisional counter keeps running so that ids handed out before a
    /// clear can never collide with ids handed out after it.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.layer_order.clear();
        self.tombstones.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Detach an object for re-keying, keeping its insertion sequence.
    pub(crate) fn take(&mut self, id: ObjectId) -> Option<(DrawableObject, u64)> {
        let entry = self.objects.remove(&id)?;
        self.rebuild_layer_order();
        Some((entry.object, entry.seq))
    }

    /// Re-insert a detached object under its (possibly new) id.
    pub(crate) fn restore(&mut self, object: DrawableObject, seq: u64) -> bool {
        let id = object.id();
        if self.tombstones.contains(&id) || self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, Entry { object, seq });
        self.rebuild_layer_order();
        true
    }

    fn rebuild_layer_order(&mut self) {
        let mut order: Vec<((u32, bool, u64), ObjectId)> =
            self.objects.iter().map(|(&id, e)| (e.order_key(), id)).collect();
        order.sort_unstable();
        self.layer_order = order.into_iter().map(|(_, id)| id).collect();
    }
}
