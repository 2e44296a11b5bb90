//! Selection set, resize handles and move/resize transforms.

use crate::geometry;
use crate::object::{DrawableObject, ObjectId, ObjectPatch};
use crate::store::ObjectStore;
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Handle hit tolerance in world units, applied per axis.
pub const HANDLE_TOLERANCE: f64 = 10.0;
/// Lower bound for a resize scale factor; prevents inverting the selection.
pub const MIN_RESIZE_SCALE: f64 = 0.1;
/// Minimum width/height of an object produced by a resize.
pub const MIN_OBJECT_SIZE: f64 = 10.0;

/// One of the eight resize handles around the selection box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handle {
    N,
    S,
    E,
    W,
    NE,
    NW,
    SE,
    SW,
}

impl Handle {
    pub const ALL: [Handle; 8] = [
        Handle::NW,
        Handle::N,
        Handle::NE,
        Handle::E,
        Handle::SE,
        Handle::S,
        Handle::SW,
        Handle::W,
    ];

    fn moves_north(self) -> bool {
        matches!(self, Handle::N | Handle::NE | Handle::NW)
    }

    fn moves_south(self) -> bool {
        matches!(self, Handle::S | Handle::SE | Handle::SW)
    }

    fn moves_east(self) -> bool {
        matches!(self, Handle::E | Handle::NE | Handle::SE)
    }

    fn moves_west(self) -> bool {
        matches!(self, Handle::W | Handle::NW | Handle::SW)
    }

    /// Position of this handle on `bounds`.
    pub fn position(self, bounds: Rect) -> Point {
        let cx = bounds.x0 + bounds.width() / 2.0;
        let cy = bounds.y0 + bounds.height() / 2.0;
        match self {
            Handle::NW => Point::new(bounds.x0, bounds.y0),
            Handle::N => Point::new(cx, bounds.y0),
            Handle::NE => Point::new(bounds.x1, bounds.y0),
            Handle::E => Point::new(bounds.x1, cy),
            Handle::SE => Point::new(bounds.x1, bounds.y1),
            Handle::S => Point::new(cx, bounds.y1),
            Handle::SW => Point::new(bounds.x0, bounds.y1),
            Handle::W => Point::new(bounds.x0, cy),
        }
    }
}

/// Active transform, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "handle", rename_all = "snake_case")]
pub enum TransformMode {
    #[default]
    None,
    Moving,
    Resizing(Handle),
}

impl TransformMode {
    pub fn is_active(self) -> bool {
        self != TransformMode::None
    }
}

/// What a finished transform touched, so the caller can submit confirmations.
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub mode: TransformMode,
    pub objects: Vec<DrawableObject>,
}

/// Per-object state captured when a transform starts.
#[derive(Debug, Clone)]
struct ObjectSnapshot {
    bounds: Rect,
    points: Option<Vec<Point>>,
}

/// Snapshots owned by the single active drag.
#[derive(Debug, Clone)]
struct TransformSession {
    mode: TransformMode,
    start: Point,
    /// Combined selection box at drag start.
    original_bounds: Rect,
    originals: HashMap<ObjectId, ObjectSnapshot>,
}

/// Tracks selected ids and drives move/resize transforms against an
/// [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct Selection {
    selected: BTreeSet<ObjectId>,
    bounds: Option<Rect>,
    session: Option<TransformSession>,
    handle_tolerance: f64,
}

impl Default for Selection {
    fn default() -> Self {
        Self::new()
    }
}

impl Selection {
    pub fn new() -> Self {
        Self::with_tolerance(HANDLE_TOLERANCE)
    }

    pub fn with_tolerance(handle_tolerance: f64) -> Self {
        Self {
            selected: BTreeSet::new(),
            bounds: None,
            session: None,
            handle_tolerance,
        }
    }

    /// Select an object, replacing the selection unless `additive`.
    /// Ids not live in the store are ignored.
    pub fn select(&mut self, store: &ObjectStore, id: ObjectId, additive: bool) -> bool {
        if !store.contains(id) {
            return false;
        }
        if !additive {
            self.selected.clear();
        }
        self.selected.insert(id);
        self.refresh_bounds(store);
        true
    }

    pub fn deselect(&mut self, store: &ObjectStore, id: ObjectId) -> bool {
        let removed = self.selected.remove(&id);
        if removed {
            self.refresh_bounds(store);
        }
        removed
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
        self.bounds = None;
    }

    pub fn is_selected(&self, id: ObjectId) -> bool {
        self.selected.contains(&id)
    }

    pub fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn selected_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.selected.iter().copied()
    }

    pub fn selected_objects<'a>(&self, store: &'a ObjectStore) -> Vec<&'a DrawableObject> {
        self.selected.iter().filter_map(|&id| store.get(id)).collect()
    }

    /// Combined bounding box of the selection.
    pub fn bounding_box(&self) -> Option<Rect> {
        self.bounds
    }

    pub fn handle_positions(&self) -> Vec<(Handle, Point)> {
        match self.bounds {
            Some(bounds) => Handle::ALL.iter().map(|&h| (h, h.position(bounds))).collect(),
            None => Vec::new(),
        }
    }

    /// Handle within tolerance of `point` on both axes.
    pub fn handle_at_point(&self, point: Point) -> Option<Handle> {
        let tolerance = self.handle_tolerance;
        self.handle_positions()
            .into_iter()
            .find(|(_, pos)| (point.x - pos.x).abs() <= tolerance && (point.y - pos.y).abs() <= tolerance)
            .map(|(handle, _)| handle)
    }

    pub fn contains_point(&self, point: Point) -> bool {
        self.bounds.is_some_and(|b| {
            (b.x0..=b.x1).contains(&point.x) && (b.y0..=b.y1).contains(&point.y)
        })
    }

    /// Recompute the combined bounding box from the store.
    pub fn refresh_bounds(&mut self, store: &ObjectStore) {
        self.bounds = geometry::union_bounds(self.selected.iter().filter_map(|&id| store.get(id)).map(|o| o.bounds()));
    }

    /// Drop ids that are no longer live in the store.
    pub fn prune(&mut self, store: &ObjectStore) {
        self.selected.retain(|&id| store.contains(id));
        self.refresh_bounds(store);
    }

    /// Move membership from `from` to `to` (used after identity remapping).
    pub(crate) fn replace_id(&mut self, store: &ObjectStore, from: ObjectId, to: ObjectId) {
        if self.selected.remove(&from) {
            if store.contains(to) {
                self.selected.insert(to);
            }
            if let Some(session) = &mut self.session {
                if let Some(snapshot) = session.originals.remove(&from) {
                    session.originals.insert(to, snapshot);
                }
            }
            self.refresh_bounds(store);
        }
    }

    pub fn mode(&self) -> TransformMode {
        self.session.as_ref().map_or(TransformMode::None, |s| s.mode)
    }

    /// Start a transform at `start`, snapshotting the selection.
    ///
    /// No-op (returns false) when there is no selection box, when `mode` is
    /// `None`, or when a transform is already running.
    pub fn begin_transform(&mut self, store: &ObjectStore, mode: TransformMode, start: Point) -> bool {
        if !mode.is_active() || self.session.is_some() {
            return false;
        }
        let Some(original_bounds) = self.bounds else {
            return false;
        };

        let originals = self
            .selected
            .iter()
            .filter_map(|&id| store.get(id))
            .map(|o| {
                let snapshot = ObjectSnapshot {
                    bounds: o.bounds(),
                    points: o.points().map(<[Point]>::to_vec),
                };
                (o.id(), snapshot)
            })
            .collect();

        self.session = Some(TransformSession {
            mode,
            start,
            original_bounds,
            originals,
        });
        true
    }

    /// Apply the transform for the cumulative drag to `current`.
    pub fn update_transform(&mut self, store: &mut ObjectStore, current: Point) {
        let Some(session) = &self.session else {
            return;
        };
        let delta = current - session.start;

        match session.mode {
            TransformMode::None => return,
            TransformMode::Moving => apply_move(store, session, delta),
            TransformMode::Resizing(handle) => apply_resize(store, session, handle, delta),
        }
        self.refresh_bounds(store);
    }

    /// Finish the transform, dropping all snapshots.
    pub fn end_transform(&mut self, store: &ObjectStore) -> TransformOutcome {
        let mode = self.session.take().map_or(TransformMode::None, |s| s.mode);
        TransformOutcome {
            mode,
            objects: self.selected_objects(store).into_iter().cloned().collect(),
        }
    }

    /// Abandon the transform, leaving objects where the last update put them.
    pub fn cancel_transform(&mut self) {
        self.session = None;
    }

    /// Drop selection and any transform in progress.
    pub fn reset(&mut self) {
        self.session = None;
        self.deselect_all();
    }
}

fn apply_move(store: &mut ObjectStore, session: &TransformSession, delta: Vec2) {
    for (&id, original) in &session.originals {
        let mut patch = ObjectPatch::bounds(original.bounds + delta);
        if let Some(points) = &original.points {
            let mut moved = points.clone();
            geometry::translate_points(&mut moved, delta);
            patch = patch.with_points(moved);
        }
        store.update(id, patch);
    }
}

/// Scale factor and origin offset for one axis of a resize.
fn axis_scale(extent: f64, delta: f64, grows_far: bool, grows_near: bool) -> (f64, f64) {
    if extent <= 0.0 {
        return (1.0, 0.0);
    }
    if grows_far {
        (((extent + delta) / extent).max(MIN_RESIZE_SCALE), 0.0)
    } else if grows_near {
        (((extent - delta) / extent).max(MIN_RESIZE_SCALE), delta)
    } else {
        (1.0, 0.0)
    }
}

fn apply_resize(store: &mut ObjectStore, session: &TransformSession, handle: Handle, delta: Vec2) {
    let ob = session.original_bounds;
    let (scale_x, offset_x) = axis_scale(ob.width(), delta.x, handle.moves_east(), handle.moves_west());
    let (scale_y, offset_y) = axis_scale(ob.height(), delta.y, handle.moves_south(), handle.moves_north());

    for (&id, original) in &session.originals {
        let rel_x = geometry::fraction(original.bounds.x0, ob.x0, ob.width());
        let rel_y = geometry::fraction(original.bounds.y0, ob.y0, ob.height());

        let new_bounds = Rect::from_origin_size(
            (
                ob.x0 + offset_x + rel_x * ob.width() * scale_x,
                ob.y0 + offset_y + rel_y * ob.height() * scale_y,
            ),
            (
                (original.bounds.width() * scale_x).max(MIN_OBJECT_SIZE),
                (original.bounds.height() * scale_y).max(MIN_OBJECT_SIZE),
            ),
        );

        let mut patch = ObjectPatch::bounds(new_bounds);
        if let Some(points) = &original.points {
            patch = patch.with_points(geometry::remap_points(points, original.bounds, new_bounds));
        }
        store.update(id, patch);
    }
}
