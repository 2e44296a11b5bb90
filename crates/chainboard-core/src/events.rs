//! Event reconciliation: full replay on join and incremental catch-up.
//!
//! A pass is split in two. `fetch_*` performs all ledger I/O for a
//! checkpoint range without touching board state; `apply_*` then folds the
//! gathered [`EventBatch`] into the store in one synchronous step, so a range
//! is either applied whole or not at all.

use crate::geometry;
use crate::ledger::{
    Checkpoint, EventPayload, EventStream, Ledger, LedgerEvent, LedgerResult, ObjectAttributes,
};
use crate::object::{
    text_bounds, DrawableObject, ObjectBody, ObjectId, ObjectKind, ObjectPatch, ObjectStyle,
    ParticipantId,
};
use crate::roster::Roster;
use crate::selection::Selection;
use crate::store::ObjectStore;
use kurbo::{Point, Rect, Vec2};
use std::collections::{HashMap, HashSet};

/// Streams read by a full replay. Layer and lock state come from the
/// attribute lookup, which is already current.
const REPLAY_STREAMS: [EventStream; 11] = [
    EventStream::StrokePoints,
    EventStream::ShapeGeometry,
    EventStream::StickyNoteData,
    EventStream::TextData,
    EventStream::ObjectMoved,
    EventStream::ObjectResized,
    EventStream::ObjectDeleted,
    EventStream::ContentUpdated,
    EventStream::UserJoined,
    EventStream::UserLeft,
    EventStream::NicknameUpdated,
];

/// Streams read by catch-up. `ObjectCreated` is redundant with the
/// per-kind data event that accompanies it.
const CATCH_UP_STREAMS: [EventStream; 15] = [
    EventStream::StrokePoints,
    EventStream::ShapeGeometry,
    EventStream::StickyNoteData,
    EventStream::TextData,
    EventStream::ObjectMoved,
    EventStream::ObjectResized,
    EventStream::ObjectDeleted,
    EventStream::LayerChanged,
    EventStream::ContentUpdated,
    EventStream::LockToggled,
    EventStream::UserJoined,
    EventStream::UserLeft,
    EventStream::NicknameUpdated,
    EventStream::CanvasCleared,
    EventStream::CursorMoved,
];

fn is_roster_stream(stream: EventStream) -> bool {
    matches!(
        stream,
        EventStream::UserJoined
            | EventStream::UserLeft
            | EventStream::NicknameUpdated
            | EventStream::CursorMoved
    )
}

/// Everything the ledger said about one checkpoint range.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub from: Checkpoint,
    pub to: Checkpoint,
    /// Last clear in the range. Object events before it are already dropped.
    clear: Option<LedgerEvent>,
    /// Remaining events in log order, without clears.
    events: Vec<LedgerEvent>,
    /// Attributes of objects the batch may materialize.
    attributes: HashMap<ObjectId, ObjectAttributes>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.clear.is_none()
    }
}

/// Summary of an applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub from: Checkpoint,
    pub to: Checkpoint,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    /// A remote clear emptied the board.
    pub cleared: bool,
}

impl ApplyReport {
    fn new(from: Checkpoint, to: Checkpoint) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    fn changed(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0 || self.cleared
    }
}

/// Mutable board state a batch is applied to.
pub struct Replica<'a> {
    pub store: &'a mut ObjectStore,
    pub selection: &'a mut Selection,
    pub roster: &'a mut Roster,
}

/// Folds ledger events into board state for one local participant and
/// tracks the checkpoint watermark.
#[derive(Debug, Clone)]
pub struct EventReconciler {
    local: ParticipantId,
    watermark: Option<Checkpoint>,
}

impl EventReconciler {
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            watermark: None,
        }
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Last checkpoint whose events have been applied.
    pub fn watermark(&self) -> Option<Checkpoint> {
        self.watermark
    }

    pub fn reset(&mut self) {
        self.watermark = None;
    }

    /// Gather the full history needed to rebuild the board.
    ///
    /// The lower bound is the most recent clear (or `floor`). `is_known`
    /// reports ids already present or tombstoned locally; they are not
    /// looked up.
    pub async fn fetch_replay<L, F>(&self, ledger: &L, floor: Option<Checkpoint>, is_known: F) -> LedgerResult<EventBatch>
    where
        L: Ledger + ?Sized,
        F: Fn(ObjectId) -> bool,
    {
        let floor = floor.unwrap_or(0);
        let current = ledger.current_checkpoint().await?;

        let clear = ledger
            .query_events(EventStream::CanvasCleared, floor, current)
            .await?
            .into_iter()
            .max_by_key(LedgerEvent::position);
        let from = clear.as_ref().map_or(floor, |c| c.checkpoint);

        let mut events = Vec::new();
        for stream in REPLAY_STREAMS {
            // The roster outlives clears.
            let lower = if is_roster_stream(stream) { floor } else { from };
            events.extend(ledger.query_events(stream, lower, current).await?);
        }
        events.sort_by_key(LedgerEvent::position);
        if let Some(clear) = &clear {
            void_before(&mut events, clear.position());
        }

        let attributes = lookup_attributes(ledger, &events, is_known).await;
        Ok(EventBatch {
            from,
            to: current,
            clear,
            events,
            attributes,
        })
    }

    /// Gather events past the watermark. Returns `None` when the ledger has
    /// nothing new.
    ///
    /// Without a watermark only the current checkpoint is read.
    pub async fn fetch_catch_up<L, F>(&self, ledger: &L, is_known: F) -> LedgerResult<Option<EventBatch>>
    where
        L: Ledger + ?Sized,
        F: Fn(ObjectId) -> bool,
    {
        let current = ledger.current_checkpoint().await?;
        let from = self.watermark.map_or(current, |w| w + 1);
        if from > current {
            return Ok(None);
        }

        let mut events = Vec::new();
        for stream in CATCH_UP_STREAMS {
            events.extend(ledger.query_events(stream, from, current).await?);
        }
        events.sort_by_key(LedgerEvent::position);

        // A clear voids what precedes it whoever issued it; only a remote
        // clear still has to be applied locally.
        let clear = events
            .iter()
            .rev()
            .find(|e| matches!(e.payload, EventPayload::CanvasCleared))
            .cloned();
        events.retain(|e| !matches!(e.payload, EventPayload::CanvasCleared));
        if let Some(clear) = &clear {
            void_before(&mut events, clear.position());
        }

        let before = events.len();
        events.retain(|e| e.origin != self.local);
        if before != events.len() {
            log::debug!("Skipping {} self-echoed events in {}..={}", before - events.len(), from, current);
        }

        let attributes = lookup_attributes(ledger, &events, is_known).await;
        Ok(Some(EventBatch {
            from,
            to: current,
            clear,
            events,
            attributes,
        }))
    }

    /// Apply a replay batch and move the watermark to its upper bound.
    pub fn apply_replay(&mut self, batch: EventBatch, replica: Replica<'_>) -> ApplyReport {
        let Replica {
            store,
            selection,
            roster,
        } = replica;
        let mut report = ApplyReport::new(batch.from, batch.to);

        for event in &batch.events {
            if let EventPayload::ObjectDeleted { object } = event.payload {
                if store.delete(object) {
                    report.deleted += 1;
                }
            }
        }

        for stream in EventStream::CREATION {
            for event in batch.events.iter().filter(|e| e.payload.stream() == stream) {
                if insert_created(store, event, &batch.attributes) {
                    report.inserted += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        for event in &batch.events {
            match event.payload {
                EventPayload::ObjectMoved { .. }
                | EventPayload::ObjectResized { .. }
                | EventPayload::ContentUpdated { .. } => {
                    if apply_update(store, &event.payload) {
                        report.updated += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                _ => {}
            }
        }

        roster.clear();
        for event in &batch.events {
            if event.origin != self.local {
                apply_roster(roster, event);
            }
        }

        selection.prune(store);
        self.watermark = Some(batch.to);
        log::info!(
            "Replayed {}..={}: {} objects, {} tombstoned, {} updates, {} skipped, {} participants",
            report.from,
            report.to,
            report.inserted,
            report.deleted,
            report.updated,
            report.skipped,
            roster.len()
        );
        report
    }

    /// Apply a catch-up batch and advance the watermark.
    pub fn apply_catch_up(&mut self, batch: EventBatch, replica: Replica<'_>) -> ApplyReport {
        let Replica {
            store,
            selection,
            roster,
        } = replica;
        let mut report = ApplyReport::new(batch.from, batch.to);

        if let Some(clear) = &batch.clear {
            if clear.origin != self.local {
                log::info!("Board cleared by {} at checkpoint {}", clear.origin, clear.checkpoint);
                store.clear();
                selection.reset();
                report.cleared = true;
            }
        }

        for event in &batch.events {
            match &event.payload {
                EventPayload::StrokePoints { .. }
                | EventPayload::ShapeGeometry { .. }
                | EventPayload::StickyNoteData { .. }
                | EventPayload::TextData { .. } => {
                    if insert_created(store, event, &batch.attributes) {
                        report.inserted += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                EventPayload::ObjectDeleted { object } => {
                    if store.delete(*object) {
                        report.deleted += 1;
                    }
                }
                EventPayload::ObjectCreated { .. } | EventPayload::CanvasCleared => {}
                payload if payload.object().is_some() => {
                    if apply_update(store, payload) {
                        report.updated += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
                _ => apply_roster(roster, event),
            }
        }

        selection.prune(store);
        self.watermark = Some(batch.to);
        if report.changed() {
            log::info!(
                "Caught up {}..={}: +{} ~{} -{} ({} skipped)",
                report.from,
                report.to,
                report.inserted,
                report.updated,
                report.deleted,
                report.skipped
            );
        } else {
            log::debug!("Caught up {}..={}: no changes", report.from, report.to);
        }
        report
    }
}

/// Drop object events positioned before `cut`.
fn void_before(events: &mut Vec<LedgerEvent>, cut: (Checkpoint, u32)) {
    events.retain(|e| e.payload.object().is_none() || e.position() > cut);
}

/// Look up attributes for every creation in `events` that is neither known
/// locally nor deleted within the batch. A failed lookup skips that object.
async fn lookup_attributes<L, F>(ledger: &L, events: &[LedgerEvent], is_known: F) -> HashMap<ObjectId, ObjectAttributes>
where
    L: Ledger + ?Sized,
    F: Fn(ObjectId) -> bool,
{
    let deleted: HashSet<ObjectId> = events
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::ObjectDeleted { object } => Some(object),
            _ => None,
        })
        .collect();

    let mut wanted: Vec<ObjectId> = events
        .iter()
        .filter(|e| EventStream::CREATION.contains(&e.payload.stream()))
        .filter_map(|e| e.payload.object())
        .filter(|id| !deleted.contains(id) && !is_known(*id))
        .collect();
    wanted.sort_unstable();
    wanted.dedup();

    let mut attributes = HashMap::with_capacity(wanted.len());
    for id in wanted {
        match ledger.object_attributes(id).await {
            Ok(attrs) => {
                attributes.insert(id, attrs);
            }
            Err(e) => log::warn!("Skipping object {}: attribute lookup failed: {}", id, e),
        }
    }
    attributes
}

/// Insert the object a creation event describes. Skips (returns false) ids
/// that are present, tombstoned, unresolved or deleted upstream.
fn insert_created(store: &mut ObjectStore, event: &LedgerEvent, attributes: &HashMap<ObjectId, ObjectAttributes>) -> bool {
    let Some(id) = event.payload.object() else {
        return false;
    };
    if store.contains(id) || store.is_tombstoned(id) {
        log::debug!("Skipping creation of {}: already known", id);
        return false;
    }
    let Some(attrs) = attributes.get(&id) else {
        return false;
    };
    if attrs.deleted {
        log::debug!("Skipping creation of {}: deleted on the ledger", id);
        return false;
    }
    match materialize(&event.payload, id, attrs) {
        Some(object) => store.add(object),
        None => {
            log::warn!("Skipping creation of {}: {:?} event for a {:?}", id, event.payload.stream(), attrs.kind);
            false
        }
    }
}

/// Build an object from its creation event plus authoritative attributes.
fn materialize(payload: &EventPayload, id: ObjectId, attrs: &ObjectAttributes) -> Option<DrawableObject> {
    let style = ObjectStyle {
        color_index: attrs.color_index,
        stroke_width: attrs.stroke_width,
    };
    let (bounds, body) = match payload {
        EventPayload::StrokePoints { points, .. } if attrs.kind == ObjectKind::Stroke => {
            let points = geometry::points_from_flat(points);
            if points.is_empty() {
                return None;
            }
            (Rect::ZERO, ObjectBody::Stroke { points })
        }
        EventPayload::ShapeGeometry {
            x,
            y,
            width,
            height,
            rotation,
            ..
        } => (
            box_at(*x, *y, *width, *height),
            ObjectBody::geometric(attrs.kind, *rotation)?,
        ),
        EventPayload::StickyNoteData {
            x,
            y,
            width,
            height,
            content,
            background,
            ..
        } if attrs.kind == ObjectKind::StickyNote => (
            box_at(*x, *y, *width, *height),
            ObjectBody::StickyNote {
                content: content.clone(),
                background: *background,
            },
        ),
        EventPayload::TextData {
            x,
            y,
            content,
            font_size,
            ..
        } if attrs.kind == ObjectKind::Text => (
            text_bounds(point(*x, *y), *font_size),
            ObjectBody::Text {
                content: content.clone(),
                font_size: *font_size,
            },
        ),
        _ => return None,
    };

    let mut object = DrawableObject::new(id, attrs.creator.clone(), attrs.layer, bounds, style, body);
    object.locked = attrs.locked;
    Some(object)
}

/// Apply a move, resize, content, layer or lock event to a live object.
/// Events for objects not present locally are skipped.
fn apply_update(store: &mut ObjectStore, payload: &EventPayload) -> bool {
    match payload {
        EventPayload::ObjectMoved { object, x, y } => {
            // Relative to where the object is now, so successive moves compose.
            let Some(current) = store.get(*object).map(DrawableObject::bounds) else {
                return false;
            };
            let delta: Vec2 = point(*x, *y) - current.origin();
            store.translate(*object, delta)
        }
        EventPayload::ObjectResized { object, width, height } => {
            let Some(current) = store.get(*object).map(DrawableObject::bounds) else {
                return false;
            };
            let bounds = Rect::from_origin_size(current.origin(), (f64::from(*width), f64::from(*height)));
            store.update(*object, ObjectPatch::bounds(bounds))
        }
        EventPayload::ContentUpdated { object, content } => store.update(*object, ObjectPatch::content(content.clone())),
        EventPayload::LayerChanged { object, new_layer, .. } => store.update(*object, ObjectPatch::layer(*new_layer)),
        EventPayload::LockToggled { object, locked } => store.update(*object, ObjectPatch::locked(*locked)),
        _ => false,
    }
}

fn apply_roster(roster: &mut Roster, event: &LedgerEvent) {
    let origin = &event.origin;
    match &event.payload {
        EventPayload::UserJoined { nickname } => roster.join(origin.clone(), nickname.clone()),
        EventPayload::UserLeft => {
            roster.leave(origin);
        }
        EventPayload::NicknameUpdated { nickname } => {
            roster.rename(origin, nickname.clone());
        }
        EventPayload::CursorMoved { x, y } => {
            roster.move_cursor(origin, point(*x, *y));
        }
        _ => {}
    }
}

fn point(x: i32, y: i32) -> Point {
    Point::new(f64::from(x), f64::from(y))
}

fn box_at(x: i32, y: i32, width: u32, height: u32) -> Rect {
    Rect::from_origin_size(point(x, y), (f64::from(width), f64::from(height)))
}
