//! Boundary to the external ledger that holds the authoritative event log.
//!
//! The ledger is append-only and eventually delivered. It is addressed by
//! checkpoints (monotonically increasing positions, e.g. block heights) and
//! offers per-stream event queries over an inclusive checkpoint range, a
//! point-in-time attribute lookup by canonical id, and command submission.

mod memory;

pub use memory::MemoryLedger;

use crate::object::{ObjectId, ObjectKind, ParticipantId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Position in the ledger's event log.
pub type Checkpoint = u64;

/// Ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
    #[error("Command rejected: {0}")]
    Rejected(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Boxed future returned by [`Ledger`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The per-kind event filters the ledger can be queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStream {
    ObjectCreated,
    StrokePoints,
    ShapeGeometry,
    StickyNoteData,
    TextData,
    ObjectMoved,
    ObjectResized,
    ObjectDeleted,
    LayerChanged,
    ContentUpdated,
    LockToggled,
    UserJoined,
    UserLeft,
    NicknameUpdated,
    CanvasCleared,
    CursorMoved,
}

impl EventStream {
    /// Streams carrying the data that first materializes an object.
    pub const CREATION: [EventStream; 4] = [
        EventStream::StrokePoints,
        EventStream::ShapeGeometry,
        EventStream::StickyNoteData,
        EventStream::TextData,
    ];

    pub const ALL: [EventStream; 16] = [
        EventStream::ObjectCreated,
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
}

/// Event data as recorded by the ledger. Coordinates are integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    ObjectCreated {
        object: ObjectId,
        kind: ObjectKind,
        color_index: u8,
        stroke_width: u8,
        layer: u32,
    },
    StrokePoints {
        object: ObjectId,
        /// Flat `[x0, y0, x1, y1, ...]`.
        points: Vec<i32>,
    },
    ShapeGeometry {
        object: ObjectId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rotation: u16,
    },
    StickyNoteData {
        object: ObjectId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        content: String,
        background: u8,
    },
    TextData {
        object: ObjectId,
        x: i32,
        y: i32,
        content: String,
        font_size: u8,
    },
    ObjectMoved {
        object: ObjectId,
        x: i32,
        y: i32,
    },
    ObjectResized {
        object: ObjectId,
        width: u32,
        height: u32,
    },
    ObjectDeleted {
        object: ObjectId,
    },
    LayerChanged {
        object: ObjectId,
        old_layer: u32,
        new_layer: u32,
    },
    ContentUpdated {
        object: ObjectId,
        content: String,
    },
    LockToggled {
        object: ObjectId,
        locked: bool,
    },
    UserJoined {
        nickname: String,
    },
    UserLeft,
    NicknameUpdated {
        nickname: String,
    },
    CanvasCleared,
    CursorMoved {
        x: i32,
        y: i32,
    },
}

impl EventPayload {
    pub fn stream(&self) -> EventStream {
        match self {
            EventPayload::ObjectCreated { .. } => EventStream::ObjectCreated,
            EventPayload::StrokePoints { .. } => EventStream::StrokePoints,
            EventPayload::ShapeGeometry { .. } => EventStream::ShapeGeometry,
            EventPayload::StickyNoteData { .. } => EventStream::StickyNoteData,
            EventPayload::TextData { .. } => EventStream::TextData,
            EventPayload::ObjectMoved { .. } => EventStream::ObjectMoved,
            EventPayload::ObjectResized { .. } => EventStream::ObjectResized,
            EventPayload::ObjectDeleted { .. } => EventStream::ObjectDeleted,
            EventPayload::LayerChanged { .. } => EventStream::LayerChanged,
            EventPayload::ContentUpdated { .. } => EventStream::ContentUpdated,
            EventPayload::LockToggled { .. } => EventStream::LockToggled,
            EventPayload::UserJoined { .. } => EventStream::UserJoined,
            EventPayload::UserLeft => EventStream::UserLeft,
            EventPayload::NicknameUpdated { .. } => EventStream::NicknameUpdated,
            EventPayload::CanvasCleared => EventStream::CanvasCleared,
            EventPayload::CursorMoved { .. } => EventStream::CursorMoved,
        }
    }

    /// The object an event refers to, if any.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            EventPayload::ObjectCreated { object, .. }
            | EventPayload::StrokePoints { object, .. }
            | EventPayload::ShapeGeometry { object, .. }
            | EventPayload::StickyNoteData { object, .. }
            | EventPayload::TextData { object, .. }
            | EventPayload::ObjectMoved { object, .. }
            | EventPayload::ObjectResized { object, .. }
            | EventPayload::ObjectDeleted { object }
            | EventPayload::LayerChanged { object, .. }
            | EventPayload::ContentUpdated { object, .. }
            | EventPayload::LockToggled { object, .. } => Some(*object),
            EventPayload::UserJoined { .. }
            | EventPayload::UserLeft
            | EventPayload::NicknameUpdated { .. }
            | EventPayload::CanvasCleared
            | EventPayload::CursorMoved { .. } => None,
        }
    }
}

/// One record of the ledger's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub checkpoint: Checkpoint,
    /// Position within the checkpoint.
    pub index: u32,
    /// Participant whose command produced the event.
    pub origin: ParticipantId,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl LedgerEvent {
    /// Total order key of the event in the log.
    pub fn position(&self) -> (Checkpoint, u32) {
        (self.checkpoint, self.index)
    }
}

/// Point-in-time authoritative attributes of a canonical object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    pub creator: ParticipantId,
    pub kind: ObjectKind,
    pub color_index: u8,
    pub stroke_width: u8,
    pub layer: u32,
    pub locked: bool,
    pub deleted: bool,
}

/// Commands accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CreateStroke {
        points: Vec<i32>,
        color_index: u8,
        stroke_width: u8,
    },
    CreateShape {
        kind: ObjectKind,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rotation: u16,
        color_index: u8,
        stroke_width: u8,
    },
    CreateStickyNote {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        content: String,
        background: u8,
    },
    CreateText {
        x: i32,
        y: i32,
        content: String,
        color_index: u8,
        font_size: u8,
    },
    Move {
        object: ObjectId,
        x: i32,
        y: i32,
    },
    Resize {
        object: ObjectId,
        width: u32,
        height: u32,
    },
    Delete {
        object: ObjectId,
    },
    UpdateContent {
        object: ObjectId,
        content: String,
    },
    BringToFront {
        object: ObjectId,
    },
    SendToBack {
        object: ObjectId,
    },
    ToggleLock {
        object: ObjectId,
    },
    Clear,
    MoveCursor {
        x: i32,
        y: i32,
    },
    Join {
        nickname: String,
    },
    Leave,
    UpdateNickname {
        nickname: String,
    },
}

impl Command {
    /// Whether this command creates an object (and so yields a canonical id).
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Command::CreateStroke { .. }
                | Command::CreateShape { .. }
                | Command::CreateStickyNote { .. }
                | Command::CreateText { .. }
        )
    }
}

/// Confirmation of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub checkpoint: Checkpoint,
    /// Canonical id assigned by a create command.
    pub created: Option<ObjectId>,
}

/// The ledger collaborator.
///
/// Implementations must be `Send + Sync` so the poller can run on a
/// background task.
pub trait Ledger: Send + Sync {
    /// Latest checkpoint with delivered events.
    fn current_checkpoint(&self) -> BoxFuture<'_, LedgerResult<Checkpoint>>;

    /// Events of one stream within `from..=to`, in log order.
    fn query_events(
        &self,
        stream: EventStream,
        from: Checkpoint,
        to: Checkpoint,
    ) -> BoxFuture<'_, LedgerResult<Vec<LedgerEvent>>>;

    /// Authoritative attributes of a canonical object.
    fn object_attributes(&self, id: ObjectId) -> BoxFuture<'_, LedgerResult<ObjectAttributes>>;

    /// Submit a command signed by this ledger handle's participant.
    fn submit(&self, command: Command) -> BoxFuture<'_, LedgerResult<Receipt>>;
}
