//! Chainboard Core Library
//!
//! Object state synchronization for a collaborative board whose
//! authoritative state lives in an append-only ledger event log.

pub mod board;
pub mod config;
pub mod events;
pub mod geometry;
pub mod ledger;
pub mod object;
pub mod reconcile;
pub mod roster;
pub mod selection;
pub mod store;

pub use board::{Board, BoardError, BoardResult, PollHandle};
pub use config::{BoardConfig, ConfigError, DEFAULT_POLL_INTERVAL_MS};
pub use events::{ApplyReport, EventBatch, EventReconciler};
pub use ledger::{Checkpoint, Command, EventPayload, EventStream, Ledger, LedgerError, LedgerEvent, MemoryLedger, ObjectAttributes, Receipt};
pub use object::{DrawableObject, ObjectBody, ObjectDraft, ObjectId, ObjectKind, ObjectPatch, ObjectStyle, ParticipantId};
pub use reconcile::{remap, Remap};
pub use roster::{Participant, Roster};
pub use selection::{Handle, Selection, TransformMode, TransformOutcome};
pub use store::ObjectStore;
