//! In-memory ledger for tests and the local devnet node.

use super::{
    BoxFuture, Checkpoint, Command, EventPayload, EventStream, Ledger, LedgerError, LedgerEvent,
    LedgerResult, ObjectAttributes, Receipt,
};
use crate::object::{ObjectId, ObjectKind, ParticipantId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Chain {
    events: Vec<LedgerEvent>,
    /// Latest checkpoint; 0 is the empty genesis checkpoint.
    checkpoint: Checkpoint,
    /// Object attributes indexed by canonical id.
    objects: Vec<ObjectAttributes>,
    top_layer: u32,
    offline: bool,
    failing_lookups: HashSet<ObjectId>,
}

impl Chain {
    fn attributes_mut(&mut self, id: ObjectId) -> LedgerResult<&mut ObjectAttributes> {
        usize::try_from(id.0)
            .ok()
            .and_then(|index| self.objects.get_mut(index))
            .filter(|attrs| !attrs.deleted)
            .ok_or(LedgerError::UnknownObject(id))
    }

    fn unlocked_mut(&mut self, id: ObjectId) -> LedgerResult<&mut ObjectAttributes> {
        let attrs = self.attributes_mut(id)?;
        if attrs.locked {
            return Err(LedgerError::Rejected(format!("object {id} is locked")));
        }
        Ok(attrs)
    }

    fn register(&mut self, creator: &ParticipantId, kind: ObjectKind, color_index: u8, stroke_width: u8) -> (ObjectId, u32) {
        let id = ObjectId(self.objects.len() as i64);
        self.top_layer = self.top_layer.saturating_add(1);
        let layer = self.top_layer;
        self.objects.push(ObjectAttributes {
            creator: creator.clone(),
            kind,
            color_index,
            stroke_width,
            layer,
            locked: false,
            deleted: false,
        });
        (id, layer)
    }

    /// Validate and apply a command, producing the payloads it emits.
    fn execute(&mut self, signer: &ParticipantId, command: Command) -> LedgerResult<(Option<ObjectId>, Vec<EventPayload>)> {
        let created = |id, kind, color_index, stroke_width, layer| EventPayload::ObjectCreated {
            object: id,
            kind,
            color_index,
            stroke_width,
            layer,
        };

        let result = match command {
            Command::CreateStroke {
                points,
                color_index,
                stroke_width,
            } => {
                if points.len() < 2 {
                    return Err(LedgerError::Rejected("stroke needs at least one point".into()));
                }
                let (id, layer) = self.register(signer, ObjectKind::Stroke, color_index, stroke_width);
                (
                    Some(id),
                    vec![
                        created(id, ObjectKind::Stroke, color_index, stroke_width, layer),
                        EventPayload::StrokePoints { object: id, points },
                    ],
                )
            }
            Command::CreateShape {
                kind,
                x,
                y,
                width,
                height,
                rotation,
                color_index,
                stroke_width,
            } => {
                if !kind.is_geometric_shape() {
                    return Err(LedgerError::Rejected(format!("{kind:?} is not a shape kind")));
                }
                let (id, layer) = self.register(signer, kind, color_index, stroke_width);
                (
                    Some(id),
                    vec![
                        created(id, kind, color_index, stroke_width, layer),
                        EventPayload::ShapeGeometry {
                            object: id,
                            x,
                            y,
                            width,
                            height,
                            rotation,
                        },
                    ],
                )
            }
            Command::CreateStickyNote {
                x,
                y,
                width,
                height,
                content,
                background,
            } => {
                let (id, layer) = self.register(signer, ObjectKind::StickyNote, 0, 0);
                (
                    Some(id),
                    vec![
                        created(id, ObjectKind::StickyNote, 0, 0, layer),
                        EventPayload::StickyNoteData {
                            object: id,
                            x,
                            y,
                            width,
                            height,
                            content,
                            background,
                        },
                    ],
                )
            }
            Command::CreateText {
                x,
                y,
                content,
                color_index,
                font_size,
            } => {
                let (id, layer) = self.register(signer, ObjectKind::Text, color_index, font_size);
                (
                    Some(id),
                    vec![
                        created(id, ObjectKind::Text, color_index, font_size, layer),
                        EventPayload::TextData {
                            object: id,
                            x,
                            y,
                            content,
                            font_size,
                        },
                    ],
                )
            }
            Command::Move { object, x, y } => {
                self.unlocked_mut(object)?;
                (None, vec![EventPayload::ObjectMoved { object, x, y }])
            }
            Command::Resize { object, width, height } => {
                self.unlocked_mut(object)?;
                (None, vec![EventPayload::ObjectResized { object, width, height }])
            }
            Command::Delete { object } => {
                self.attributes_mut(object)?.deleted = true;
                (None, vec![EventPayload::ObjectDeleted { object }])
            }
            Command::UpdateContent { object, content } => {
                let attrs = self.unlocked_mut(object)?;
                if !matches!(attrs.kind, ObjectKind::StickyNote | ObjectKind::Text) {
                    return Err(LedgerError::Rejected(format!("object {object} has no content")));
                }
                (None, vec![EventPayload::ContentUpdated { object, content }])
            }
            Command::BringToFront { object } => {
                self.attributes_mut(object)?;
                self.top_layer = self.top_layer.saturating_add(1);
                let new_layer = self.top_layer;
                let attrs = self.attributes_mut(object)?;
                let old_layer = std::mem::replace(&mut attrs.layer, new_layer);
                (None, vec![EventPayload::LayerChanged { object, old_layer, new_layer }])
            }
            Command::SendToBack { object } => {
                let attrs = self.attributes_mut(object)?;
                let old_layer = std::mem::replace(&mut attrs.layer, 0);
                (
                    None,
                    vec![EventPayload::LayerChanged {
                        object,
                        old_layer,
                        new_layer: 0,
                    }],
                )
            }
            Command::ToggleLock { object } => {
                let attrs = self.attributes_mut(object)?;
                attrs.locked = !attrs.locked;
                let locked = attrs.locked;
                (None, vec![EventPayload::LockToggled { object, locked }])
            }
            Command::Clear => {
                for attrs in &mut self.objects {
                    attrs.deleted = true;
                }
                (None, vec![EventPayload::CanvasCleared])
            }
            Command::MoveCursor { x, y } => (None, vec![EventPayload::CursorMoved { x, y }]),
            Command::Join { nickname } => (None, vec![EventPayload::UserJoined { nickname }]),
            Command::Leave => (None, vec![EventPayload::UserLeft]),
            Command::UpdateNickname { nickname } => (None, vec![EventPayload::NicknameUpdated { nickname }]),
        };
        Ok(result)
    }
}

/// An append-only in-memory event log implementing [`Ledger`].
///
/// Every submitted command is sealed into its own checkpoint. Clones share
/// the same log; [`MemoryLedger::with_signer`] gives a handle that submits
/// as a different participant.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    chain: Arc<Mutex<Chain>>,
    signer: ParticipantId,
}

impl MemoryLedger {
    /// Create an empty log whose commands are signed by `signer`.
    pub fn new(signer: impl Into<ParticipantId>) -> Self {
        Self {
            chain: Arc::new(Mutex::new(Chain::default())),
            signer: signer.into(),
        }
    }

    /// Handle on the same log signing as `signer`.
    pub fn with_signer(&self, signer: impl Into<ParticipantId>) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            signer: signer.into(),
        }
    }

    pub fn signer(&self) -> &ParticipantId {
        &self.signer
    }

    /// Make every call fail with [`LedgerError::Unavailable`] until reset.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut chain) = self.chain.lock() {
            chain.offline = offline;
        }
    }

    /// Make attribute lookups of `id` fail.
    pub fn fail_lookup(&self, id: ObjectId) {
        if let Ok(mut chain) = self.chain.lock() {
            chain.failing_lookups.insert(id);
        }
    }

    /// Number of events in the log.
    pub fn event_count(&self) -> usize {
        self.chain.lock().map(|c| c.events.len()).unwrap_or(0)
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Chain>> {
        let chain = self
            .chain
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("Lock error: {}", e)))?;
        if chain.offline {
            return Err(LedgerError::Unavailable("ledger offline".into()));
        }
        Ok(chain)
    }

    fn submit_sync(&self, command: Command) -> LedgerResult<Receipt> {
        let mut chain = self.lock()?;
        let (created, payloads) = chain.execute(&self.signer, command)?;

        chain.checkpoint += 1;
        let checkpoint = chain.checkpoint;
        for (index, payload) in payloads.into_iter().enumerate() {
            chain.events.push(LedgerEvent {
                checkpoint,
                index: index as u32,
                origin: self.signer.clone(),
                payload,
            });
        }
        log::debug!("Sealed checkpoint {} from {}", checkpoint, self.signer);
        Ok(Receipt { checkpoint, created })
    }
}

impl Ledger for MemoryLedger {
    fn current_checkpoint(&self) -> BoxFuture<'_, LedgerResult<Checkpoint>> {
        Box::pin(async move { Ok(self.lock()?.checkpoint) })
    }

    fn query_events(
        &self,
        stream: EventStream,
        from: Checkpoint,
        to: Checkpoint,
    ) -> BoxFuture<'_, LedgerResult<Vec<LedgerEvent>>> {
        Box::pin(async move {
            let chain = self.lock()?;
            Ok(chain
                .events
                .iter()
                .filter(|e| (from..=to).contains(&e.checkpoint) && e.payload.stream() == stream)
                .cloned()
                .collect())
        })
    }

    fn object_attributes(&self, id: ObjectId) -> BoxFuture<'_, LedgerResult<ObjectAttributes>> {
        Box::pin(async move {
            let chain = self.lock()?;
            if chain.failing_lookups.contains(&id) {
                return Err(LedgerError::Unavailable(format!("lookup of {id} failed")));
            }
            usize::try_from(id.0)
                .ok()
                .and_then(|index| chain.objects.get(index))
                .cloned()
                .ok_or(LedgerError::UnknownObject(id))
        })
    }

    fn submit(&self, command: Command) -> BoxFuture<'_, LedgerResult<Receipt>> {
        Box::pin(async move { self.submit_sync(command) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(x: i32, y: i32) -> Command {
        Command::CreateShape {
            kind: ObjectKind::Rectangle,
            x,
            y,
            width: 10,
            height: 10,
            rotation: 0,
            color_index: 1,
            stroke_width: 2,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids_and_layers() {
        let ledger = MemoryLedger::new("0xalice");
        let first = ledger.submit(shape(0, 0)).await.unwrap();
        let second = ledger.submit(shape(5, 5)).await.unwrap();
        assert_eq!(first.created, Some(ObjectId(0)));
        assert_eq!(second.created, Some(ObjectId(1)));
        assert_eq!(second.checkpoint, 2);

        let attrs = ledger.object_attributes(ObjectId(1)).await.unwrap();
        assert_eq!(attrs.layer, 2);
        assert_eq!(attrs.creator, ParticipantId::new("0xALICE"));
    }

    #[tokio::test]
    async fn test_query_filters_by_stream_and_range() {
        let ledger = MemoryLedger::new("0xalice");
        ledger.submit(shape(0, 0)).await.unwrap();
        ledger.submit(Command::Move { object: ObjectId(0), x: 3, y: 4 }).await.unwrap();
        ledger.submit(Command::Move { object: ObjectId(0), x: 5, y: 6 }).await.unwrap();

        let moves = ledger.query_events(EventStream::ObjectMoved, 0, 2).await.unwrap();
        assert_eq!(moves.len(), 1);
        let all = ledger.query_events(EventStream::ObjectMoved, 0, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        let created = ledger.query_events(EventStream::ObjectCreated, 2, 3).await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_signer_recorded_as_origin() {
        let alice = MemoryLedger::new("0xalice");
        let bob = alice.with_signer("0xbob");
        bob.submit(Command::Join { nickname: "bob".into() }).await.unwrap();
        let joins = alice.query_events(EventStream::UserJoined, 0, 1).await.unwrap();
        assert_eq!(joins[0].origin, ParticipantId::new("0xbob"));
    }

    #[tokio::test]
    async fn test_locked_object_rejects_move() {
        let ledger = MemoryLedger::new("0xalice");
        ledger.submit(shape(0, 0)).await.unwrap();
        ledger.submit(Command::ToggleLock { object: ObjectId(0) }).await.unwrap();
        let err = ledger.submit(Command::Move { object: ObjectId(0), x: 1, y: 1 }).await;
        assert!(matches!(err, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_offline_and_failing_lookup() {
        let ledger = MemoryLedger::new("0xalice");
        ledger.submit(shape(0, 0)).await.unwrap();
        ledger.fail_lookup(ObjectId(0));
        assert!(ledger.object_attributes(ObjectId(0)).await.is_err());

        ledger.set_offline(true);
        assert!(matches!(ledger.current_checkpoint().await, Err(LedgerError::Unavailable(_))));
        ledger.set_offline(false);
        assert_eq!(ledger.current_checkpoint().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deleted_object_keeps_attributes() {
        let ledger = MemoryLedger::new("0xalice");
        ledger.submit(shape(0, 0)).await.unwrap();
        ledger.submit(Command::Delete { object: ObjectId(0) }).await.unwrap();
        assert!(ledger.object_attributes(ObjectId(0)).await.unwrap().deleted);
        assert!(ledger.submit(Command::Delete { object: ObjectId(0) }).await.is_err());
    }

    #[tokio::test]
    async fn test_layers_saturate_at_the_top() {
        let ledger = MemoryLedger::new("0xalice");
        ledger.submit(shape(0, 0)).await.unwrap();
        ledger.chain.lock().unwrap().top_layer = u32::MAX;

        ledger.submit(shape(10, 10)).await.unwrap();
        ledger.submit(Command::BringToFront { object: ObjectId(0) }).await.unwrap();
        assert_eq!(ledger.object_attributes(ObjectId(1)).await.unwrap().layer, u32::MAX);
        assert_eq!(ledger.object_attributes(ObjectId(0)).await.unwrap().layer, u32::MAX);
    }
}
