//! The board facade: one participant's live view of a shared board.
//!
//! Local gestures mutate state synchronously and never wait for the ledger.
//! Ledger I/O (publishing, replay, catch-up) runs on the async side and only
//! takes the state lock for short synchronous sections.

use crate::config::BoardConfig;
use crate::events::{ApplyReport, EventReconciler, Replica};
use crate::geometry;
use crate::ledger::{Command, Ledger, LedgerError};
use crate::object::{DrawableObject, ObjectBody, ObjectDraft, ObjectId, ObjectPatch, ParticipantId};
use crate::reconcile;
use crate::roster::{Participant, Roster};
use crate::selection::{Handle, Selection, TransformMode, TransformOutcome};
use crate::store::ObjectStore;
use kurbo::{Point, Rect};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Board errors.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Unknown object: {0}")]
    UnknownObject(ObjectId),
    #[error("Object {0} has not been confirmed by the ledger")]
    Unconfirmed(ObjectId),
    #[error("Deleting {failed:?} failed: {source}")]
    DeleteFailed {
        failed: Vec<ObjectId>,
        #[source]
        source: LedgerError,
    },
}

/// Result type for board operations.
pub type BoardResult<T> = Result<T, BoardError>;

#[derive(Debug)]
struct BoardState {
    store: ObjectStore,
    selection: Selection,
    roster: Roster,
    /// Bumped whenever the board is emptied locally; a batch fetched under an
    /// older epoch is discarded.
    epoch: u64,
}

impl BoardState {
    fn new(config: &BoardConfig) -> Self {
        Self {
            store: ObjectStore::new(),
            selection: Selection::with_tolerance(config.handle_tolerance),
            roster: Roster::new(),
            epoch: 0,
        }
    }

    fn replica(&mut self) -> Replica<'_> {
        Replica {
            store: &mut self.store,
            selection: &mut self.selection,
            roster: &mut self.roster,
        }
    }

    fn clear_objects(&mut self) {
        self.store.clear();
        self.selection.reset();
        self.epoch += 1;
    }
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    // Mutation never spans an await, so a poisoned state is still consistent.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A participant's view of a board backed by a [`Ledger`].
///
/// Cloning is cheap; clones share state.
pub struct Board<L: Ledger> {
    ledger: Arc<L>,
    local: ParticipantId,
    config: BoardConfig,
    state: Arc<Mutex<BoardState>>,
    reconciler: Arc<tokio::sync::Mutex<EventReconciler>>,
}

impl<L: Ledger> Clone for Board<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            local: self.local.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            reconciler: Arc::clone(&self.reconciler),
        }
    }
}

impl<L: Ledger> Board<L> {
    pub fn new(ledger: L, local: impl Into<ParticipantId>, config: BoardConfig) -> Self {
        let local = local.into();
        Self {
            ledger: Arc::new(ledger),
            state: Arc::new(Mutex::new(BoardState::new(&config))),
            reconciler: Arc::new(tokio::sync::Mutex::new(EventReconciler::new(local.clone()))),
            local,
            config,
        }
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, BoardState> {
        lock(&self.state)
    }

    // ---- Lifecycle ----

    /// Rebuild the board from the ledger's history and announce ourselves.
    ///
    /// The board is reset first; after replay the watermark sits at the
    /// checkpoint the replay read up to.
    pub async fn join(&self, nickname: impl Into<String>) -> BoardResult<ApplyReport> {
        let report = self.replay().await?;
        self.ledger.submit(Command::Join { nickname: nickname.into() }).await?;
        Ok(report)
    }

    /// Reset and run a full replay without announcing a join.
    pub async fn replay(&self) -> BoardResult<ApplyReport> {
        let mut reconciler = self.reconciler.lock().await;
        reconciler.reset();
        let epoch = {
            let mut state = self.lock_state();
            state.clear_objects();
            state.roster.clear();
            state.epoch
        };

        let state = &self.state;
        let batch = reconciler
            .fetch_replay(self.ledger.as_ref(), self.config.replay_from, |id| lock(state).store.is_known(id))
            .await?;

        let mut state = self.lock_state();
        if state.epoch != epoch {
            log::info!("Board reset during replay; discarding {}..={}", batch.from, batch.to);
            return Ok(ApplyReport::default());
        }
        Ok(reconciler.apply_replay(batch, state.replica()))
    }

    /// Run one catch-up pass. Returns `None` when the previous pass is still
    /// running or the ledger has nothing new.
    pub async fn poll_once(&self) -> BoardResult<Option<ApplyReport>> {
        let Ok(mut reconciler) = self.reconciler.try_lock() else {
            log::debug!("Previous poll still running; skipping tick");
            return Ok(None);
        };
        let epoch = self.lock_state().epoch;

        let state = &self.state;
        let Some(batch) = reconciler
            .fetch_catch_up(self.ledger.as_ref(), |id| lock(state).store.is_known(id))
            .await?
        else {
            return Ok(None);
        };

        let mut state = self.lock_state();
        if state.epoch != epoch {
            log::debug!("Board reset during poll; discarding {}..={}", batch.from, batch.to);
            return Ok(None);
        }
        Ok(Some(reconciler.apply_catch_up(batch, state.replica())))
    }

    /// Poll on a fixed interval until the returned handle is stopped or
    /// dropped. Ticks that fall behind are skipped, not queued.
    pub fn spawn_polling(&self) -> PollHandle
    where
        L: 'static,
    {
        let board = self.clone();
        let period = self.config.poll_interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = board.poll_once().await {
                    log::warn!("Poll failed: {}", e);
                }
            }
        });
        log::debug!("Polling every {:?}", period);
        PollHandle { task }
    }

    /// Empty the board locally and forget the watermark. Any in-flight
    /// replay or poll result is discarded.
    pub async fn reset(&self) {
        {
            let mut state = self.lock_state();
            state.clear_objects();
            state.roster.clear();
        }
        self.reconciler.lock().await.reset();
    }

    pub async fn leave(&self) -> BoardResult<()> {
        self.ledger.submit(Command::Leave).await?;
        Ok(())
    }

    pub async fn update_nickname(&self, nickname: impl Into<String>) -> BoardResult<()> {
        self.ledger
            .submit(Command::UpdateNickname { nickname: nickname.into() })
            .await?;
        Ok(())
    }

    // ---- Gestures ----

    /// Start a drag at `point`.
    ///
    /// A handle of the current selection starts a resize; a point inside
    /// the selection starts a move; otherwise the topmost object under the
    /// point is selected and moved. Locked objects are selected but not
    /// transformed.
    pub fn begin_gesture(&self, point: Point, additive: bool) -> TransformMode {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let mode = if let Some(handle) = state.selection.handle_at_point(point) {
            TransformMode::Resizing(handle)
        } else if !additive && state.selection.contains_point(point) {
            TransformMode::Moving
        } else if let Some(id) = state.store.object_at_point(point).map(DrawableObject::id) {
            state.selection.select(&state.store, id, additive);
            TransformMode::Moving
        } else {
            if !additive {
                state.selection.deselect_all();
            }
            return TransformMode::None;
        };

        if state.selection.selected_objects(&state.store).iter().any(|o| o.is_locked()) {
            log::debug!("Selection contains a locked object; not transforming");
            return TransformMode::None;
        }
        if state.selection.begin_transform(&state.store, mode, point) {
            mode
        } else {
            TransformMode::None
        }
    }

    pub fn update_gesture(&self, point: Point) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.selection.update_transform(&mut state.store, point);
    }

    pub fn end_gesture(&self) -> TransformOutcome {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.selection.end_transform(&state.store)
    }

    /// Abandon the drag, e.g. when the pointer leaves the board.
    pub fn cancel_gesture(&self) {
        self.lock_state().selection.cancel_transform();
    }

    pub fn select(&self, id: ObjectId, additive: bool) -> bool {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.selection.select(&state.store, id, additive)
    }

    pub fn deselect_all(&self) {
        self.lock_state().selection.deselect_all();
    }

    // ---- Local creation ----

    /// Add a locally drawn object under a fresh provisional id, on top of
    /// everything else. Returns `None` for an unusable draft.
    pub fn draw(&self, draft: ObjectDraft) -> Option<ObjectId> {
        let mut state = self.lock_state();
        let layer = state.store.top_layer().saturating_add(1);
        let id = state.store.generate_provisional_id();
        let object = draft.into_object(id, self.local.clone(), layer)?;
        state.store.add(object).then_some(id)
    }

    /// Submit the create command for a provisional object and re-key it
    /// once the ledger assigns its canonical id.
    ///
    /// On failure the object stays provisional and can be published again.
    pub async fn publish(&self, provisional: ObjectId) -> BoardResult<ObjectId> {
        if provisional.is_canonical() {
            return Ok(provisional);
        }
        let command = {
            let state = self.lock_state();
            let object = state.store.get(provisional).ok_or(BoardError::UnknownObject(provisional))?;
            create_command(object)
        };

        let receipt = self.ledger.submit(command).await.inspect_err(|e| {
            log::warn!("Publishing {} failed: {}", provisional, e);
        })?;
        let canonical = receipt
            .created
            .ok_or_else(|| LedgerError::Rejected("create confirmed without an object id".into()))?;

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let outcome = reconcile::remap(&mut state.store, &mut state.selection, provisional, canonical);
        log::debug!("Published {} as {} ({:?})", provisional, canonical, outcome);
        Ok(canonical)
    }

    // ---- Commits ----

    /// Submit the confirmations for a finished transform: a move for every
    /// object, plus a resize after a resize drag. Provisional objects are
    /// skipped; their current geometry goes out when they are published.
    /// Returns the number of commands submitted.
    pub async fn commit_transform(&self, outcome: &TransformOutcome) -> BoardResult<usize> {
        let resize = matches!(outcome.mode, TransformMode::Resizing(_));
        let mut submitted = 0;
        for object in &outcome.objects {
            let id = object.id();
            if id.is_provisional() {
                log::debug!("Not committing transform of unpublished {}", id);
                continue;
            }
            let bounds = object.bounds();
            let (x, y) = round_point(bounds.origin());
            self.ledger.submit(Command::Move { object: id, x, y }).await?;
            submitted += 1;
            if resize {
                let (width, height) = round_size(bounds);
                self.ledger.submit(Command::Resize { object: id, width, height }).await?;
                submitted += 1;
            }
        }
        Ok(submitted)
    }

    /// Delete the selection locally, then tell the ledger about the
    /// confirmed ones.
    ///
    /// Every confirmed id is submitted even if an earlier one fails. The
    /// local deletes stand either way; [`BoardError::DeleteFailed`] names the
    /// ids the ledger did not accept, along with the first error.
    pub async fn delete_selected(&self) -> BoardResult<Vec<ObjectId>> {
        let removed: Vec<ObjectId> = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let ids: Vec<ObjectId> = state.selection.selected_ids().collect();
            for &id in &ids {
                state.store.delete(id);
            }
            state.selection.reset();
            ids
        };
        let mut failed = Vec::new();
        let mut first_error = None;
        for &id in removed.iter().filter(|id| id.is_canonical()) {
            if let Err(e) = self.ledger.submit(Command::Delete { object: id }).await {
                log::warn!("Deleting {} failed: {}", id, e);
                failed.push(id);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(source) => Err(BoardError::DeleteFailed { failed, source }),
            None => Ok(removed),
        }
    }

    /// Edit the text of a sticky note or text object.
    pub async fn update_content(&self, id: ObjectId, content: impl Into<String>) -> BoardResult<()> {
        let content = content.into();
        {
            let mut state = self.lock_state();
            if state.store.get(id).and_then(DrawableObject::content).is_none() {
                return Err(BoardError::UnknownObject(id));
            }
            state.store.update(id, ObjectPatch::content(content.clone()));
        }
        if id.is_canonical() {
            self.ledger.submit(Command::UpdateContent { object: id, content }).await?;
        }
        Ok(())
    }

    pub async fn bring_to_front(&self, id: ObjectId) -> BoardResult<()> {
        self.restack(id, Command::BringToFront { object: id }).await
    }

    pub async fn send_to_back(&self, id: ObjectId) -> BoardResult<()> {
        self.restack(id, Command::SendToBack { object: id }).await
    }

    pub async fn toggle_lock(&self, id: ObjectId) -> BoardResult<bool> {
        self.require_confirmed(id)?;
        self.ledger.submit(Command::ToggleLock { object: id }).await?;
        let attrs = self.ledger.object_attributes(id).await?;
        self.lock_state().store.update(id, ObjectPatch::locked(attrs.locked));
        Ok(attrs.locked)
    }

    /// Layers are assigned by the ledger, so the local copy adopts whatever
    /// layer it reports after the command lands.
    async fn restack(&self, id: ObjectId, command: Command) -> BoardResult<()> {
        self.require_confirmed(id)?;
        self.ledger.submit(command).await?;
        let attrs = self.ledger.object_attributes(id).await?;
        self.lock_state().store.update(id, ObjectPatch::layer(attrs.layer));
        Ok(())
    }

    fn require_confirmed(&self, id: ObjectId) -> BoardResult<()> {
        if !self.lock_state().store.contains(id) {
            return Err(BoardError::UnknownObject(id));
        }
        if id.is_provisional() {
            return Err(BoardError::Unconfirmed(id));
        }
        Ok(())
    }

    /// Clear the board for everyone. The local board is emptied even if the
    /// submission fails.
    ///
    /// Polls are skipped until the clear lands, so nothing applied after the
    /// clear on the ledger is wiped by the local clear.
    pub async fn clear(&self) -> BoardResult<()> {
        let _reconciler = self.reconciler.lock().await;
        let result = self.ledger.submit(Command::Clear).await;
        self.lock_state().clear_objects();
        result?;
        Ok(())
    }

    pub async fn move_cursor(&self, point: Point) -> BoardResult<()> {
        let (x, y) = round_point(point);
        self.ledger.submit(Command::MoveCursor { x, y }).await?;
        Ok(())
    }

    // ---- Read side ----

    /// Snapshot of every object, back to front.
    pub fn objects_in_layer_order(&self) -> Vec<DrawableObject> {
        self.lock_state().store.objects_in_layer_order().cloned().collect()
    }

    pub fn object(&self, id: ObjectId) -> Option<DrawableObject> {
        self.lock_state().store.get(id).cloned()
    }

    pub fn selected_ids(&self) -> Vec<ObjectId> {
        self.lock_state().selection.selected_ids().collect()
    }

    pub fn selection_bounding_box(&self) -> Option<Rect> {
        self.lock_state().selection.bounding_box()
    }

    pub fn handle_positions(&self) -> Vec<(Handle, Point)> {
        self.lock_state().selection.handle_positions()
    }

    pub fn transform_mode(&self) -> TransformMode {
        self.lock_state().selection.mode()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.lock_state().roster.participants().cloned().collect()
    }

    pub async fn watermark(&self) -> Option<u64> {
        self.reconciler.lock().await.watermark()
    }
}

/// Background polling task started by [`Board::spawn_polling`].
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct PollHandle {
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn round_point(point: Point) -> (i32, i32) {
    (point.x.round() as i32, point.y.round() as i32)
}

fn round_size(bounds: Rect) -> (u32, u32) {
    (bounds.width().round() as u32, bounds.height().round() as u32)
}

/// The ledger command that recreates `object` as it currently is.
fn create_command(object: &DrawableObject) -> Command {
    let bounds = object.bounds();
    let (x, y) = round_point(bounds.origin());
    let (width, height) = round_size(bounds);
    let style = object.style();
    match object.body() {
        ObjectBody::Stroke { points } => Command::CreateStroke {
            points: geometry::points_to_flat(points),
            color_index: style.color_index,
            stroke_width: style.stroke_width,
        },
        ObjectBody::Rectangle { rotation }
        | ObjectBody::Ellipse { rotation }
        | ObjectBody::Line { rotation }
        | ObjectBody::Arrow { rotation } => Command::CreateShape {
            kind: object.kind(),
            x,
            y,
            width,
            height,
            rotation: *rotation,
            color_index: style.color_index,
            stroke_width: style.stroke_width,
        },
        ObjectBody::StickyNote { content, background } => Command::CreateStickyNote {
            x,
            y,
            width,
            height,
            content: content.clone(),
            background: *background,
        },
        ObjectBody::Text { content, font_size } => Command::CreateText {
            x,
            y,
            content: content.clone(),
            color_index: style.color_index,
            font_size: *font_size,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BoxFuture, Checkpoint, EventStream, LedgerEvent, LedgerResult, MemoryLedger, ObjectAttributes, Receipt};
    use crate::object::{ObjectKind, ObjectStyle};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Wraps a [`MemoryLedger`] and parks selected calls until released.
    /// A held `Clear` lands on the chain before it parks, so only its
    /// confirmation is delayed.
    struct GatedLedger {
        inner: MemoryLedger,
        hold_clear: bool,
        hold_queries: Arc<AtomicBool>,
        entered: Arc<Notify>,
        release: Arc<Semaphore>,
    }

    impl GatedLedger {
        fn new(inner: MemoryLedger, hold_clear: bool) -> Self {
            Self {
                inner,
                hold_clear,
                hold_queries: Arc::new(AtomicBool::new(false)),
                entered: Arc::new(Notify::new()),
                release: Arc::new(Semaphore::new(0)),
            }
        }

        async fn park(&self) {
            self.entered.notify_one();
            let _permit = self.release.acquire().await;
        }
    }

    impl Ledger for GatedLedger {
        fn current_checkpoint(&self) -> BoxFuture<'_, LedgerResult<Checkpoint>> {
            self.inner.current_checkpoint()
        }

        fn query_events(
            &self,
            stream: EventStream,
            from: Checkpoint,
            to: Checkpoint,
        ) -> BoxFuture<'_, LedgerResult<Vec<LedgerEvent>>> {
            Box::pin(async move {
                if self.hold_queries.load(Ordering::SeqCst) {
                    self.park().await;
                }
                self.inner.query_events(stream, from, to).await
            })
        }

        fn object_attributes(&self, id: ObjectId) -> BoxFuture<'_, LedgerResult<ObjectAttributes>> {
            self.inner.object_attributes(id)
        }

        fn submit(&self, command: Command) -> BoxFuture<'_, LedgerResult<Receipt>> {
            Box::pin(async move {
                let held = self.hold_clear && matches!(command, Command::Clear);
                let receipt = self.inner.submit(command).await;
                if held {
                    self.park().await;
                }
                receipt
            })
        }
    }

    fn board(ledger: &MemoryLedger, address: &str) -> Board<MemoryLedger> {
        Board::new(ledger.with_signer(address), address, BoardConfig::default())
    }

    fn rect_draft(x: f64, y: f64, w: f64, h: f64) -> ObjectDraft {
        ObjectDraft::Shape {
            kind: ObjectKind::Rectangle,
            bounds: Rect::from_origin_size((x, y), (w, h)),
            style: ObjectStyle {
                color_index: 1,
                stroke_width: 2,
            },
        }
    }

    #[tokio::test]
    async fn test_draw_is_local_until_published() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let id = alice.draw(rect_draft(0.0, 0.0, 40.0, 20.0)).unwrap();
        assert_eq!(id, ObjectId(-1));
        assert_eq!(ledger.event_count(), 0);

        let canonical = alice.publish(id).await.unwrap();
        assert_eq!(canonical, ObjectId(0));
        assert!(alice.object(id).is_none());
        assert_eq!(alice.object(canonical).unwrap().bounds(), Rect::new(0.0, 0.0, 40.0, 20.0));
    }

    #[tokio::test]
    async fn test_publish_keeps_selection() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let id = alice.draw(rect_draft(0.0, 0.0, 40.0, 20.0)).unwrap();
        alice.select(id, false);
        let canonical = alice.publish(id).await.unwrap();
        assert_eq!(alice.selected_ids(), vec![canonical]);
    }

    #[tokio::test]
    async fn test_self_echo_leaves_object_unchanged() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        alice.join("alice").await.unwrap();

        let id = alice.draw(rect_draft(10.0, 10.0, 30.0, 30.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        let before = alice.object(canonical).unwrap();

        alice.poll_once().await.unwrap();
        let objects = alice.objects_in_layer_order();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0], before);
    }

    #[tokio::test]
    async fn test_remote_object_arrives_through_polling() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        alice.join("alice").await.unwrap();
        bob.join("bob").await.unwrap();

        let id = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();

        let report = bob.poll_once().await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);
        let remote = bob.object(canonical).unwrap();
        assert_eq!(remote.creator(), &ParticipantId::new("0xa"));
        assert_eq!(remote.bounds(), Rect::new(0.0, 0.0, 10.0, 10.0));

        let names: Vec<_> = alice.participants().into_iter().map(|p| p.nickname).collect();
        assert!(names.is_empty());
        alice.poll_once().await.unwrap();
        let names: Vec<_> = alice.participants().into_iter().map(|p| p.nickname).collect();
        assert_eq!(names, vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_gesture_commit_reaches_other_participant() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        let id = alice.draw(rect_draft(0.0, 0.0, 20.0, 20.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        bob.join("bob").await.unwrap();

        assert_eq!(alice.begin_gesture(Point::new(10.0, 10.0), false), TransformMode::Moving);
        alice.update_gesture(Point::new(20.0, 15.0));
        alice.update_gesture(Point::new(40.0, 30.0));
        let outcome = alice.end_gesture();
        assert_eq!(outcome.mode, TransformMode::Moving);
        assert_eq!(alice.commit_transform(&outcome).await.unwrap(), 1);

        bob.poll_once().await.unwrap();
        assert_eq!(bob.object(canonical).unwrap().bounds(), Rect::new(30.0, 20.0, 50.0, 40.0));
    }

    #[tokio::test]
    async fn test_resize_commit_sends_move_and_resize() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        let id = alice.draw(rect_draft(0.0, 0.0, 20.0, 20.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        bob.join("bob").await.unwrap();

        alice.select(canonical, false);
        assert_eq!(
            alice.begin_gesture(Point::new(21.0, 21.0), false),
            TransformMode::Resizing(Handle::SE)
        );
        alice.update_gesture(Point::new(41.0, 61.0));
        let outcome = alice.end_gesture();
        assert_eq!(alice.commit_transform(&outcome).await.unwrap(), 2);

        bob.poll_once().await.unwrap();
        assert_eq!(bob.object(canonical).unwrap().bounds(), Rect::new(0.0, 0.0, 40.0, 60.0));
    }

    #[tokio::test]
    async fn test_locked_object_is_not_transformed() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let id = alice.draw(rect_draft(0.0, 0.0, 20.0, 20.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        assert!(alice.toggle_lock(canonical).await.unwrap());

        assert_eq!(alice.begin_gesture(Point::new(10.0, 10.0), false), TransformMode::None);
        assert_eq!(alice.selected_ids(), vec![canonical]);
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_object_provisional() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let id = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();

        ledger.set_offline(true);
        assert!(matches!(
            alice.publish(id).await,
            Err(BoardError::Ledger(LedgerError::Unavailable(_)))
        ));
        assert!(alice.object(id).is_some());

        ledger.set_offline(false);
        assert_eq!(alice.publish(id).await.unwrap(), ObjectId(0));
    }

    #[tokio::test]
    async fn test_remote_delete_is_permanent() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        let id = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        alice.join("alice").await.unwrap();
        bob.join("bob").await.unwrap();

        bob.select(canonical, false);
        assert_eq!(bob.delete_selected().await.unwrap(), vec![canonical]);
        alice.poll_once().await.unwrap();
        assert!(alice.object(canonical).is_none());

        alice.join("alice").await.unwrap();
        assert!(alice.object(canonical).is_none());
        assert!(alice.objects_in_layer_order().is_empty());
    }

    #[tokio::test]
    async fn test_remote_clear_empties_board() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        alice.join("alice").await.unwrap();
        let id = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        alice.publish(id).await.unwrap();
        alice.draw(rect_draft(50.0, 0.0, 10.0, 10.0)).unwrap();

        bob.clear().await.unwrap();
        let report = alice.poll_once().await.unwrap().unwrap();
        assert!(report.cleared);
        assert!(alice.objects_in_layer_order().is_empty());
    }

    #[tokio::test]
    async fn test_restack_adopts_ledger_layers() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let first = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let first = alice.publish(first).await.unwrap();
        let second = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let second = alice.publish(second).await.unwrap();

        alice.bring_to_front(first).await.unwrap();
        let order: Vec<_> = alice.objects_in_layer_order().iter().map(DrawableObject::id).collect();
        assert_eq!(order, vec![second, first]);

        alice.send_to_back(first).await.unwrap();
        assert_eq!(alice.object(first).unwrap().layer(), 0);

        let unpublished = alice.draw(rect_draft(0.0, 0.0, 5.0, 5.0)).unwrap();
        assert!(matches!(
            alice.bring_to_front(unpublished).await,
            Err(BoardError::Unconfirmed(_))
        ));
    }

    #[tokio::test]
    async fn test_content_edit_survives_rejoin() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let id = alice
            .draw(ObjectDraft::StickyNote {
                origin: Point::new(0.0, 0.0),
                content: "draft".into(),
                background: 2,
            })
            .unwrap();
        let id = alice.publish(id).await.unwrap();
        alice.update_content(id, "final").await.unwrap();

        alice.join("alice").await.unwrap();
        let note = alice.object(id).unwrap();
        assert_eq!(note.content(), Some("final"));
        assert_eq!(note.bounds(), Rect::new(0.0, 0.0, 200.0, 150.0));
    }

    #[tokio::test]
    async fn test_poll_skipped_while_previous_running() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let _busy = alice.reconciler.lock().await;
        assert!(alice.poll_once().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_polling_picks_up_remote_changes() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        bob.join("bob").await.unwrap();
        let handle = bob.spawn_polling();

        let id = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let canonical = alice.publish(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert!(bob.object(canonical).is_some());
        handle.stop();
        assert_eq!(ledger.query_events(EventStream::UserJoined, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_during_local_clear_keeps_later_remote_objects() {
        let chain = MemoryLedger::new("0xa");
        let bob = board(&chain, "0xb");
        let gated = GatedLedger::new(chain.with_signer("0xa"), true);
        let (entered, release) = (Arc::clone(&gated.entered), Arc::clone(&gated.release));
        let alice = Board::new(gated, "0xa", BoardConfig::default());
        alice.join("alice").await.unwrap();
        let old = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        alice.publish(old).await.unwrap();

        let clearing = tokio::spawn({
            let alice = alice.clone();
            async move { alice.clear().await }
        });
        entered.notified().await;

        let id = bob.draw(rect_draft(50.0, 50.0, 10.0, 10.0)).unwrap();
        let after_clear = bob.publish(id).await.unwrap();
        assert!(alice.poll_once().await.unwrap().is_none());

        release.add_permits(1);
        clearing.await.unwrap().unwrap();
        let report = alice.poll_once().await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);
        let ids: Vec<_> = alice.objects_in_layer_order().iter().map(DrawableObject::id).collect();
        assert_eq!(ids, vec![after_clear]);
    }

    async fn wait_for_epoch_change(board: &Board<GatedLedger>, from: u64) {
        while board.lock_state().epoch == from {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_poll_result_discarded_after_reset() {
        let chain = MemoryLedger::new("0xa");
        let bob = board(&chain, "0xb");
        let gated = GatedLedger::new(chain.with_signer("0xa"), false);
        let (hold, entered, release) = (
            Arc::clone(&gated.hold_queries),
            Arc::clone(&gated.entered),
            Arc::clone(&gated.release),
        );
        let alice = Board::new(gated, "0xa", BoardConfig::default());
        alice.join("alice").await.unwrap();
        let id = bob.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let remote = bob.publish(id).await.unwrap();

        hold.store(true, Ordering::SeqCst);
        let polling = tokio::spawn({
            let alice = alice.clone();
            async move { alice.poll_once().await }
        });
        entered.notified().await;

        let epoch = alice.lock_state().epoch;
        let resetting = tokio::spawn({
            let alice = alice.clone();
            async move { alice.reset().await }
        });
        wait_for_epoch_change(&alice, epoch).await;
        hold.store(false, Ordering::SeqCst);
        release.add_permits(1);

        assert!(polling.await.unwrap().unwrap().is_none());
        resetting.await.unwrap();
        assert!(alice.object(remote).is_none());
        assert!(alice.objects_in_layer_order().is_empty());
        assert_eq!(alice.watermark().await, None);
    }

    #[tokio::test]
    async fn test_replay_result_discarded_after_reset() {
        let chain = MemoryLedger::new("0xa");
        let bob = board(&chain, "0xb");
        let id = bob.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        bob.publish(id).await.unwrap();
        let gated = GatedLedger::new(chain.with_signer("0xa"), false);
        let (entered, release) = (Arc::clone(&gated.entered), Arc::clone(&gated.release));
        gated.hold_queries.store(true, Ordering::SeqCst);
        let alice = Board::new(gated, "0xa", BoardConfig::default());

        let replaying = tokio::spawn({
            let alice = alice.clone();
            async move { alice.replay().await }
        });
        entered.notified().await;

        let epoch = alice.lock_state().epoch;
        let resetting = tokio::spawn({
            let alice = alice.clone();
            async move { alice.reset().await }
        });
        wait_for_epoch_change(&alice, epoch).await;
        alice.ledger().hold_queries.store(false, Ordering::SeqCst);
        release.add_permits(1);

        let report = replaying.await.unwrap().unwrap();
        assert_eq!(report, ApplyReport::default());
        resetting.await.unwrap();
        assert!(alice.objects_in_layer_order().is_empty());
        assert_eq!(alice.watermark().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_drag_ends_transform() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        alice.draw(rect_draft(0.0, 0.0, 20.0, 20.0)).unwrap();

        assert_eq!(alice.begin_gesture(Point::new(10.0, 10.0), false), TransformMode::Moving);
        alice.update_gesture(Point::new(30.0, 10.0));
        alice.cancel_gesture();
        assert_eq!(alice.transform_mode(), TransformMode::None);

        alice.update_gesture(Point::new(90.0, 90.0));
        assert_eq!(alice.objects_in_layer_order()[0].bounds(), Rect::new(20.0, 0.0, 40.0, 20.0));
        assert_eq!(alice.end_gesture().mode, TransformMode::None);
    }

    #[tokio::test]
    async fn test_remote_clear_ends_drag_in_progress() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        alice.join("alice").await.unwrap();
        let id = alice.draw(rect_draft(0.0, 0.0, 20.0, 20.0)).unwrap();
        alice.publish(id).await.unwrap();

        assert_eq!(alice.begin_gesture(Point::new(10.0, 10.0), false), TransformMode::Moving);
        bob.clear().await.unwrap();
        assert!(alice.poll_once().await.unwrap().unwrap().cleared);

        assert_eq!(alice.transform_mode(), TransformMode::None);
        alice.update_gesture(Point::new(40.0, 40.0));
        let outcome = alice.end_gesture();
        assert_eq!(outcome.mode, TransformMode::None);
        assert!(outcome.objects.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_delete_in_one_range_leaves_tombstone() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        alice.join("alice").await.unwrap();

        let id = bob.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let canonical = bob.publish(id).await.unwrap();
        bob.select(canonical, false);
        bob.delete_selected().await.unwrap();

        let report = alice.poll_once().await.unwrap().unwrap();
        assert_eq!(report.inserted, 0);
        assert!(alice.object(canonical).is_none());
        assert!(alice.lock_state().store.is_tombstoned(canonical));
    }

    #[tokio::test]
    async fn test_delete_selected_submits_every_id() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        let first = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let first = alice.publish(first).await.unwrap();
        let second = alice.draw(rect_draft(50.0, 0.0, 10.0, 10.0)).unwrap();
        let second = alice.publish(second).await.unwrap();

        // bob deletes the first one before alice hears about it
        bob.join("bob").await.unwrap();
        bob.select(first, false);
        bob.delete_selected().await.unwrap();

        alice.select(first, false);
        alice.select(second, true);
        match alice.delete_selected().await {
            Err(BoardError::DeleteFailed { failed, .. }) => assert_eq!(failed, vec![first]),
            other => panic!("expected a partial delete, got {:?}", other),
        }
        assert!(ledger.object_attributes(second).await.unwrap().deleted);
        assert!(alice.objects_in_layer_order().is_empty());
    }

    #[tokio::test]
    async fn test_draw_on_top_of_highest_layer_saturates() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bottom = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        alice.lock_state().store.update(bottom, ObjectPatch::layer(u32::MAX));

        let top = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_eq!(alice.object(top).unwrap().layer(), u32::MAX);
    }

    #[tokio::test]
    async fn test_equal_layers_match_between_live_and_replayed_views() {
        let ledger = MemoryLedger::new("0xa");
        let alice = board(&ledger, "0xa");
        let bob = board(&ledger, "0xb");
        bob.join("bob").await.unwrap();

        let rect = alice.draw(rect_draft(0.0, 0.0, 10.0, 10.0)).unwrap();
        let rect = alice.publish(rect).await.unwrap();
        let stroke = alice
            .draw(ObjectDraft::Stroke {
                points: vec![Point::new(0.0, 0.0), Point::new(8.0, 8.0)],
                style: ObjectStyle::default(),
            })
            .unwrap();
        let stroke = alice.publish(stroke).await.unwrap();
        bob.poll_once().await.unwrap();

        alice.send_to_back(rect).await.unwrap();
        alice.send_to_back(stroke).await.unwrap();
        bob.poll_once().await.unwrap();

        let carol = board(&ledger, "0xc");
        carol.join("carol").await.unwrap();

        let order = |b: &Board<MemoryLedger>| -> Vec<ObjectId> {
            b.objects_in_layer_order().iter().map(DrawableObject::id).collect()
        };
        assert_eq!(order(&bob), vec![rect, stroke]);
        assert_eq!(order(&carol), order(&bob));
        assert_eq!(order(&alice), order(&bob));
    }
}
