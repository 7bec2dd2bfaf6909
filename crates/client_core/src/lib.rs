use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use futures::StreamExt;
use serde::Serialize;
use shared::{
    domain::{ConversationId, NavDirection, TurnId},
    phase::Phase,
    protocol::StreamEvent,
};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod carousel;
pub mod error;
pub mod measure;
pub mod merge;
pub mod page_cache;
pub mod pagination;
pub mod resize;
pub mod settings;
pub mod store;
pub mod transport;
pub mod turn;

pub use carousel::{classify_drag, DragIntent, PageCounts};
pub use error::{CoreError, CoreResult};
pub use measure::{MonospaceMeasure, TextMeasure};
pub use merge::{DropReason, MergeOutcome};
pub use page_cache::Pages;
pub use pagination::{PaginationEngine, PaginationStats, Viewport};
pub use settings::ClientSettings;
pub use store::PhaseResult;
pub use transport::{EventSource, EventStream, HttpEventSource, MissingEventSource, ReplayEventSource};
pub use turn::{Turn, TurnChange, TurnSnapshot, TurnState};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    TurnStarted { turn_id: TurnId, prompt: String },
    TurnChanged { turn_id: TurnId, change: TurnChange },
    EventDropped { turn_id: TurnId, reason: DropReason },
    ViewportSettled(Viewport),
}

/// What the carousel should draw for a turn right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleCard {
    pub phase: Phase,
    pub page: usize,
    pub page_count: usize,
    pub text: String,
    pub pinned: bool,
}

struct TurnEntry {
    turn: Mutex<Turn>,
    cancel: watch::Sender<bool>,
}

/// Owns every turn of one conversation and serializes all mutation of a
/// turn behind its lock. Renderers observe through [`ClientEvent`]s and
/// snapshots.
pub struct Conversation {
    id: ConversationId,
    settings: ClientSettings,
    turns: RwLock<BTreeMap<TurnId, Arc<TurnEntry>>>,
    next_turn_id: AtomicI64,
    paginator: PaginationEngine,
    viewport: RwLock<Viewport>,
    events: broadcast::Sender<ClientEvent>,
}

impl Conversation {
    pub fn new(settings: ClientSettings, measure: Arc<dyn TextMeasure>) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_channel_capacity.max(1));
        Arc::new(Self {
            id: ConversationId::new(),
            paginator: PaginationEngine::new(measure, settings.page_cache_turns),
            viewport: RwLock::new(settings.initial_viewport),
            turns: RwLock::new(BTreeMap::new()),
            next_turn_id: AtomicI64::new(1),
            settings,
            events,
        })
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn begin_turn(&self, prompt: impl Into<String>) -> TurnId {
        let turn_id = TurnId(self.next_turn_id.fetch_add(1, Ordering::Relaxed));
        let prompt = prompt.into();
        let (cancel, _) = watch::channel(false);
        let entry = Arc::new(TurnEntry {
            turn: Mutex::new(Turn::new(turn_id, prompt.clone())),
            cancel,
        });
        self.turns.write().await.insert(turn_id, entry);
        info!(conversation_id = %self.id, %turn_id, "turn started");
        let _ = self.events.send(ClientEvent::TurnStarted { turn_id, prompt });
        turn_id
    }

    pub async fn turn_ids(&self) -> Vec<TurnId> {
        self.turns.read().await.keys().copied().collect()
    }

    pub async fn apply_event(&self, turn_id: TurnId, event: &StreamEvent) -> CoreResult<MergeOutcome> {
        self.apply_batch(turn_id, std::slice::from_ref(event)).await
    }

    pub async fn apply_batch(&self, turn_id: TurnId, events: &[StreamEvent]) -> CoreResult<MergeOutcome> {
        let entry = self.entry(turn_id).await?;
        let outcome = entry.turn.lock().await.apply_batch(events);
        self.publish_outcome(turn_id, &outcome);
        Ok(outcome)
    }

    /// Drains `stream` into the turn until it closes, the turn reaches a
    /// terminal state, or the turn is cancelled. Returns the final state.
    pub async fn ingest(&self, turn_id: TurnId, mut stream: EventStream) -> CoreResult<TurnState> {
        let entry = self.entry(turn_id).await?;
        let mut cancelled = entry.cancel.subscribe();
        let already_cancelled = *cancelled.borrow();
        if already_cancelled {
            return Ok(entry.turn.lock().await.state());
        }

        loop {
            tokio::select! {
                biased;
                _ = cancelled.changed() => {
                    debug!(%turn_id, "stopped reading cancelled turn stream");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let mut turn = entry.turn.lock().await;
                        let outcome = turn.apply_event(&event);
                        let closed = turn.state().is_terminal();
                        drop(turn);
                        self.publish_outcome(turn_id, &outcome);
                        if closed {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        let changes = entry.turn.lock().await.fail(err.to_string());
                        self.publish_changes(turn_id, changes);
                        break;
                    }
                    None => {
                        let changes = entry.turn.lock().await.finish_stream();
                        self.publish_changes(turn_id, changes);
                        break;
                    }
                },
            }
        }

        let state = entry.turn.lock().await.state();
        Ok(state)
    }

    /// Opens a stream for a fresh turn and ingests it to the end.
    pub async fn run_turn(&self, source: &dyn EventSource, prompt: &str) -> CoreResult<(TurnId, TurnState)> {
        let turn_id = self.begin_turn(prompt).await;
        let stream = self.open_stream(source, turn_id, prompt).await?;
        let state = self.ingest(turn_id, stream).await?;
        Ok((turn_id, state))
    }

    /// Like [`Conversation::run_turn`] but ingests on a background task so
    /// the caller can navigate or cancel while the stream is live.
    pub async fn spawn_turn(
        self: &Arc<Self>,
        source: Arc<dyn EventSource>,
        prompt: impl Into<String>,
    ) -> (TurnId, JoinHandle<CoreResult<TurnState>>) {
        let prompt = prompt.into();
        let turn_id = self.begin_turn(prompt.clone()).await;
        let conversation = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let stream = conversation
                .open_stream(source.as_ref(), turn_id, &prompt)
                .await?;
            conversation.ingest(turn_id, stream).await
        });
        (turn_id, handle)
    }

    pub async fn cancel_turn(&self, turn_id: TurnId) -> CoreResult<TurnState> {
        let entry = self.entry(turn_id).await?;
        entry.cancel.send_replace(true);
        let mut turn = entry.turn.lock().await;
        let changes = turn.cancel();
        let state = turn.state();
        drop(turn);
        self.publish_changes(turn_id, changes);
        Ok(state)
    }

    pub async fn fail_turn(&self, turn_id: TurnId, reason: impl Into<String>) -> CoreResult<TurnState> {
        let entry = self.entry(turn_id).await?;
        entry.cancel.send_replace(true);
        let mut turn = entry.turn.lock().await;
        let changes = turn.fail(reason);
        let state = turn.state();
        drop(turn);
        self.publish_changes(turn_id, changes);
        Ok(state)
    }

    pub async fn remove_turn(&self, turn_id: TurnId) -> CoreResult<()> {
        let entry = self
            .turns
            .write()
            .await
            .remove(&turn_id)
            .ok_or(CoreError::UnknownTurn(turn_id))?;
        entry.cancel.send_replace(true);
        let evicted = self.paginator.invalidate_turn(turn_id);
        debug!(%turn_id, evicted, "turn removed");
        Ok(())
    }

    pub async fn snapshot(&self, turn_id: TurnId) -> CoreResult<TurnSnapshot> {
        let entry = self.entry(turn_id).await?;
        let snapshot = entry.turn.lock().await.snapshot();
        Ok(snapshot)
    }

    pub async fn state(&self, turn_id: TurnId) -> CoreResult<TurnState> {
        let entry = self.entry(turn_id).await?;
        let state = entry.turn.lock().await.state();
        Ok(state)
    }

    pub async fn available_phases(&self, turn_id: TurnId) -> CoreResult<Vec<Phase>> {
        let entry = self.entry(turn_id).await?;
        let phases = entry.turn.lock().await.available_phases();
        Ok(phases)
    }

    pub async fn phase_result(&self, turn_id: TurnId, phase: Phase) -> CoreResult<PhaseResult> {
        let entry = self.entry(turn_id).await?;
        let result = entry.turn.lock().await.get(phase).clone();
        Ok(result)
    }

    pub async fn selected_phase(&self, turn_id: TurnId) -> CoreResult<Phase> {
        let entry = self.entry(turn_id).await?;
        let phase = entry.turn.lock().await.selected_phase();
        Ok(phase)
    }

    /// Pages of `phase` at the active viewport, served from the page cache
    /// when the content is unchanged.
    pub async fn pages(&self, turn_id: TurnId, phase: Phase) -> CoreResult<Pages> {
        let entry = self.entry(turn_id).await?;
        let viewport = self.viewport().await;
        let turn = entry.turn.lock().await;
        Ok(self.paginator.paginate(turn_id, phase, turn.get(phase), viewport))
    }

    pub async fn visible_card(&self, turn_id: TurnId) -> CoreResult<VisibleCard> {
        let entry = self.entry(turn_id).await?;
        let viewport = self.viewport().await;
        let turn = entry.turn.lock().await;
        let phase = turn.selected_phase();
        let pages = self.paginator.paginate(turn_id, phase, turn.get(phase), viewport);
        let page = turn.visible_page(phase, pages.len());
        Ok(VisibleCard {
            phase,
            page,
            page_count: pages.len(),
            text: pages.get(page).cloned().unwrap_or_default(),
            pinned: turn.is_selection_pinned(),
        })
    }

    pub async fn select_phase(&self, turn_id: TurnId, phase: Phase) -> CoreResult<Vec<TurnChange>> {
        self.navigate(turn_id, |turn, _| turn.select_phase(phase)).await
    }

    pub async fn switch_phase(&self, turn_id: TurnId, direction: NavDirection) -> CoreResult<Vec<TurnChange>> {
        self.navigate(turn_id, |turn, _| turn.switch_phase(direction)).await
    }

    pub async fn advance_page(&self, turn_id: TurnId, direction: NavDirection) -> CoreResult<Vec<TurnChange>> {
        self.navigate(turn_id, |turn, counts| {
            turn.advance_page(direction, &|phase: Phase| counts.get(&phase).copied().unwrap_or(1))
        })
        .await
    }

    pub async fn handle_drag(
        &self,
        turn_id: TurnId,
        projected_translation: f64,
        card_width: f64,
    ) -> CoreResult<Vec<TurnChange>> {
        let fraction = self.settings.drag_threshold_fraction;
        self.navigate(turn_id, |turn, _| {
            turn.handle_drag(projected_translation, card_width, fraction)
        })
        .await
    }

    pub async fn viewport(&self) -> Viewport {
        *self.viewport.read().await
    }

    /// Returns whether the rounded size changed. Cached pages for other
    /// sizes stay valid and are reused if the size comes back.
    pub async fn set_viewport(&self, viewport: Viewport) -> bool {
        let mut current = self.viewport.write().await;
        if current.rounded() == viewport.rounded() {
            return false;
        }
        *current = viewport;
        drop(current);
        let (width, height) = viewport.rounded();
        debug!(conversation_id = %self.id, width, height, "viewport changed");
        let _ = self.events.send(ClientEvent::ViewportSettled(viewport));
        true
    }

    /// Feeds raw layout sizes through the resize debouncer and applies each
    /// settled size. The task ends when `raw` closes.
    pub fn track_viewport(self: &Arc<Self>, raw: mpsc::Receiver<Viewport>) -> JoinHandle<()> {
        let (mut settled, debouncer) = resize::spawn_viewport_debouncer(raw, self.settings.resize_debounce);
        let conversation = Arc::clone(self);
        tokio::spawn(async move {
            while settled.changed().await.is_ok() {
                let latest = *settled.borrow_and_update();
                if let Some(viewport) = latest {
                    conversation.set_viewport(viewport).await;
                }
            }
            if let Err(err) = debouncer.await {
                warn!(error = %err, "viewport debouncer task failed");
            }
        })
    }

    /// Turns that are no longer streaming, oldest first. Streaming turns are
    /// never exported half-built.
    pub async fn export_committed(&self) -> Vec<TurnSnapshot> {
        let entries: Vec<Arc<TurnEntry>> = self.turns.read().await.values().cloned().collect();
        let mut committed = Vec::new();
        for entry in entries {
            let turn = entry.turn.lock().await;
            if !turn.is_streaming() {
                committed.push(turn.snapshot());
            }
        }
        committed
    }

    pub async fn export_json(&self) -> CoreResult<String> {
        let turns = self.export_committed().await;
        Ok(serde_json::to_string_pretty(&turns)?)
    }

    pub fn pagination_stats(&self) -> PaginationStats {
        self.paginator.stats()
    }

    /// A source that cannot open fails the turn it was opened for.
    async fn open_stream(&self, source: &dyn EventSource, turn_id: TurnId, prompt: &str) -> CoreResult<EventStream> {
        match source.open(turn_id, prompt).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.fail_turn(turn_id, err.to_string()).await?;
                Err(err)
            }
        }
    }

    async fn entry(&self, turn_id: TurnId) -> CoreResult<Arc<TurnEntry>> {
        self.turns
            .read()
            .await
            .get(&turn_id)
            .cloned()
            .ok_or(CoreError::UnknownTurn(turn_id))
    }

    async fn navigate<F>(&self, turn_id: TurnId, action: F) -> CoreResult<Vec<TurnChange>>
    where
        F: FnOnce(&mut Turn, &BTreeMap<Phase, usize>) -> Vec<TurnChange>,
    {
        let entry = self.entry(turn_id).await?;
        let viewport = self.viewport().await;
        let mut turn = entry.turn.lock().await;
        let counts: BTreeMap<Phase, usize> = turn
            .available_phases()
            .into_iter()
            .map(|phase| {
                let pages = self.paginator.paginate(turn_id, phase, turn.get(phase), viewport);
                (phase, pages.len())
            })
            .collect();
        let changes = action(&mut *turn, &counts);
        drop(turn);
        self.publish_changes(turn_id, changes.clone());
        Ok(changes)
    }

    fn publish_outcome(&self, turn_id: TurnId, outcome: &MergeOutcome) {
        self.publish_changes(turn_id, outcome.changes.clone());
        for reason in &outcome.dropped {
            let _ = self.events.send(ClientEvent::EventDropped {
                turn_id,
                reason: reason.clone(),
            });
        }
    }

    fn publish_changes(&self, turn_id: TurnId, changes: Vec<TurnChange>) {
        for change in changes {
            let _ = self.events.send(ClientEvent::TurnChanged { turn_id, change });
        }
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
