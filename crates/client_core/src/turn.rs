//! One conversational turn: its phase results, lifecycle state, and carousel
//! position.
//!
//! Stream merging lives in [`crate::merge`] and navigation in
//! [`crate::carousel`]; both are `impl Turn` blocks over the state here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{domain::TurnId, phase::Phase, protocol::PhaseStatus};
use tracing::info;

use crate::store::{PhaseContentStore, PhaseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// A single observable mutation of a turn, handed to the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnChange {
    StateChanged { from: TurnState, to: TurnState },
    PhaseUpdated { phase: Phase },
    PhaseFailed { phase: Phase, error: String },
    PreviewChanged { preview: Option<String> },
    SelectionChanged { phase: Phase, pinned: bool },
    PageChanged { phase: Phase, page: usize },
}

#[derive(Debug, Clone)]
pub struct Turn {
    id: TurnId,
    prompt: String,
    created_at: DateTime<Utc>,
    pub(crate) closed_at: Option<DateTime<Utc>>,
    pub(crate) store: PhaseContentStore,
    pub(crate) state: TurnState,
    pub(crate) phase_status: BTreeMap<Phase, PhaseStatus>,
    pub(crate) phase_errors: BTreeMap<Phase, String>,
    pub(crate) failure: Option<String>,
    pub(crate) selected_phase: Phase,
    pub(crate) user_pinned: bool,
    pub(crate) page_by_phase: BTreeMap<Phase, usize>,
}

impl Turn {
    pub fn new(id: TurnId, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            created_at: Utc::now(),
            closed_at: None,
            store: PhaseContentStore::new(),
            state: TurnState::Idle,
            phase_status: BTreeMap::new(),
            phase_errors: BTreeMap::new(),
            failure: None,
            selected_phase: Phase::FIRST,
            user_pinned: false,
            page_by_phase: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// True until the turn reaches a terminal state.
    pub fn is_streaming(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn get(&self, phase: Phase) -> &PhaseResult {
        self.store.get(phase)
    }

    pub fn preview(&self) -> Option<&str> {
        self.store.preview()
    }

    pub fn phase_status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phase_status.get(&phase).copied()
    }

    pub fn phase_error(&self, phase: Phase) -> Option<&str> {
        self.phase_errors.get(&phase).map(String::as_str)
    }

    /// A phase is busy while its last update said `running` and the turn is
    /// still streaming.
    pub fn is_busy(&self, phase: Phase) -> bool {
        self.is_streaming() && self.phase_status(phase) == Some(PhaseStatus::Running)
    }

    pub fn available_phases(&self) -> Vec<Phase> {
        self.store.available_phases(|phase| self.is_busy(phase))
    }

    pub fn selected_phase(&self) -> Phase {
        self.selected_phase
    }

    pub fn is_selection_pinned(&self) -> bool {
        self.user_pinned
    }

    /// Last page index the carousel showed for `phase`, unclamped.
    pub fn current_page(&self, phase: Phase) -> usize {
        self.page_by_phase.get(&phase).copied().unwrap_or(0)
    }

    pub(crate) fn set_selection(&mut self, phase: Phase, pinned: bool, changes: &mut Vec<TurnChange>) {
        if self.selected_phase == phase && self.user_pinned == pinned {
            return;
        }
        self.selected_phase = phase;
        self.user_pinned = pinned;
        changes.push(TurnChange::SelectionChanged { phase, pinned });
    }

    pub(crate) fn set_page(&mut self, phase: Phase, page: usize, changes: &mut Vec<TurnChange>) {
        if self.current_page(phase) == page {
            return;
        }
        self.page_by_phase.insert(phase, page);
        changes.push(TurnChange::PageChanged { phase, page });
    }

    pub(crate) fn transition(&mut self, to: TurnState, changes: &mut Vec<TurnChange>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        if to.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
        info!(turn_id = %self.id, ?from, ?to, "turn state changed");
        changes.push(TurnChange::StateChanged { from, to });
    }

    /// Keeps the selection inside the available set whenever that set is
    /// non-empty.
    pub(crate) fn ensure_selection_available(&mut self, changes: &mut Vec<TurnChange>) {
        let available = self.available_phases();
        let Some(first) = available.first().copied() else {
            return;
        };
        if !available.contains(&self.selected_phase) {
            let pinned = self.user_pinned;
            self.set_selection(first, pinned, changes);
        }
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        let phases = Phase::ALL
            .into_iter()
            .filter(|phase| {
                self.store.has_content(*phase) || self.phase_status.contains_key(phase)
            })
            .map(|phase| PhaseSnapshot {
                phase,
                status: self.phase_status(phase),
                error: self.phase_errors.get(&phase).cloned(),
                result: self.get(phase).clone(),
            })
            .collect();

        TurnSnapshot {
            turn_id: self.id,
            prompt: self.prompt.clone(),
            created_at: self.created_at,
            closed_at: self.closed_at,
            state: self.state,
            failure: self.failure.clone(),
            preview: self.preview().map(str::to_string),
            selected_phase: self.selected_phase,
            available_phases: self.available_phases(),
            phases,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSnapshot {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PhaseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: PhaseResult,
}

/// Owned, serializable copy of a turn for export and for renderers that
/// must not hold the turn lock.
#[derive(Debug, Clone, Serialize)]
pub struct TurnSnapshot {
    pub turn_id: TurnId,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub state: TurnState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub selected_phase: Phase,
    pub available_phases: Vec<Phase>,
    pub phases: Vec<PhaseSnapshot>,
}
