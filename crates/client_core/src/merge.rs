//! Stream merge engine: folds ordered phase events into a [`Turn`].
//!
//! Lifecycle is `Idle -> Streaming -> {Completed, Cancelled, Failed}`. The
//! first received event moves a turn to `Streaming`; `yield` reporting
//! `complete` closes it. Events that arrive after a terminal state are
//! dropped. A phase-level `error` is recorded against that phase only.

use shared::{
    phase::Phase,
    protocol::{PhaseStatus, StreamEvent},
};
use tracing::{debug, warn};

use crate::turn::{Turn, TurnChange, TurnState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownPhase(String),
    TurnClosed(TurnState),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub changes: Vec<TurnChange>,
    pub dropped: Vec<DropReason>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.dropped.is_empty()
    }
}

impl Turn {
    pub fn apply_event(&mut self, event: &StreamEvent) -> MergeOutcome {
        self.apply_batch(std::slice::from_ref(event))
    }

    /// Merges one tick of events in order. When several phases gain content
    /// in the same tick, auto-advance picks the earliest in registry order.
    pub fn apply_batch(&mut self, events: &[StreamEvent]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut gained_content = Vec::new();

        for event in events {
            if self.state.is_terminal() {
                debug!(
                    turn_id = %self.id(),
                    phase = %event.phase,
                    state = ?self.state,
                    "dropping stream event for closed turn"
                );
                outcome.dropped.push(DropReason::TurnClosed(self.state));
                continue;
            }
            if self.state == TurnState::Idle {
                self.transition(TurnState::Streaming, &mut outcome.changes);
            }

            let phase = match event.resolved_phase() {
                Ok(phase) => phase,
                Err(err) => {
                    warn!(turn_id = %self.id(), error = %err, "dropping stream event");
                    outcome
                        .dropped
                        .push(DropReason::UnknownPhase(event.phase.clone()));
                    continue;
                }
            };

            if self.merge_phase(phase, event, &mut outcome.changes) {
                gained_content.push(phase);
            }

            if phase == Phase::Yield && event.status == PhaseStatus::Complete {
                self.transition(TurnState::Completed, &mut outcome.changes);
            }
        }

        self.auto_advance(&gained_content, &mut outcome.changes);
        self.ensure_selection_available(&mut outcome.changes);
        outcome
    }

    /// Stops merging. Already-merged content is kept as is. A turn that
    /// never received an event closes straight from `Idle`.
    pub fn cancel(&mut self) -> Vec<TurnChange> {
        self.close(TurnState::Cancelled)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Vec<TurnChange> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        let reason = reason.into();
        warn!(turn_id = %self.id(), %reason, "turn stream failed");
        self.failure = Some(reason);
        self.close(TurnState::Failed)
    }

    /// Stream ended cleanly. A turn that never saw `yield` complete is still
    /// closed as completed with whatever it accumulated, including an empty
    /// stream that leaves the turn `Idle` until now.
    pub fn finish_stream(&mut self) -> Vec<TurnChange> {
        if !self.state.is_terminal() {
            debug!(turn_id = %self.id(), "stream ended before yield completed");
        }
        self.close(TurnState::Completed)
    }

    fn close(&mut self, to: TurnState) -> Vec<TurnChange> {
        let mut changes = Vec::new();
        if self.state.is_terminal() {
            return changes;
        }
        self.transition(to, &mut changes);
        self.ensure_selection_available(&mut changes);
        changes
    }

    /// Returns whether the phase went from nothing to show to something.
    fn merge_phase(&mut self, phase: Phase, event: &StreamEvent, changes: &mut Vec<TurnChange>) -> bool {
        if event.status == PhaseStatus::Error {
            let error = event
                .error
                .clone()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| "phase failed".to_string());
            warn!(turn_id = %self.id(), %phase, %error, "phase reported error");
            self.phase_status.insert(phase, PhaseStatus::Error);
            self.phase_errors.insert(phase, error.clone());
            changes.push(TurnChange::PhaseFailed { phase, error });
            return false;
        }

        let had_content = self.store.has_content(phase);
        self.phase_status.insert(phase, event.status);
        self.phase_errors.remove(&phase);

        let mut changed = false;
        if let Some(content) = &event.content {
            let upsert = self.store.upsert(
                phase,
                content.as_str(),
                event.provider.clone(),
                event.model_name.clone(),
            );
            changed |= upsert.changed;
            if upsert.preview_changed {
                changes.push(TurnChange::PreviewChanged {
                    preview: self.store.preview().map(str::to_string),
                });
            }
        }
        if let Some(results) = &event.vector_results {
            changed |= self.store.attach_vector_results(phase, results.clone());
        }
        if let Some(results) = &event.web_results {
            changed |= self.store.attach_web_results(phase, results.clone());
        }
        if changed {
            changes.push(TurnChange::PhaseUpdated { phase });
        }

        !had_content && self.store.has_content(phase)
    }

    /// Follow-the-stream: only while the user has not navigated and the
    /// selection is still on the first phase.
    fn auto_advance(&mut self, gained_content: &[Phase], changes: &mut Vec<TurnChange>) {
        if self.user_pinned || self.selected_phase != Phase::FIRST {
            return;
        }
        let Some(target) = gained_content
            .iter()
            .copied()
            .filter(|phase| *phase != Phase::FIRST)
            .min()
        else {
            return;
        };
        self.set_selection(target, false, changes);
    }
}

#[cfg(test)]
#[path = "tests/merge_tests.rs"]
mod tests;
