//! Carousel navigation over a turn's available phases and their pages.
//!
//! Page exhaustion falls through to phase switching, so repeated `Next`
//! walks the whole turn. Only `yield` and `action` wrap into each other, and
//! only when both are available. Every explicit move pins the selection,
//! which turns off follow-the-stream auto-advance.

use shared::{domain::NavDirection, phase::Phase};
use tracing::debug;

use crate::turn::{Turn, TurnChange};

/// Supplies the page count of a phase for the active viewport.
pub trait PageCounts {
    fn page_count(&self, phase: Phase) -> usize;
}

impl<F> PageCounts for F
where
    F: Fn(Phase) -> usize,
{
    fn page_count(&self, phase: Phase) -> usize {
        self(phase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragIntent {
    Previous,
    Next,
    None,
}

/// Classifies a drag by where it is projected to end. A leftward travel
/// past `threshold_fraction` of the card width means `Next`.
pub fn classify_drag(projected_translation: f64, card_width: f64, threshold_fraction: f64) -> DragIntent {
    if !projected_translation.is_finite() || !card_width.is_finite() || card_width <= 0.0 {
        return DragIntent::None;
    }
    let threshold = card_width * threshold_fraction;
    if projected_translation < -threshold {
        DragIntent::Next
    } else if projected_translation > threshold {
        DragIntent::Previous
    } else {
        DragIntent::None
    }
}

impl Turn {
    /// Selects an available phase, restoring the page it was last on.
    pub fn select_phase(&mut self, phase: Phase) -> Vec<TurnChange> {
        let mut changes = Vec::new();
        if !self.available_phases().contains(&phase) {
            debug!(turn_id = %self.id(), %phase, "ignoring selection of unavailable phase");
            return changes;
        }
        self.set_selection(phase, true, &mut changes);
        changes
    }

    pub fn switch_phase(&mut self, direction: NavDirection) -> Vec<TurnChange> {
        let mut changes = Vec::new();
        if let Some(target) = self.adjacent_available(direction) {
            self.set_selection(target, true, &mut changes);
        }
        changes
    }

    pub fn advance_page(&mut self, direction: NavDirection, pages: &impl PageCounts) -> Vec<TurnChange> {
        let mut changes = Vec::new();
        let phase = self.selected_phase;
        if !self.available_phases().contains(&phase) {
            return changes;
        }

        let count = pages.page_count(phase).max(1);
        let page = self.current_page(phase).min(count - 1);
        let within = match direction {
            NavDirection::Next if page + 1 < count => Some(page + 1),
            NavDirection::Previous if page > 0 => Some(page - 1),
            _ => None,
        };

        if let Some(next_page) = within {
            self.set_page(phase, next_page, &mut changes);
            let pinned_phase = self.selected_phase;
            self.set_selection(pinned_phase, true, &mut changes);
            return changes;
        }

        let Some(target) = self.adjacent_available(direction) else {
            return changes;
        };
        let landing = match direction {
            NavDirection::Next => 0,
            NavDirection::Previous => pages.page_count(target).max(1) - 1,
        };
        self.set_selection(target, true, &mut changes);
        self.set_page(target, landing, &mut changes);
        changes
    }

    pub fn handle_drag(
        &mut self,
        projected_translation: f64,
        card_width: f64,
        threshold_fraction: f64,
    ) -> Vec<TurnChange> {
        match classify_drag(projected_translation, card_width, threshold_fraction) {
            DragIntent::Next => self.switch_phase(NavDirection::Next),
            DragIntent::Previous => self.switch_phase(NavDirection::Previous),
            DragIntent::None => Vec::new(),
        }
    }

    /// Page index to display for `phase`, clamped to its current page count.
    pub fn visible_page(&self, phase: Phase, page_count: usize) -> usize {
        self.current_page(phase).min(page_count.max(1) - 1)
    }

    fn adjacent_available(&self, direction: NavDirection) -> Option<Phase> {
        let available = self.available_phases();
        let current = self.selected_phase;
        let neighbour = match direction {
            NavDirection::Next => available.iter().copied().find(|phase| *phase > current),
            NavDirection::Previous => available.iter().copied().rev().find(|phase| *phase < current),
        };
        if neighbour.is_some() {
            return neighbour;
        }

        let (end, other_end) = match direction {
            NavDirection::Next => (Phase::LAST, Phase::FIRST),
            NavDirection::Previous => (Phase::FIRST, Phase::LAST),
        };
        (current == end && available.contains(&end) && available.contains(&other_end))
            .then_some(other_end)
    }
}

#[cfg(test)]
#[path = "tests/carousel_tests.rs"]
mod tests;
