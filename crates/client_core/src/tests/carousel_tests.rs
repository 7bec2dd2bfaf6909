use super::*;
use shared::{domain::TurnId, protocol::StreamEvent};

use crate::turn::TurnState;

fn turn_with(phases: &[Phase]) -> Turn {
    let mut turn = Turn::new(TurnId(7), "prompt");
    for phase in phases {
        turn.apply_event(&StreamEvent::running(*phase, format!("{phase} text")));
    }
    turn
}

fn pages(phase: Phase) -> usize {
    match phase {
        Phase::Action => 2,
        Phase::Intention => 3,
        Phase::Yield => 2,
        _ => 1,
    }
}

#[test]
fn drag_classification_uses_one_third_threshold() {
    let fraction = crate::settings::DEFAULT_DRAG_THRESHOLD_FRACTION;
    assert_eq!(classify_drag(-120.0, 300.0, fraction), DragIntent::Next);
    assert_eq!(classify_drag(120.0, 300.0, fraction), DragIntent::Previous);
    assert_eq!(classify_drag(-90.0, 300.0, fraction), DragIntent::None);
    assert_eq!(classify_drag(100.0, 300.0, fraction), DragIntent::None);
    assert_eq!(classify_drag(-500.0, 0.0, fraction), DragIntent::None);
    assert_eq!(classify_drag(f64::NAN, 300.0, fraction), DragIntent::None);
}

#[test]
fn select_phase_ignores_unavailable_phase() {
    let mut turn = turn_with(&[Phase::Action, Phase::Yield]);
    turn.select_phase(Phase::Action);
    assert!(turn.select_phase(Phase::Observation).is_empty());
    assert_eq!(turn.selected_phase(), Phase::Action);
}

#[test]
fn select_phase_restores_last_page_and_pins() {
    let mut turn = turn_with(&[Phase::Action, Phase::Intention]);
    turn.select_phase(Phase::Intention);
    turn.advance_page(NavDirection::Next, &pages);
    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.current_page(Phase::Intention), 2);

    turn.select_phase(Phase::Action);
    let changes = turn.select_phase(Phase::Intention);

    assert_eq!(
        changes,
        vec![TurnChange::SelectionChanged {
            phase: Phase::Intention,
            pinned: true,
        }]
    );
    assert_eq!(turn.current_page(Phase::Intention), 2);
    assert!(turn.is_selection_pinned());
}

#[test]
fn page_exhaustion_falls_through_to_next_phase() {
    let mut turn = turn_with(&[Phase::Action, Phase::Intention, Phase::Yield]);
    turn.select_phase(Phase::Action);

    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!((turn.selected_phase(), turn.current_page(Phase::Action)), (Phase::Action, 1));

    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.selected_phase(), Phase::Intention);
    assert_eq!(turn.current_page(Phase::Intention), 0);
}

#[test]
fn backward_traversal_lands_on_last_page_of_previous_phase() {
    let mut turn = turn_with(&[Phase::Action, Phase::Intention]);
    turn.select_phase(Phase::Intention);

    turn.advance_page(NavDirection::Previous, &pages);

    assert_eq!(turn.selected_phase(), Phase::Action);
    assert_eq!(turn.current_page(Phase::Action), 1);
}

#[test]
fn yield_last_page_wraps_to_action_first_page() {
    let mut turn = turn_with(&[Phase::Action, Phase::Intention, Phase::Yield]);
    turn.apply_event(&StreamEvent::complete(Phase::Yield, "done"));
    assert_eq!(turn.state(), TurnState::Completed);

    turn.select_phase(Phase::Action);
    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.current_page(Phase::Action), 1);

    turn.select_phase(Phase::Yield);
    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.current_page(Phase::Yield), 1);

    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.selected_phase(), Phase::Action);
    assert_eq!(turn.current_page(Phase::Action), 0);
}

#[test]
fn yield_last_page_without_action_is_a_noop() {
    let mut turn = turn_with(&[Phase::Intention, Phase::Yield]);
    turn.select_phase(Phase::Yield);
    turn.advance_page(NavDirection::Next, &pages);

    let changes = turn.advance_page(NavDirection::Next, &pages);

    assert!(changes.is_empty());
    assert_eq!(turn.selected_phase(), Phase::Yield);
    assert_eq!(turn.current_page(Phase::Yield), 1);
}

#[test]
fn switch_phase_wraps_only_between_logical_ends() {
    let mut turn = turn_with(&[Phase::Action, Phase::Observation, Phase::Yield]);
    turn.select_phase(Phase::Action);

    turn.switch_phase(NavDirection::Previous);
    assert_eq!(turn.selected_phase(), Phase::Yield);

    turn.switch_phase(NavDirection::Next);
    assert_eq!(turn.selected_phase(), Phase::Action);

    turn.switch_phase(NavDirection::Next);
    assert_eq!(turn.selected_phase(), Phase::Observation);
}

#[test]
fn switch_phase_clamps_when_last_available_is_not_yield() {
    let mut turn = turn_with(&[Phase::Action, Phase::Understanding]);
    turn.select_phase(Phase::Understanding);

    assert!(turn.switch_phase(NavDirection::Next).is_empty());
    assert_eq!(turn.selected_phase(), Phase::Understanding);
}

#[test]
fn drag_switches_phase_and_keeps_remembered_page() {
    let mut turn = turn_with(&[Phase::Action, Phase::Intention]);
    turn.select_phase(Phase::Intention);
    turn.advance_page(NavDirection::Next, &pages);
    turn.select_phase(Phase::Action);

    let fraction = crate::settings::DEFAULT_DRAG_THRESHOLD_FRACTION;
    turn.handle_drag(-200.0, 300.0, fraction);

    assert_eq!(turn.selected_phase(), Phase::Intention);
    assert_eq!(turn.current_page(Phase::Intention), 1);
    assert!(turn.handle_drag(10.0, 300.0, fraction).is_empty());
}

#[test]
fn paging_pins_the_selection() {
    let mut turn = turn_with(&[Phase::Action]);
    assert!(!turn.is_selection_pinned());

    turn.advance_page(NavDirection::Next, &pages);
    assert!(turn.is_selection_pinned());

    turn.apply_event(&StreamEvent::running(Phase::Yield, "late"));
    assert_eq!(turn.selected_phase(), Phase::Action);
}

#[test]
fn visible_page_clamps_after_repagination() {
    let mut turn = turn_with(&[Phase::Intention]);
    turn.advance_page(NavDirection::Next, &pages);
    turn.advance_page(NavDirection::Next, &pages);
    assert_eq!(turn.current_page(Phase::Intention), 2);

    assert_eq!(turn.visible_page(Phase::Intention, 1), 0);
    assert_eq!(turn.visible_page(Phase::Intention, 0), 0);
    assert_eq!(turn.visible_page(Phase::Intention, 5), 2);
}

#[test]
fn navigation_on_empty_turn_is_a_noop() {
    let mut turn = Turn::new(TurnId(8), "prompt");
    assert!(turn.advance_page(NavDirection::Next, &pages).is_empty());
    assert!(turn.switch_phase(NavDirection::Previous).is_empty());
}
