//! Fixed, ordered registry of response phases.
//!
//! Ordering is the declaration order of [`Phase`]. `next`/`previous` stop at
//! the natural ends; only the carousel uses the `wrap_*` pair, which treats
//! `yield` and `action` as adjacent.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Action,
    ExperienceVectors,
    ExperienceWeb,
    Intention,
    Observation,
    Understanding,
    Yield,
}

/// Pre-split phase set where both experience sources were a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyPhase {
    Action,
    Experience,
    Intention,
    Observation,
    Understanding,
    Yield,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Action,
        Phase::ExperienceVectors,
        Phase::ExperienceWeb,
        Phase::Intention,
        Phase::Observation,
        Phase::Understanding,
        Phase::Yield,
    ];

    pub const FIRST: Phase = Phase::Action;
    pub const LAST: Phase = Phase::Yield;

    pub fn order(self) -> usize {
        match self {
            Phase::Action => 0,
            Phase::ExperienceVectors => 1,
            Phase::ExperienceWeb => 2,
            Phase::Intention => 3,
            Phase::Observation => 4,
            Phase::Understanding => 5,
            Phase::Yield => 6,
        }
    }

    pub fn from_order(order: usize) -> Option<Phase> {
        Self::ALL.get(order).copied()
    }

    pub fn next(self) -> Option<Phase> {
        Self::from_order(self.order() + 1)
    }

    pub fn previous(self) -> Option<Phase> {
        self.order().checked_sub(1).and_then(Self::from_order)
    }

    pub fn wrap_next(self) -> Phase {
        self.next().unwrap_or(Self::FIRST)
    }

    pub fn wrap_previous(self) -> Phase {
        self.previous().unwrap_or(Self::LAST)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Phase::Action => "Action",
            Phase::ExperienceVectors => "Experience · Memory",
            Phase::ExperienceWeb => "Experience · Web",
            Phase::Intention => "Intention",
            Phase::Observation => "Observation",
            Phase::Understanding => "Understanding",
            Phase::Yield => "Yield",
        }
    }

    pub fn icon_key(self) -> &'static str {
        match self {
            Phase::Action => "bolt",
            Phase::ExperienceVectors => "brain",
            Phase::ExperienceWeb => "globe",
            Phase::Intention => "target",
            Phase::Observation => "eye",
            Phase::Understanding => "lightbulb",
            Phase::Yield => "checkmark.seal",
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Phase::Action => "action",
            Phase::ExperienceVectors => "experience_vectors",
            Phase::ExperienceWeb => "experience_web",
            Phase::Intention => "intention",
            Phase::Observation => "observation",
            Phase::Understanding => "understanding",
            Phase::Yield => "yield",
        }
    }

    /// Resolves a wire phase name. The legacy `experience` name lands on
    /// `experience_vectors`; anything unrecognized is `None`.
    pub fn from_wire(name: &str) -> Option<Phase> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("experience") {
            return Some(Phase::ExperienceVectors);
        }
        Self::ALL
            .into_iter()
            .find(|phase| phase.wire_name().eq_ignore_ascii_case(name))
    }

    pub fn is_experience(self) -> bool {
        matches!(self, Phase::ExperienceVectors | Phase::ExperienceWeb)
    }

    pub fn legacy(self) -> LegacyPhase {
        LegacyPhase::from(self)
    }
}

impl From<Phase> for LegacyPhase {
    fn from(value: Phase) -> Self {
        match value {
            Phase::Action => LegacyPhase::Action,
            Phase::ExperienceVectors | Phase::ExperienceWeb => LegacyPhase::Experience,
            Phase::Intention => LegacyPhase::Intention,
            Phase::Observation => LegacyPhase::Observation,
            Phase::Understanding => LegacyPhase::Understanding,
            Phase::Yield => LegacyPhase::Yield,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
