//! Encounter session events
//!
//! These enums communicate what happened when the session was mutated,
//! allowing callers to log, persist or re-render appropriately.

use crate::aggregates::EncounterState;
use crate::value_objects::{CombatSide, EncounterOutcome};

/// A state machine transition that actually took place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: EncounterState,
    pub to: EncounterState,
}

/// Outcome of a combatant mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatantChange {
    Added { side: CombatSide, index: usize },
    Updated { side: CombatSide, index: usize },
    Removed { side: CombatSide, name: String },
}

/// Outcome of resolving an AI-suggested combatant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingResolution {
    /// Moved into the combat stats at `index`
    Approved { side: CombatSide, name: String, index: usize },
    Dismissed { side: CombatSide, name: String },
}

/// Outcome of recording a turn or an alternative of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRecorded {
    /// Play continues
    Continued { entry_index: usize, swipe_index: usize },
    /// The recorded alternative ended the encounter
    Ended {
        entry_index: usize,
        swipe_index: usize,
        outcome: EncounterOutcome,
    },
}

impl TurnRecorded {
    pub fn entry_index(&self) -> usize {
        match self {
            Self::Continued { entry_index, .. } | Self::Ended { entry_index, .. } => *entry_index,
        }
    }

    pub fn swipe_index(&self) -> usize {
        match self {
            Self::Continued { swipe_index, .. } | Self::Ended { swipe_index, .. } => *swipe_index,
        }
    }

    pub fn outcome(&self) -> Option<EncounterOutcome> {
        match self {
            Self::Continued { .. } => None,
            Self::Ended { outcome, .. } => Some(*outcome),
        }
    }
}
