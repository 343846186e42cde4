//! Payloads stored in the encounter's two branch logs.

use serde::{Deserialize, Serialize};

use super::outcome::EncounterOutcome;

/// One resolved turn: what the user did and what the narrator said happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action: String,
    pub result: String,
    /// Set on the turn that ended the encounter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EncounterOutcome>,
}

impl ActionRecord {
    pub fn new(action: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            result: result.into(),
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: Option<EncounterOutcome>) -> Self {
        self.outcome = outcome;
        self
    }
}

/// What kind of line the renderer is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayKind {
    /// Opening narration produced by initialization.
    Intro,
    /// The user's own action text.
    Action,
    /// Narrator output for a turn.
    Narrative,
}

/// A single line of the rendered encounter transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayLine {
    pub kind: DisplayKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enemy_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub party_actions: Vec<String>,
}

impl DisplayLine {
    pub fn new(kind: DisplayKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            enemy_actions: Vec::new(),
            party_actions: Vec::new(),
        }
    }

    pub fn intro(message: impl Into<String>) -> Self {
        Self::new(DisplayKind::Intro, message)
    }

    pub fn action(message: impl Into<String>) -> Self {
        Self::new(DisplayKind::Action, message)
    }

    pub fn narrative(
        message: impl Into<String>,
        enemy_actions: Vec<String>,
        party_actions: Vec<String>,
    ) -> Self {
        Self {
            kind: DisplayKind::Narrative,
            message: message.into(),
            enemy_actions,
            party_actions,
        }
    }
}
