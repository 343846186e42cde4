//! Terminal result of an encounter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// How an encounter ended.
///
/// The display term for each variant comes from the active profile
/// (`victory_term`, `defeat_term`, `fled_term`); the tag itself is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncounterOutcome {
    Victory,
    Defeat,
    Fled,
}

impl EncounterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Victory => "victory",
            Self::Defeat => "defeat",
            Self::Fled => "fled",
        }
    }
}

impl fmt::Display for EncounterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EncounterOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "victory" | "win" | "won" => Ok(Self::Victory),
            "defeat" | "loss" | "lost" => Ok(Self::Defeat),
            "fled" | "flee" | "escaped" | "retreat" => Ok(Self::Fled),
            other => Err(DomainError::parse(format!("Unknown encounter result: {}", other))),
        }
    }
}
