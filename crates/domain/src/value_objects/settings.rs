//! Encounter settings value object
//!
//! Settings carry serde derives so hosts can persist them next to their own
//! configuration. Every field has a default; `from_env` overlays
//! `ENCOUNTER_*` environment variables on top of those defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// Grammatical tense the narrator writes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tense {
    Past,
    #[default]
    Present,
}

/// Grammatical person the narrator addresses the player in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Person {
    First,
    #[default]
    Second,
    Third,
}

/// Whether narration sticks to one viewpoint or roams the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NarrationMode {
    #[default]
    Limited,
    Omniscient,
}

macro_rules! impl_lowercase_enum {
    ($ty:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::parse(format!(concat!("Unknown ", $label, ": {}"), other))),
                }
            }
        }
    };
}

impl_lowercase_enum!(Tense, "tense", { Past => "past", Present => "present" });
impl_lowercase_enum!(Person, "person", { First => "first", Second => "second", Third => "third" });
impl_lowercase_enum!(NarrationMode, "narration mode", { Limited => "limited", Omniscient => "omniscient" });

/// How the narrator should write encounter prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeStyle {
    #[serde(default)]
    pub tense: Tense,
    #[serde(default)]
    pub person: Person,
    #[serde(default)]
    pub narration_mode: NarrationMode,
    /// Character whose viewpoint limited narration follows. `None` means the player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_of_view: Option<String>,
}

impl NarrativeStyle {
    /// One-paragraph directive appended to action prompts.
    pub fn directive(&self) -> String {
        let viewpoint = match (self.narration_mode, &self.point_of_view) {
            (NarrationMode::Omniscient, _) => {
                "an omniscient narrator who may reveal anything in the scene".to_string()
            }
            (NarrationMode::Limited, Some(pov)) if !pov.trim().is_empty() => {
                format!("a limited narrator following {}", pov.trim())
            }
            (NarrationMode::Limited, _) => "a limited narrator following the player".to_string(),
        };
        format!(
            "Write the narrative in {} tense, {} person, as {}.",
            self.tense, self.person, viewpoint
        )
    }
}

/// All configurable encounter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterSettings {
    /// Number of recent chat messages included in prompts
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    #[serde(default)]
    pub narrative_style: NarrativeStyle,

    /// Ask for an updated tracker block together with the summary
    #[serde(default)]
    pub combined_tracker_mode: bool,

    // ============================================================================
    // LLM Settings
    // ============================================================================
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_action_max_tokens")]
    pub action_max_tokens: u32,

    #[serde(default = "default_init_max_tokens")]
    pub init_max_tokens: u32,

    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

fn default_history_turns() -> usize { 10 }
fn default_temperature() -> f32 { 0.8 }
fn default_action_max_tokens() -> u32 { 1200 }
fn default_init_max_tokens() -> u32 { 1600 }
fn default_summary_max_tokens() -> u32 { 900 }

impl Default for EncounterSettings {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            narrative_style: NarrativeStyle::default(),
            combined_tracker_mode: false,
            temperature: default_temperature(),
            action_max_tokens: default_action_max_tokens(),
            init_max_tokens: default_init_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

impl EncounterSettings {
    /// Load from environment variables, using defaults for missing values
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let style = defaults.narrative_style.clone();

        Self {
            history_turns: env_or("ENCOUNTER_HISTORY_TURNS", defaults.history_turns),
            narrative_style: NarrativeStyle {
                tense: env_or("ENCOUNTER_TENSE", style.tense),
                person: env_or("ENCOUNTER_PERSON", style.person),
                narration_mode: env_or("ENCOUNTER_NARRATION_MODE", style.narration_mode),
                point_of_view: std::env::var("ENCOUNTER_POINT_OF_VIEW")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
            },
            combined_tracker_mode: env_or("ENCOUNTER_COMBINED_TRACKER", defaults.combined_tracker_mode),
            temperature: env_or("ENCOUNTER_TEMPERATURE", defaults.temperature),
            action_max_tokens: env_or("ENCOUNTER_ACTION_MAX_TOKENS", defaults.action_max_tokens),
            init_max_tokens: env_or("ENCOUNTER_INIT_MAX_TOKENS", defaults.init_max_tokens),
            summary_max_tokens: env_or("ENCOUNTER_SUMMARY_MAX_TOKENS", defaults.summary_max_tokens),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let settings: EncounterSettings =
            serde_json::from_str(r#"{"historyTurns": 4}"#).expect("valid settings");
        assert_eq!(settings.history_turns, 4);
        assert_eq!(settings.action_max_tokens, 1200);
        assert!(!settings.combined_tracker_mode);
    }

    #[test]
    fn directive_reflects_style() {
        let style = NarrativeStyle {
            tense: Tense::Past,
            person: Person::Third,
            narration_mode: NarrationMode::Limited,
            point_of_view: Some("Bram".into()),
        };
        assert_eq!(
            style.directive(),
            "Write the narrative in past tense, third person, as a limited narrator following Bram."
        );
    }

    #[test]
    fn style_enums_parse_from_env_text() {
        assert_eq!("Omniscient".parse(), Ok(NarrationMode::Omniscient));
        assert_eq!("first".parse(), Ok(Person::First));
        assert!("future".parse::<Tense>().is_err());
    }
}
