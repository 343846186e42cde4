//! Response parsing: untrusted model text in, typed results out.
//!
//! Every response goes through [`extract_json`]: strip code fences, take the
//! slice from the first `{` to the last `}` and parse it strictly. Anything
//! that fails is logged with the raw response and comes back as `None`.
//! Individual fields are read leniently; a missing or malformed field falls
//! back to its default instead of rejecting the whole response.

use std::str::FromStr;
use std::sync::LazyLock;

use encounter_domain::{
    CombatStats, Combatant, EncounterOutcome, InitialEncounter, TrackerSnapshot, TurnResult,
};
use regex_lite::Regex;
use serde_json::{Map, Value};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*").expect("valid regex"));

static TRACKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tracker>(.*?)</tracker>").expect("valid regex"));

static TRACKER_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\[(User Stats|Info Box|Present Characters)\]\s*$").expect("valid regex")
});

/// The `{...}` candidate inside a model response, fences removed.
pub fn extract_json(response: &str) -> Option<String> {
    let stripped = FENCE_RE.replace_all(response, "");
    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    (end > start).then(|| stripped[start..=end].to_string())
}

fn parse_object(response: &str, kind: &'static str) -> Option<Map<String, Value>> {
    let Some(json) = extract_json(response) else {
        tracing::warn!(kind, response = %response, "No JSON object in model response");
        return None;
    };
    match serde_json::from_str::<Value>(&json) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            tracing::warn!(kind, response = %response, "Model response JSON is not an object");
            None
        }
        Err(e) => {
            tracing::warn!(
                kind,
                error = %e,
                response = %response,
                "Failed to parse model response as JSON"
            );
            None
        }
    }
}

// =============================================================================
// Action responses
// =============================================================================

/// One parsed turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionResult {
    pub narrative: String,
    /// Normalized; `None` when the model sent no usable stats.
    pub combat_stats: Option<CombatStats>,
    pub enemy_actions: Vec<String>,
    pub party_actions: Vec<String>,
    pub combat_end: bool,
    pub result: Option<EncounterOutcome>,
}

impl ActionResult {
    /// Pair with the action that produced it.
    ///
    /// An ending without a recognizable result falls back to the outcome the
    /// stats imply (`previous` when the turn carried none). If that is also
    /// undecided, play continues.
    pub fn into_turn(self, action: &str, previous: Option<&CombatStats>) -> TurnResult {
        let outcome = if self.combat_end {
            let inferred = self.result.or_else(|| {
                self.combat_stats
                    .as_ref()
                    .or(previous)
                    .and_then(CombatStats::implied_outcome)
            });
            if inferred.is_none() {
                tracing::warn!("Model ended the encounter without a usable result, continuing");
            }
            inferred
        } else {
            None
        };

        TurnResult {
            action: action.trim().to_string(),
            narrative: self.narrative,
            combat_stats: self.combat_stats,
            enemy_actions: self.enemy_actions,
            party_actions: self.party_actions,
            outcome,
        }
    }
}

/// Parse an action response. `None` when no JSON object can be recovered.
pub fn parse_action_result(response: &str) -> Option<ActionResult> {
    let map = parse_object(response, "action")?;

    let result = match map.get("result") {
        Some(Value::String(tag)) if !tag.trim().is_empty() => {
            match EncounterOutcome::from_str(tag) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unrecognized encounter result");
                    None
                }
            }
        }
        _ => None,
    };

    Some(ActionResult {
        narrative: string_field(&map, "narrative"),
        combat_stats: map.get("combatStats").and_then(parse_stats),
        enemy_actions: string_list(map.get("enemyActions")),
        party_actions: string_list(map.get("partyActions")),
        combat_end: bool_field(&map, "combatEnd"),
        result,
    })
}

// =============================================================================
// Initialization responses
// =============================================================================

/// Parse an initialization response. Requires usable `combatStats`.
pub fn parse_initial_state(response: &str) -> Option<InitialEncounter> {
    let map = parse_object(response, "init")?;
    let Some(combat_stats) = map.get("combatStats").and_then(parse_stats) else {
        tracing::warn!(response = %response, "Init response has no usable combatStats");
        return None;
    };

    let narrative = string_field(&map, "narrative");
    Some(InitialEncounter {
        combat_stats,
        narrative: (!narrative.trim().is_empty()).then_some(narrative),
        pending_enemies: combatants(map.get("pendingEnemies")),
        pending_party: combatants(map.get("pendingParty")),
    })
}

// =============================================================================
// Summary responses
// =============================================================================

/// Summary prose plus the tracker update requested in combined mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryParts {
    pub summary: String,
    pub tracker: Option<TrackerSnapshot>,
}

/// Split a summary response. Prose is taken as-is; a JSON `{"summary": ...}`
/// wrapper is unwrapped.
pub fn split_summary(response: &str) -> SummaryParts {
    let tracker = TRACKER_RE
        .captures(response)
        .and_then(|caps| caps.get(1))
        .map(|body| parse_tracker(body.as_str()));
    let prose = TRACKER_RE.replace_all(response, "");
    let prose = prose.trim();

    let summary = extract_json(prose)
        .and_then(|json| serde_json::from_str::<Value>(&json).ok())
        .and_then(|value| value.get("summary").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| FENCE_RE.replace_all(prose, "").trim().to_string());

    SummaryParts {
        summary,
        tracker: tracker.filter(|t| !t.is_empty()),
    }
}

/// Tracker text from the model. Labelled blocks map onto their fields;
/// unlabelled text is taken as the user stats block.
fn parse_tracker(body: &str) -> TrackerSnapshot {
    let mut snapshot = TrackerSnapshot::default();
    let headers: Vec<_> = TRACKER_BLOCK_RE.captures_iter(body).collect();
    if headers.is_empty() {
        snapshot.user_stats = body.trim().to_string();
        return snapshot;
    }

    for (i, caps) in headers.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(body.len(), |m| m.start());
        let text = body[whole.end()..end].trim().to_string();
        match label.as_str() {
            "User Stats" => snapshot.user_stats = text,
            "Info Box" => snapshot.info_box = text,
            _ => snapshot.character_thoughts = text,
        }
    }
    snapshot
}

// =============================================================================
// Lenient field readers
// =============================================================================

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_field(map: &Map<String, Value>, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_stats(value: &Value) -> Option<CombatStats> {
    let map = value.as_object()?;
    let stats = CombatStats {
        environment: string_field(map, "environment"),
        party: combatants(map.get("party")),
        enemies: combatants(map.get("enemies")),
    };
    Some(stats.normalized())
}

/// Combatants parsed one by one so a single bad entry doesn't sink the list.
fn combatants(value: Option<&Value>) -> Vec<Combatant> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Combatant>(item.clone()) {
            Ok(mut combatant) => {
                combatant.normalize();
                Some(combatant)
            }
            Err(e) => {
                tracing::warn!(error = %e, entry = %item, "Skipping malformed combatant");
                None
            }
        })
        .collect()
}
