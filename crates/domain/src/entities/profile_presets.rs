//! Built-in encounter profiles.
//!
//! Presets are rebuilt on every call; they are never persisted and their ids
//! are reserved.

use crate::entities::profile::{EncounterProfile, ProfileVocabulary};
use crate::ids::ProfileId;

/// Id of the profile every failed resolution falls back to.
pub const DEFAULT_PROFILE_ID: &str = "combat";

/// Ids of all compiled-in presets, in listing order.
pub const PRESET_IDS: [&str; 4] = ["combat", "social", "stealth", "chase"];

pub fn is_preset_id(id: &ProfileId) -> bool {
    PRESET_IDS.contains(&id.as_str())
}

struct PresetDef {
    id: &'static str,
    name: &'static str,
    encounter_type: &'static str,
    goal: &'static str,
    stakes: &'static str,
    resource_interpretation: &'static str,
    action_interpretation: &'static str,
    status_interpretation: &'static str,
    summary_framing: &'static str,
    description: &'static str,
    vocabulary: [&'static str; 8],
}

const PRESETS: [PresetDef; 4] = [
    PresetDef {
        id: "combat",
        name: "Combat",
        encounter_type: "combat",
        goal: "defeat or drive off the opposing combatants",
        stakes: "high",
        resource_interpretation: "HP is physical health; reaching 0 means the combatant is down",
        action_interpretation: "attacks are weapons, spells and combat techniques",
        status_interpretation: "statuses are physical or magical conditions such as poisoned or stunned",
        summary_framing: "recount the battle, who fell, and what it cost the party",
        description: "A classic turn-based fight.",
        vocabulary: [
            "enemy", "enemies", "Party", "HP", "Attacks", "Victory", "Defeat", "Fled",
        ],
    },
    PresetDef {
        id: "social",
        name: "Social Confrontation",
        encounter_type: "social confrontation",
        goal: "win the argument or secure the concession the party wants",
        stakes: "medium",
        resource_interpretation: "HP is composure and resolve; reaching 0 means the participant concedes",
        action_interpretation: "attacks are arguments, appeals, threats and rhetorical moves",
        status_interpretation: "statuses are emotional states such as flustered or emboldened",
        summary_framing: "recount the exchange, the turning points, and what was agreed",
        description: "A debate, negotiation or interrogation fought with words.",
        vocabulary: [
            "opponent", "opponents", "Allies", "Composure", "Arguments", "Persuaded",
            "Rebuffed", "Walked Away",
        ],
    },
    PresetDef {
        id: "stealth",
        name: "Stealth Infiltration",
        encounter_type: "stealth infiltration",
        goal: "reach the objective without being discovered",
        stakes: "medium",
        resource_interpretation: "HP is remaining cover; reaching 0 means the intruder is spotted",
        action_interpretation: "attacks are sneaking, distractions, lockpicking and silent takedowns",
        status_interpretation: "statuses are alertness levels such as suspicious or alarmed",
        summary_framing: "recount the infiltration, close calls, and whether the objective was reached",
        description: "Slipping past guards and wards.",
        vocabulary: [
            "guard", "guards", "Infiltrators", "Cover", "Techniques", "Undetected", "Caught",
            "Retreated",
        ],
    },
    PresetDef {
        id: "chase",
        name: "Chase",
        encounter_type: "chase",
        goal: "catch the quarry or escape the pursuers",
        stakes: "medium",
        resource_interpretation: "HP is stamina and distance; reaching 0 means the runner is caught or gives up",
        action_interpretation: "attacks are sprints, shortcuts, obstacles and tricks",
        status_interpretation: "statuses are conditions such as winded, cornered or gaining ground",
        summary_framing: "recount the pursuit, the obstacles, and who got away",
        description: "A running pursuit through changing terrain.",
        vocabulary: [
            "pursuer", "pursuers", "Runners", "Stamina", "Maneuvers", "Escaped", "Caught",
            "Abandoned",
        ],
    },
];

fn build(def: &PresetDef) -> EncounterProfile {
    let [enemy_singular, enemy_plural, party_label, resource_label, action_section_label, victory_term, defeat_term, fled_term] =
        def.vocabulary;
    EncounterProfile {
        id: ProfileId::new(def.id),
        name: def.name.to_string(),
        encounter_type: def.encounter_type.to_string(),
        goal: def.goal.to_string(),
        stakes: def.stakes.to_string(),
        resource_interpretation: def.resource_interpretation.to_string(),
        action_interpretation: def.action_interpretation.to_string(),
        status_interpretation: def.status_interpretation.to_string(),
        summary_framing: def.summary_framing.to_string(),
        description: Some(def.description.to_string()),
        vocabulary: ProfileVocabulary {
            enemy_singular: enemy_singular.to_string(),
            enemy_plural: enemy_plural.to_string(),
            party_label: party_label.to_string(),
            resource_label: resource_label.to_string(),
            action_section_label: action_section_label.to_string(),
            victory_term: victory_term.to_string(),
            defeat_term: defeat_term.to_string(),
            fled_term: fled_term.to_string(),
        },
        is_preset: true,
    }
}

/// All presets, in listing order.
pub fn preset_profiles() -> Vec<EncounterProfile> {
    PRESETS.iter().map(build).collect()
}

pub fn preset_by_id(id: &ProfileId) -> Option<EncounterProfile> {
    PRESETS.iter().find(|def| def.id == id.as_str()).map(build)
}

/// The built-in Combat profile.
pub fn default_profile() -> EncounterProfile {
    build(&PRESETS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::Stakes;

    #[test]
    fn preset_ids_match_definitions() {
        let ids: Vec<_> = preset_profiles().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, PRESET_IDS.map(ProfileId::new).to_vec());
        assert_eq!(default_profile().id.as_str(), DEFAULT_PROFILE_ID);
    }

    #[test]
    fn presets_are_flagged_and_well_formed() {
        for preset in preset_profiles() {
            assert!(preset.is_preset);
            assert!(preset.stakes.parse::<Stakes>().is_ok());
            for (field, value) in preset.text_fields() {
                assert!(!value.trim().is_empty(), "{} empty in {}", field, preset.id);
                assert!(value.chars().count() <= 200);
            }
        }
    }

    #[test]
    fn lookup_only_finds_presets() {
        assert!(preset_by_id(&ProfileId::new("stealth")).is_some());
        assert!(preset_by_id(&ProfileId::new("custom-1")).is_none());
        assert!(is_preset_id(&ProfileId::new("chase")));
    }
}
