//! Encounter profile entity - the thematic vocabulary pack behind every prompt
//!
//! A profile says what kind of encounter is being run (a fight, a negotiation,
//! a chase), how the model should read the numbers on the combatants, and
//! which words the UI uses for enemies, the party and the possible endings.
//!
//! Profiles are either compiled-in presets (`is_preset = true`, immutable) or
//! user-authored custom profiles persisted in a [`ProfileLibrary`].

use serde::{Deserialize, Serialize};

use crate::ids::ProfileId;
use crate::value_objects::EncounterOutcome;

/// Words the renderer and prompts use in place of combat-specific terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileVocabulary {
    pub enemy_singular: String,
    pub enemy_plural: String,
    pub party_label: String,
    pub resource_label: String,
    pub action_section_label: String,
    pub victory_term: String,
    pub defeat_term: String,
    pub fled_term: String,
}

impl ProfileVocabulary {
    pub fn outcome_term(&self, outcome: EncounterOutcome) -> &str {
        match outcome {
            EncounterOutcome::Victory => &self.victory_term,
            EncounterOutcome::Defeat => &self.defeat_term,
            EncounterOutcome::Fled => &self.fled_term,
        }
    }
}

/// A full encounter profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterProfile {
    pub id: ProfileId,
    pub name: String,
    pub encounter_type: String,
    pub goal: String,
    /// One of `low`, `medium`, `high`. Kept as text so a bad value can be
    /// reported by validation instead of failing deserialization.
    pub stakes: String,
    pub resource_interpretation: String,
    pub action_interpretation: String,
    pub status_interpretation: String,
    pub summary_framing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub vocabulary: ProfileVocabulary,
    #[serde(default)]
    pub is_preset: bool,
}

impl EncounterProfile {
    /// Names of the fields that must be present and non-empty.
    pub const REQUIRED_FIELDS: [&'static str; 8] = [
        "name",
        "encounterType",
        "goal",
        "stakes",
        "resourceInterpretation",
        "actionInterpretation",
        "statusInterpretation",
        "summaryFraming",
    ];

    /// Every user-editable text field paired with its wire name.
    ///
    /// `description` is included only when set.
    pub fn text_fields(&self) -> Vec<(&'static str, &str)> {
        let v = &self.vocabulary;
        let mut fields = vec![
            ("name", self.name.as_str()),
            ("encounterType", self.encounter_type.as_str()),
            ("goal", self.goal.as_str()),
            ("stakes", self.stakes.as_str()),
            ("resourceInterpretation", self.resource_interpretation.as_str()),
            ("actionInterpretation", self.action_interpretation.as_str()),
            ("statusInterpretation", self.status_interpretation.as_str()),
            ("summaryFraming", self.summary_framing.as_str()),
            ("enemySingular", v.enemy_singular.as_str()),
            ("enemyPlural", v.enemy_plural.as_str()),
            ("partyLabel", v.party_label.as_str()),
            ("resourceLabel", v.resource_label.as_str()),
            ("actionSectionLabel", v.action_section_label.as_str()),
            ("victoryTerm", v.victory_term.as_str()),
            ("defeatTerm", v.defeat_term.as_str()),
            ("fledTerm", v.fled_term.as_str()),
        ];
        if let Some(description) = &self.description {
            fields.push(("description", description.as_str()));
        }
        fields
    }

    /// Apply `f` to every user-editable text field, `description` included.
    pub fn for_each_text_field_mut(&mut self, mut f: impl FnMut(&mut String)) {
        let v = &mut self.vocabulary;
        for field in [
            &mut self.name,
            &mut self.encounter_type,
            &mut self.goal,
            &mut self.stakes,
            &mut self.resource_interpretation,
            &mut self.action_interpretation,
            &mut self.status_interpretation,
            &mut self.summary_framing,
            &mut v.enemy_singular,
            &mut v.enemy_plural,
            &mut v.party_label,
            &mut v.resource_label,
            &mut v.action_section_label,
            &mut v.victory_term,
            &mut v.defeat_term,
            &mut v.fled_term,
        ] {
            f(field);
        }
        if let Some(description) = &mut self.description {
            f(description);
        }
    }

    /// `{PLACEHOLDER}` tokens this profile fills in prompt templates.
    pub fn placeholders(&self) -> [(&'static str, &str); 16] {
        let v = &self.vocabulary;
        [
            ("{PROFILE_NAME}", self.name.as_str()),
            ("{ENCOUNTER_TYPE}", self.encounter_type.as_str()),
            ("{GOAL}", self.goal.as_str()),
            ("{STAKES}", self.stakes.as_str()),
            ("{RESOURCE_INTERPRETATION}", self.resource_interpretation.as_str()),
            ("{ACTION_INTERPRETATION}", self.action_interpretation.as_str()),
            ("{STATUS_INTERPRETATION}", self.status_interpretation.as_str()),
            ("{SUMMARY_FRAMING}", self.summary_framing.as_str()),
            ("{ENEMY_SINGULAR}", v.enemy_singular.as_str()),
            ("{ENEMY_PLURAL}", v.enemy_plural.as_str()),
            ("{PARTY_LABEL}", v.party_label.as_str()),
            ("{RESOURCE_LABEL}", v.resource_label.as_str()),
            ("{ACTION_SECTION_LABEL}", v.action_section_label.as_str()),
            ("{VICTORY_TERM}", v.victory_term.as_str()),
            ("{DEFEAT_TERM}", v.defeat_term.as_str()),
            ("{FLED_TERM}", v.fled_term.as_str()),
        ]
    }

    pub fn outcome_term(&self, outcome: EncounterOutcome) -> &str {
        self.vocabulary.outcome_term(outcome)
    }

    /// Copy under a fresh custom id with `" (Copy)"` appended to the name.
    pub fn duplicate(&self) -> Self {
        let mut copy = self.clone();
        copy.id = ProfileId::generate();
        copy.name = format!("{} (Copy)", self.name);
        copy.is_preset = false;
        copy
    }

    pub fn to_export(&self) -> ProfileExport {
        ProfileExport {
            name: self.name.clone(),
            encounter_type: self.encounter_type.clone(),
            goal: self.goal.clone(),
            stakes: self.stakes.clone(),
            resource_interpretation: self.resource_interpretation.clone(),
            action_interpretation: self.action_interpretation.clone(),
            status_interpretation: self.status_interpretation.clone(),
            summary_framing: self.summary_framing.clone(),
            description: self.description.clone(),
        }
    }

    /// Build a custom profile from an export payload.
    ///
    /// The export format carries no vocabulary, so the caller supplies one
    /// (normally the default profile's). The result always gets a new id.
    pub fn from_export(export: ProfileExport, vocabulary: ProfileVocabulary) -> Self {
        Self {
            id: ProfileId::generate(),
            name: export.name,
            encounter_type: export.encounter_type,
            goal: export.goal,
            stakes: export.stakes,
            resource_interpretation: export.resource_interpretation,
            action_interpretation: export.action_interpretation,
            status_interpretation: export.status_interpretation,
            summary_framing: export.summary_framing,
            description: export.description,
            vocabulary,
            is_preset: false,
        }
    }
}

/// Minimal shareable form of a profile. Ids and preset flags never travel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileExport {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub encounter_type: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub stakes: String,
    #[serde(default)]
    pub resource_interpretation: String,
    #[serde(default)]
    pub action_interpretation: String,
    #[serde(default)]
    pub status_interpretation: String,
    #[serde(default)]
    pub summary_framing: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The persisted half of the registry: custom profiles and the global default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileLibrary {
    #[serde(default)]
    pub custom: Vec<EncounterProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile_id: Option<ProfileId>,
}

impl ProfileLibrary {
    pub fn find(&self, id: &ProfileId) -> Option<&EncounterProfile> {
        self.custom.iter().find(|p| &p.id == id)
    }

    pub fn position(&self, id: &ProfileId) -> Option<usize> {
        self.custom.iter().position(|p| &p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::profile_presets::default_profile;

    #[test]
    fn export_drops_identity() {
        let preset = default_profile();
        let json = serde_json::to_value(preset.to_export()).expect("serialize");
        assert!(json.get("id").is_none());
        assert!(json.get("isPreset").is_none());
        assert_eq!(json["encounterType"], preset.encounter_type.as_str());
    }

    #[test]
    fn from_export_assigns_fresh_custom_identity() {
        let preset = default_profile();
        let imported = EncounterProfile::from_export(preset.to_export(), preset.vocabulary.clone());
        assert_ne!(imported.id, preset.id);
        assert!(!imported.is_preset);
        assert_eq!(imported.goal, preset.goal);
    }

    #[test]
    fn vocabulary_is_flattened_on_the_wire() {
        let json = serde_json::to_value(default_profile()).expect("serialize");
        assert_eq!(json["enemySingular"], "enemy");
        assert!(json.get("vocabulary").is_none());
    }

    #[test]
    fn text_fields_cover_mutable_fields() {
        let mut profile = default_profile();
        profile.description = Some("d".into());
        let mut count = 0;
        profile.for_each_text_field_mut(|_| count += 1);
        assert_eq!(count, profile.text_fields().len());
    }
}
