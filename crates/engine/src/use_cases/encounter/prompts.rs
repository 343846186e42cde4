//! Encounter prompt compilation.
//!
//! All three prompts share one layout, in this order:
//!
//! 1. system preamble (profile-parameterized)
//! 2. world
//! 3. character roster
//! 4. user persona
//! 5. recent history
//! 6. encounter state block
//! 7. instructions (profile-parameterized, always last)
//!
//! The preamble becomes the system prompt; sections 2-7 form the single user
//! message. Builders are pure: the same inputs always give the same prompt.

use encounter_domain::{
    recent_history, EncounterProfile, EncounterSession, EncounterSettings, HistoryEntry,
    SessionError, TrackerSnapshot,
};

use super::context::PromptContext;
use crate::infrastructure::ports::{LlmRequest, Sampling};

/// Default prompt templates. `{PLACEHOLDER}` tokens are filled from the profile.
pub mod templates {
    pub const SYSTEM_PREAMBLE: &str = r#"You are the narrator of a {ENCOUNTER_TYPE} encounter inside an ongoing roleplay. The encounter profile is "{PROFILE_NAME}".

The {PARTY_LABEL} wants to {GOAL}. The stakes are {STAKES}.

How to read the numbers:
- {RESOURCE_LABEL}: {RESOURCE_INTERPRETATION}
- {ACTION_SECTION_LABEL}: {ACTION_INTERPRETATION}
- Status effects: {STATUS_INTERPRETATION}

There are no dice. You decide every outcome by narrative judgment, fairly and consistently with the numbers. Keep every {RESOURCE_LABEL} value between 0 and its maximum."#;

    pub const INIT_INSTRUCTIONS: &str = r#"Set up the encounter started by the triggering message above.

List the {PARTY_LABEL} with the user's own character first and marked "isPlayer": true, then the {ENEMY_PLURAL}. Give each combatant {RESOURCE_LABEL} as hp/maxHp, their {ACTION_SECTION_LABEL} as attacks, and any status effects. Characters who might join later go in pendingEnemies or pendingParty instead.

Respond with one JSON object and nothing else:
{
  "combatStats": {
    "environment": "short description of the surroundings",
    "party": [
      {"name": "...", "hp": 20, "maxHp": 20, "attacks": [{"name": "...", "effect": "..."}], "statuses": [{"tag": "...", "glyph": "..."}], "isPlayer": true}
    ],
    "enemies": [
      {"name": "...", "hp": 10, "maxHp": 10, "attacks": [], "statuses": []}
    ]
  },
  "narrative": "A short opening narration.",
  "pendingEnemies": [],
  "pendingParty": []
}"#;

    pub const ACTION_INSTRUCTIONS: &str = r#"Resolve the user's action as the next turn. Narrate what it achieves, then let the {ENEMY_PLURAL} and the rest of the {PARTY_LABEL} respond. Update {RESOURCE_LABEL}, statuses and resource bars to match what happened.

Only end the encounter once it is decided. Use "victory" when the {PARTY_LABEL} achieves its goal ({VICTORY_TERM}), "defeat" when it fails ({DEFEAT_TERM}) and "fled" when it withdraws ({FLED_TERM}).

Respond with one JSON object and nothing else:
{
  "narrative": "What happens this turn.",
  "combatStats": {
    "environment": "...",
    "party": [
      {"name": "...", "hp": 14, "maxHp": 20, "attacks": [{"name": "...", "effect": "..."}], "statuses": [], "isPlayer": true}
    ],
    "enemies": [
      {"name": "...", "hp": 3, "maxHp": 10, "attacks": [], "statuses": [{"tag": "...", "glyph": "..."}]}
    ]
  },
  "enemyActions": ["One line per {ENEMY_SINGULAR} that acted."],
  "partyActions": ["One line per ally that acted."],
  "combatEnd": false,
  "result": null
}
combatStats must be the complete updated state, in the same shape as the current state: every combatant on both sides, the user's own character included and still marked "isPlayer": true."#;

    pub const SUMMARY_INSTRUCTIONS: &str = r#"The encounter is over. Write a concise summary for the ongoing story: {SUMMARY_FRAMING}. Write plain prose, not JSON."#;

    pub const SUMMARY_TRACKER_INSTRUCTIONS: &str = r#"After the summary, output the updated tracker between <tracker> and </tracker> tags. Start from the tracker shown above and apply what changed during the encounter, keeping its layout."#;
}

/// A compiled prompt: system preamble plus one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPrompt {
    pub system: String,
    pub user: String,
}

impl CompiledPrompt {
    /// Flat single-string form.
    pub fn to_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }

    pub fn to_request(&self, temperature: f32, max_tokens: u32) -> LlmRequest {
        LlmRequest::single_turn(
            self.system.as_str(),
            self.user.as_str(),
            Sampling {
                temperature,
                max_tokens,
            },
        )
    }
}

/// Replace every profile `{PLACEHOLDER}` in `template`. Unknown tokens stay.
pub fn fill_placeholders(template: &str, profile: &EncounterProfile) -> String {
    profile
        .placeholders()
        .iter()
        .fold(template.to_string(), |text, (token, value)| {
            text.replace(token, value)
        })
}

/// Prompt that asks the model to set up the encounter.
pub fn build_init_prompt(
    profile: &EncounterProfile,
    context: &PromptContext,
    settings: &EncounterSettings,
    session: &EncounterSession,
) -> CompiledPrompt {
    let mut state = Vec::new();
    if let Some(tracker) = session.tracker_baseline().filter(|t| !t.is_empty()) {
        state.push(format!("Current tracker:\n{}", tracker.render()));
    }
    state.push(format!(
        "Triggering message:\n{}",
        session.start_message().unwrap_or_default()
    ));

    compile(
        profile,
        context,
        settings,
        session.pre_encounter_history(),
        state.join("\n\n"),
        fill_placeholders(templates::INIT_INSTRUCTIONS, profile),
    )
}

/// Prompt for one turn. `replay_of` names the turn being regenerated; the
/// prompt then sees the history and stats from before that turn.
pub fn build_action_prompt(
    profile: &EncounterProfile,
    context: &PromptContext,
    settings: &EncounterSettings,
    session: &EncounterSession,
    action: &str,
    replay_of: Option<usize>,
) -> Result<CompiledPrompt, SessionError> {
    let entry = replay_of.unwrap_or_else(|| session.encounter_log().len());
    let stats = session
        .stats_before_turn(entry)
        .ok_or(SessionError::NoCombatStats)?;
    let stats_json = serde_json::to_string_pretty(stats).unwrap_or_default();

    let history: Vec<HistoryEntry> = session
        .pre_encounter_history()
        .iter()
        .chain(session.history_before_turn(entry))
        .cloned()
        .collect();

    let state = format!(
        "Triggering message:\n{}\n\nCurrent state:\n{}\n\nThe user's action:\n{}",
        session.start_message().unwrap_or_default(),
        stats_json,
        action.trim()
    );
    let instructions = format!(
        "{}\n\n{}",
        fill_placeholders(templates::ACTION_INSTRUCTIONS, profile),
        settings.narrative_style.directive()
    );

    Ok(compile(profile, context, settings, &history, state, instructions))
}

/// Prompt for the closing summary, with a tracker update in combined mode.
pub fn build_summary_prompt(
    profile: &EncounterProfile,
    context: &PromptContext,
    settings: &EncounterSettings,
    session: &EncounterSession,
) -> CompiledPrompt {
    let log = session
        .encounter_log()
        .current_values()
        .enumerate()
        .map(|(i, record)| format!("{}. Action: {}\n   Result: {}", i + 1, record.action, record.result))
        .collect::<Vec<_>>();
    let result = session
        .outcome()
        .map(|o| format!("{} ({})", profile.outcome_term(o), o))
        .unwrap_or_else(|| "undecided".to_string());

    let mut state = vec![
        format!(
            "Triggering message:\n{}",
            session.start_message().unwrap_or_default()
        ),
        if log.is_empty() {
            "Encounter log:\n(no turns were taken)".to_string()
        } else {
            format!("Encounter log:\n{}", log.join("\n"))
        },
        format!("Result: {}", result),
    ];

    let mut instructions = fill_placeholders(templates::SUMMARY_INSTRUCTIONS, profile);
    if settings.combined_tracker_mode {
        let baseline = session
            .tracker_baseline()
            .filter(|t| !t.is_empty())
            .map(TrackerSnapshot::render)
            .unwrap_or_else(|| "(empty)".to_string());
        state.push(format!("Tracker before the encounter:\n{}", baseline));
        instructions.push_str("\n\n");
        instructions.push_str(templates::SUMMARY_TRACKER_INSTRUCTIONS);
    }

    compile(
        profile,
        context,
        settings,
        session.pre_encounter_history(),
        state.join("\n\n"),
        instructions,
    )
}

fn compile(
    profile: &EncounterProfile,
    context: &PromptContext,
    settings: &EncounterSettings,
    history: &[HistoryEntry],
    state: String,
    instructions: String,
) -> CompiledPrompt {
    let sections = [
        ("World", context.world_section()),
        ("Characters", context.roster_section()),
        ("Persona", context.persona_section()),
        ("Recent History", render_history(history, settings.history_turns)),
        ("Encounter", Some(state)),
        ("Instructions", Some(instructions)),
    ];

    let user = sections
        .into_iter()
        .filter_map(|(heading, body)| body.map(|body| format!("## {}\n{}", heading, body)))
        .collect::<Vec<_>>()
        .join("\n\n");

    CompiledPrompt {
        system: fill_placeholders(templates::SYSTEM_PREAMBLE, profile),
        user,
    }
}

fn render_history(history: &[HistoryEntry], limit: usize) -> Option<String> {
    let recent = recent_history(history, limit);
    if recent.is_empty() {
        return None;
    }
    Some(
        recent
            .iter()
            .map(|entry| format!("{}: {}", entry.label(), entry.content.trim()))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::use_cases::encounter::context::CharacterCard;
    use chrono::Utc;
    use encounter_domain::{
        default_profile, preset_by_id, ChatId, CombatStats, Combatant, EncounterOutcome,
        EncounterStart, InitialEncounter, ProfileId, TurnResult,
    };

    fn context() -> PromptContext {
        PromptContext::new()
            .with_world("A drowned kingdom of bell towers.")
            .with_character(CharacterCard::new("Bram", "A tired sellsword."))
            .with_persona(CharacterCard::new("Aria", "A young cartographer."))
    }

    fn session() -> EncounterSession {
        let mut session = EncounterSession::new(ChatId::new("chat-1"));
        session
            .begin_initialization(
                EncounterStart {
                    start_message: "The bell-wraiths rise from the water!".into(),
                    history: (0..15)
                        .map(|i| HistoryEntry::user(format!("message {i}")))
                        .collect(),
                    tracker_baseline: Some(TrackerSnapshot {
                        user_stats: "HP 20/20".into(),
                        ..Default::default()
                    }),
                    profile_override: None,
                },
                Utc::now(),
            )
            .expect("starts");
        session
    }

    fn active_session() -> EncounterSession {
        let mut session = session();
        session
            .apply_initial_state(InitialEncounter {
                combat_stats: CombatStats::new("Flooded nave")
                    .with_party_member(Combatant::player("Aria", 20))
                    .with_enemy(Combatant::new("Bell-wraith", 12)),
                narrative: Some("Cold water churns.".into()),
                ..Default::default()
            })
            .expect("state applies");
        session.activate().expect("activates");
        session
    }

    fn position(haystack: &str, needle: &str) -> usize {
        haystack
            .find(needle)
            .unwrap_or_else(|| panic!("missing {needle:?} in prompt"))
    }

    #[test]
    fn sections_follow_fixed_order() {
        let prompt = build_init_prompt(
            &default_profile(),
            &context(),
            &EncounterSettings::default(),
            &session(),
        );
        let user = &prompt.user;
        let order = [
            "## World",
            "## Characters",
            "## Persona",
            "## Recent History",
            "## Encounter",
            "## Instructions",
        ];
        let positions: Vec<_> = order.iter().map(|h| position(user, h)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert!(user.contains("The bell-wraiths rise from the water!"));
        assert!(user.contains("[User Stats]\nHP 20/20"));
    }

    #[test]
    fn history_is_truncated_to_setting() {
        let settings = EncounterSettings {
            history_turns: 3,
            ..Default::default()
        };
        let prompt = build_init_prompt(&default_profile(), &context(), &settings, &session());
        assert!(prompt.user.contains("User: message 14"));
        assert!(prompt.user.contains("User: message 12"));
        assert!(!prompt.user.contains("User: message 11"));
    }

    #[test]
    fn placeholders_come_from_profile() {
        let social = preset_by_id(&ProfileId::new("social")).expect("preset");
        let prompt = build_init_prompt(
            &social,
            &PromptContext::new(),
            &EncounterSettings::default(),
            &session(),
        );
        assert!(prompt.system.contains("social confrontation encounter"));
        assert!(prompt.system.contains("Composure: HP is composure"));
        assert!(!prompt.to_text().contains("{RESOURCE_LABEL}"));
        assert!(!prompt.to_text().contains("{ENEMY_PLURAL}"));
    }

    #[test]
    fn action_prompt_carries_stats_action_and_style() {
        let session = active_session();
        let prompt = build_action_prompt(
            &default_profile(),
            &context(),
            &EncounterSettings::default(),
            &session,
            "I ring the great bell.",
            None,
        )
        .expect("stats present");

        assert!(prompt.user.contains("\"name\": \"Bell-wraith\""));
        assert!(!prompt.to_text().contains("\"party\": []"));
        assert!(prompt.to_text().contains("still marked \"isPlayer\": true"));
        assert!(prompt.user.contains("The user's action:\nI ring the great bell."));
        assert!(prompt.user.contains("Narrator: Cold water churns."));
        assert!(prompt
            .user
            .ends_with(&EncounterSettings::default().narrative_style.directive()));
    }

    #[test]
    fn replay_prompt_uses_state_before_the_turn() {
        let mut session = active_session();
        let mut hurt = session.combat_stats().cloned().expect("stats");
        hurt.enemies[0].hp = 1;
        session
            .record_turn(TurnResult {
                action: "I ring the great bell.".into(),
                narrative: "The wraith shatters into spray.".into(),
                combat_stats: Some(hurt),
                ..Default::default()
            })
            .expect("recorded");

        let prompt = build_action_prompt(
            &default_profile(),
            &PromptContext::new(),
            &EncounterSettings::default(),
            &session,
            "I ring the great bell.",
            Some(0),
        )
        .expect("stats present");
        assert!(prompt.user.contains("\"hp\": 12"));
        assert!(!prompt.user.contains("shatters into spray"));
    }

    #[test]
    fn action_prompt_requires_stats() {
        let result = build_action_prompt(
            &default_profile(),
            &PromptContext::new(),
            &EncounterSettings::default(),
            &session(),
            "Run",
            None,
        );
        assert_eq!(result, Err(SessionError::NoCombatStats));
    }

    #[test]
    fn summary_prompt_lists_log_and_result() {
        let mut session = active_session();
        session
            .record_turn(TurnResult {
                action: "I ring the great bell.".into(),
                narrative: "The wraith shatters.".into(),
                outcome: Some(EncounterOutcome::Victory),
                ..Default::default()
            })
            .expect("recorded");

        let plain = build_summary_prompt(
            &default_profile(),
            &PromptContext::new(),
            &EncounterSettings::default(),
            &session,
        );
        assert!(plain
            .user
            .contains("1. Action: I ring the great bell.\n   Result: The wraith shatters."));
        assert!(plain.user.contains("Result: Victory (victory)"));
        assert!(!plain.user.contains("<tracker>"));

        let combined = build_summary_prompt(
            &default_profile(),
            &PromptContext::new(),
            &EncounterSettings {
                combined_tracker_mode: true,
                ..Default::default()
            },
            &session,
        );
        assert!(combined
            .user
            .contains("Tracker before the encounter:\n[User Stats]\nHP 20/20"));
        assert!(combined.user.contains("<tracker>"));
    }
}
