//! Encounter use cases.
//!
//! [`EncounterOps`] drives one [`EncounterSession`] per chat through its
//! lifecycle: compile a prompt, ask the model, parse the answer, apply it and
//! save a snapshot.
//!
//! Generation runs against a copy of the session taken when the prompt is
//! compiled. The copy is only swapped in if the live session is still the one
//! the prompt was built from, so a failed or abandoned request never leaves a
//! half-applied state behind. Only one generation may be in flight per chat.

pub mod context;
pub mod parser;
pub mod prompts;

use std::sync::Arc;

use encounter_domain::{
    ArchiveRecord, ChatId, CombatSide, CombatantChange, Combatant, EncounterOutcome,
    EncounterSession, EncounterSettings, EncounterStart, EncounterState, PendingResolution,
    ProfileId, SessionError, SessionSnapshot, StateTransition, TrackerSnapshot, TurnRecorded,
};

use crate::infrastructure::ports::{
    ClockPort, EncounterArchiveRepo, LlmError, LlmPort, SessionSnapshotStore, TrackerSnapshotPort,
};
use crate::stores::{EncounterContext, EncounterContexts};
use crate::use_cases::profiles::ProfileOps;
use crate::use_cases::validation::{require_non_empty, ValidationError};

pub use context::{CharacterCard, PromptContext};
pub use parser::{
    extract_json, parse_action_result, parse_initial_state, split_summary, ActionResult,
    SummaryParts,
};
pub use prompts::{
    build_action_prompt, build_init_prompt, build_summary_prompt, fill_placeholders,
    CompiledPrompt,
};

/// A mutation that went through, and whether its snapshot was saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub value: T,
    /// `false` when the auto-save failed. The live session is updated either way.
    pub persisted: bool,
}

/// What remains once an encounter is concluded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcludedEncounter {
    pub record: ArchiveRecord,
    /// Updated tracker from the summary response (combined mode only).
    pub tracker: Option<TrackerSnapshot>,
    /// `false` when the record could not be added to the chat archive.
    pub archived: bool,
}

/// Encounter lifecycle operations for every chat.
pub struct EncounterOps {
    contexts: Arc<EncounterContexts>,
    profiles: Arc<ProfileOps>,
    llm: Arc<dyn LlmPort>,
    snapshots: Arc<dyn SessionSnapshotStore>,
    archive: Arc<dyn EncounterArchiveRepo>,
    tracker: Arc<dyn TrackerSnapshotPort>,
    clock: Arc<dyn ClockPort>,
    settings: EncounterSettings,
}

impl EncounterOps {
    pub fn new(
        contexts: Arc<EncounterContexts>,
        profiles: Arc<ProfileOps>,
        llm: Arc<dyn LlmPort>,
        snapshots: Arc<dyn SessionSnapshotStore>,
        archive: Arc<dyn EncounterArchiveRepo>,
        tracker: Arc<dyn TrackerSnapshotPort>,
        clock: Arc<dyn ClockPort>,
        settings: EncounterSettings,
    ) -> Self {
        Self {
            contexts,
            profiles,
            llm,
            snapshots,
            archive,
            tracker,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &EncounterSettings {
        &self.settings
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Plain-data copy of the chat's session, for rendering.
    pub async fn snapshot(&self, chat_id: &ChatId) -> SessionSnapshot {
        let context = self.contexts.get_or_create(chat_id).await;
        let session = context.session().read().await;
        session.snapshot(self.clock.now())
    }

    pub async fn state(&self, chat_id: &ChatId) -> EncounterState {
        let Some(context) = self.contexts.get(chat_id).await else {
            return EncounterState::Idle;
        };
        let session = context.session().read().await;
        session.state()
    }

    pub async fn is_generating(&self, chat_id: &ChatId) -> bool {
        match self.contexts.get(chat_id).await {
            Some(context) => context.is_generating(),
            None => false,
        }
    }

    /// Whether a saved encounter is waiting to be restored for this chat.
    pub async fn has_saved_encounter(&self, chat_id: &ChatId) -> bool {
        match self.snapshots.exists(chat_id).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to check for a saved encounter");
                false
            }
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Idle -> Initializing, then ask the model to set the encounter up.
    ///
    /// The encounter goes straight to Active when the model suggested no extra
    /// combatants; otherwise it waits in Initializing for approvals.
    pub async fn start_encounter(
        &self,
        chat_id: &ChatId,
        mut start: EncounterStart,
        prompt_context: &PromptContext,
    ) -> Result<Applied<EncounterState>, EncounterError> {
        require_non_empty(&start.start_message, "start message")?;
        let context = self.contexts.get_or_create(chat_id).await;
        let _guard = context
            .try_begin_generation()
            .ok_or(EncounterError::GenerationInProgress)?;

        let original = context.session().read().await.clone();
        start.tracker_baseline = self
            .committed_tracker(chat_id)
            .await
            .or(start.tracker_baseline);

        let mut updated = original.clone();
        updated.begin_initialization(start, self.clock.now())?;
        tracing::info!(chat_id = %chat_id, encounter_id = %updated.id(), "Starting encounter");

        self.initialize(&context, &original, updated, prompt_context)
            .await
    }

    /// Ask the model for a fresh setup while still in Initializing.
    ///
    /// The new opening narration becomes an alternative of the first one.
    pub async fn retry_initialization(
        &self,
        chat_id: &ChatId,
        prompt_context: &PromptContext,
    ) -> Result<Applied<EncounterState>, EncounterError> {
        let context = self.contexts.get_or_create(chat_id).await;
        let _guard = context
            .try_begin_generation()
            .ok_or(EncounterError::GenerationInProgress)?;

        let original = context.session().read().await.clone();
        require_state(&original, &[EncounterState::Initializing], "retry initialization")?;
        tracing::info!(chat_id = %chat_id, "Retrying encounter initialization");

        let updated = original.clone();
        self.initialize(&context, &original, updated, prompt_context)
            .await
    }

    async fn initialize(
        &self,
        context: &EncounterContext,
        original: &EncounterSession,
        mut updated: EncounterSession,
        prompt_context: &PromptContext,
    ) -> Result<Applied<EncounterState>, EncounterError> {
        let profile = self.profiles.active_profile(updated.profile_override()).await;
        let prompt = build_init_prompt(&profile, prompt_context, &self.settings, &updated);
        let response = self
            .generate(context.chat_id(), "init", &prompt, self.settings.init_max_tokens)
            .await?;

        let initial = parse_initial_state(&response).ok_or(EncounterError::Unparseable)?;
        updated.apply_initial_state(initial)?;
        if updated.pending_enemies().is_empty() && updated.pending_party().is_empty() {
            updated.activate()?;
        }

        let state = updated.state();
        tracing::info!(
            chat_id = %context.chat_id(),
            profile = %profile.id,
            state = %state,
            pending_enemies = updated.pending_enemies().len(),
            pending_party = updated.pending_party().len(),
            "Encounter initialized"
        );
        let persisted = self.commit(context, original, updated).await?;
        Ok(Applied {
            value: state,
            persisted,
        })
    }

    pub async fn approve_pending_enemy(
        &self,
        chat_id: &ChatId,
        index: usize,
    ) -> Result<Applied<PendingResolution>, EncounterError> {
        self.mutate(chat_id, |s| s.approve_pending(CombatSide::Enemies, index))
            .await
    }

    pub async fn approve_pending_party_member(
        &self,
        chat_id: &ChatId,
        index: usize,
    ) -> Result<Applied<PendingResolution>, EncounterError> {
        self.mutate(chat_id, |s| s.approve_pending(CombatSide::Party, index))
            .await
    }

    pub async fn dismiss_pending_enemy(
        &self,
        chat_id: &ChatId,
        index: usize,
    ) -> Result<Applied<PendingResolution>, EncounterError> {
        self.mutate(chat_id, |s| s.dismiss_pending(CombatSide::Enemies, index))
            .await
    }

    pub async fn dismiss_pending_party_member(
        &self,
        chat_id: &ChatId,
        index: usize,
    ) -> Result<Applied<PendingResolution>, EncounterError> {
        self.mutate(chat_id, |s| s.dismiss_pending(CombatSide::Party, index))
            .await
    }

    /// Initializing -> Active once every suggestion is resolved.
    pub async fn begin_combat(
        &self,
        chat_id: &ChatId,
    ) -> Result<Applied<StateTransition>, EncounterError> {
        self.mutate(chat_id, EncounterSession::activate).await
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Resolve the user's action as a new turn.
    pub async fn take_action(
        &self,
        chat_id: &ChatId,
        action: &str,
        prompt_context: &PromptContext,
    ) -> Result<Applied<TurnRecorded>, EncounterError> {
        require_non_empty(action, "action")?;
        let context = self.contexts.get_or_create(chat_id).await;
        let _guard = context
            .try_begin_generation()
            .ok_or(EncounterError::GenerationInProgress)?;

        let original = context.session().read().await.clone();
        require_state(&original, &[EncounterState::Active], "take an action")?;

        let profile = self.profiles.active_profile(original.profile_override()).await;
        let prompt = build_action_prompt(
            &profile,
            prompt_context,
            &self.settings,
            &original,
            action,
            None,
        )?;
        let response = self
            .generate(chat_id, "action", &prompt, self.settings.action_max_tokens)
            .await?;
        let result = parse_action_result(&response).ok_or(EncounterError::Unparseable)?;

        let mut updated = original.clone();
        let recorded = updated.record_turn(result.into_turn(action, original.combat_stats()))?;
        tracing::info!(
            chat_id = %chat_id,
            turn = recorded.entry_index(),
            outcome = ?recorded.outcome(),
            "Turn recorded"
        );

        let persisted = self.commit(&context, &original, updated).await?;
        Ok(Applied {
            value: recorded,
            persisted,
        })
    }

    /// Regenerate the latest turn as a new alternative.
    pub async fn regenerate_last_action(
        &self,
        chat_id: &ChatId,
        prompt_context: &PromptContext,
    ) -> Result<Applied<TurnRecorded>, EncounterError> {
        let context = self.contexts.get_or_create(chat_id).await;
        let latest = context.session().read().await.latest_turn();
        let latest = latest.ok_or(SessionError::NoTurnTaken)?;
        self.regenerate_turn(chat_id, latest, prompt_context).await
    }

    /// Regenerate any recorded turn, replaying it from the state before it.
    ///
    /// Alternatives of earlier turns only change text; see
    /// [`EncounterSession::record_alternative`].
    pub async fn regenerate_turn(
        &self,
        chat_id: &ChatId,
        entry_index: usize,
        prompt_context: &PromptContext,
    ) -> Result<Applied<TurnRecorded>, EncounterError> {
        let context = self.contexts.get_or_create(chat_id).await;
        let _guard = context
            .try_begin_generation()
            .ok_or(EncounterError::GenerationInProgress)?;

        let original = context.session().read().await.clone();
        require_state(
            &original,
            &[EncounterState::Active, EncounterState::Resolving],
            "regenerate a turn",
        )?;
        let action = original
            .turn_action(entry_index)
            .ok_or(SessionError::NoTurnTaken)?
            .to_string();

        let profile = self.profiles.active_profile(original.profile_override()).await;
        let prompt = build_action_prompt(
            &profile,
            prompt_context,
            &self.settings,
            &original,
            &action,
            Some(entry_index),
        )?;
        let response = self
            .generate(chat_id, "regenerate", &prompt, self.settings.action_max_tokens)
            .await?;
        let result = parse_action_result(&response).ok_or(EncounterError::Unparseable)?;

        let mut updated = original.clone();
        let turn = result.into_turn(&action, original.stats_before_turn(entry_index));
        let recorded = updated.record_alternative(entry_index, turn)?;
        tracing::info!(
            chat_id = %chat_id,
            turn = entry_index,
            alternative = recorded.swipe_index(),
            "Turn regenerated"
        );

        let persisted = self.commit(&context, &original, updated).await?;
        Ok(Applied {
            value: recorded,
            persisted,
        })
    }

    /// Show another alternative of a turn.
    pub async fn select_turn_alternative(
        &self,
        chat_id: &ChatId,
        entry_index: usize,
        swipe_index: usize,
    ) -> Result<Applied<EncounterState>, EncounterError> {
        self.mutate(chat_id, |s| {
            s.set_swipe(entry_index, swipe_index)?;
            Ok(s.state())
        })
        .await
    }

    // =========================================================================
    // Combatants
    // =========================================================================
    //
    // Manual edits from the renderer. Rejected edits are logged and ignored.

    pub async fn add_party_member(&self, chat_id: &ChatId, member: Combatant) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "add party member", |s| s.add_party_member(member))
            .await
    }

    pub async fn add_enemy(&self, chat_id: &ChatId, enemy: Combatant) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "add enemy", |s| s.add_enemy(enemy))
            .await
    }

    pub async fn update_party_member(
        &self,
        chat_id: &ChatId,
        index: usize,
        member: Combatant,
    ) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "update party member", |s| {
            s.update_party_member(index, member)
        })
        .await
    }

    pub async fn update_enemy(
        &self,
        chat_id: &ChatId,
        index: usize,
        enemy: Combatant,
    ) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "update enemy", |s| s.update_enemy(index, enemy))
            .await
    }

    pub async fn remove_party_member(&self, chat_id: &ChatId, index: usize) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "remove party member", |s| s.remove_party_member(index))
            .await
    }

    pub async fn remove_enemy(&self, chat_id: &ChatId, index: usize) -> Option<CombatantChange> {
        self.edit_combatants(chat_id, "remove enemy", |s| s.remove_enemy(index))
            .await
    }

    async fn edit_combatants(
        &self,
        chat_id: &ChatId,
        operation: &'static str,
        edit: impl FnOnce(&mut EncounterSession) -> Result<CombatantChange, SessionError>,
    ) -> Option<CombatantChange> {
        match self.mutate(chat_id, edit).await {
            Ok(applied) => Some(applied.value),
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, operation, error = %e, "Combatant edit ignored");
                None
            }
        }
    }

    /// Run this chat's encounters under a specific profile, or the default again.
    pub async fn set_profile_override(
        &self,
        chat_id: &ChatId,
        profile_id: Option<ProfileId>,
    ) -> Result<Applied<()>, EncounterError> {
        self.mutate(chat_id, |s| {
            s.set_profile_override(profile_id);
            Ok(())
        })
        .await
    }

    // =========================================================================
    // Conclusion
    // =========================================================================

    /// Summarize the encounter, archive it and reset the chat to Idle.
    ///
    /// `outcome` ends an Active encounter by hand; a Resolving encounter keeps
    /// the outcome its last turn produced unless one is given.
    pub async fn conclude_encounter(
        &self,
        chat_id: &ChatId,
        outcome: Option<EncounterOutcome>,
        prompt_context: &PromptContext,
    ) -> Result<Applied<ConcludedEncounter>, EncounterError> {
        let context = self.contexts.get_or_create(chat_id).await;
        let _guard = context
            .try_begin_generation()
            .ok_or(EncounterError::GenerationInProgress)?;

        let original = context.session().read().await.clone();
        let mut updated = original.clone();
        if let Some(outcome) = outcome {
            updated.declare_outcome(outcome)?;
        }
        require_state(&updated, &[EncounterState::Resolving], "conclude the encounter")?;

        let profile = self.profiles.active_profile(updated.profile_override()).await;
        let prompt = build_summary_prompt(&profile, prompt_context, &self.settings, &updated);
        let response = self
            .generate(chat_id, "summary", &prompt, self.settings.summary_max_tokens)
            .await?;
        let parts = split_summary(&response);
        if parts.summary.is_empty() {
            tracing::warn!(chat_id = %chat_id, response = %response, "Summary response was empty");
            return Err(EncounterError::Unparseable);
        }

        let record = updated.archive(parts.summary, Some(profile.name.clone()), self.clock.now())?;
        let archived = match self.archive.append(chat_id, &record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to append encounter to archive");
                false
            }
        };
        updated.reset();
        tracing::info!(
            chat_id = %chat_id,
            result = %record.result,
            turns = record.log.len(),
            "Encounter concluded"
        );

        let persisted = self.commit(&context, &original, updated).await?;
        Ok(Applied {
            value: ConcludedEncounter {
                record,
                tracker: parts.tracker,
                archived,
            },
            persisted,
        })
    }

    /// Drop the encounter from any state. Allowed while generating; the
    /// pending response is then discarded.
    pub async fn abandon(&self, chat_id: &ChatId) -> Applied<StateTransition> {
        let context = self.contexts.get_or_create(chat_id).await;
        let (transition, snapshot) = {
            let mut session = context.session().write().await;
            let transition = session.reset();
            (transition, session.snapshot(self.clock.now()))
        };
        tracing::info!(chat_id = %chat_id, from = %transition.from, "Encounter abandoned");
        Applied {
            value: transition,
            persisted: self.persist(chat_id, &snapshot).await,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Reload the chat's saved encounter, replacing the live session.
    ///
    /// Returns the restored state, or `None` when nothing usable was saved.
    pub async fn restore(&self, chat_id: &ChatId) -> Option<EncounterState> {
        let snapshot = match self.snapshots.load(chat_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to load saved encounter");
                return None;
            }
        };
        if snapshot.chat_id != *chat_id {
            tracing::warn!(
                chat_id = %chat_id,
                saved_for = %snapshot.chat_id,
                "Saved encounter belongs to another chat"
            );
            return None;
        }

        let session = match EncounterSession::restore(snapshot) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Saved encounter is unusable");
                return None;
            }
        };

        let context = self.contexts.get_or_create(chat_id).await;
        if context.is_generating() {
            tracing::warn!(chat_id = %chat_id, "Not restoring while a generation is in flight");
            return None;
        }
        let state = session.state();
        *context.session().write().await = session;
        tracing::info!(chat_id = %chat_id, state = %state, "Encounter restored");
        Some(state)
    }

    /// Forget the chat entirely: live session and saved snapshot.
    pub async fn forget_chat(&self, chat_id: &ChatId) -> bool {
        self.contexts.remove(chat_id).await;
        match self.snapshots.clear(chat_id).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to clear saved encounter");
                false
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Apply a synchronous mutation to the live session and auto-save.
    async fn mutate<T>(
        &self,
        chat_id: &ChatId,
        apply: impl FnOnce(&mut EncounterSession) -> Result<T, SessionError>,
    ) -> Result<Applied<T>, EncounterError> {
        let context = self.contexts.get_or_create(chat_id).await;
        if context.is_generating() {
            return Err(EncounterError::GenerationInProgress);
        }
        let (value, snapshot) = {
            let mut session = context.session().write().await;
            let value = apply(&mut session)?;
            (value, session.snapshot(self.clock.now()))
        };
        let persisted = self.persist(chat_id, &snapshot).await;
        Ok(Applied { value, persisted })
    }

    async fn generate(
        &self,
        chat_id: &ChatId,
        kind: &'static str,
        prompt: &CompiledPrompt,
        max_tokens: u32,
    ) -> Result<String, EncounterError> {
        tracing::debug!(chat_id = %chat_id, kind, prompt_chars = prompt.user.len(), "Requesting generation");
        let request = prompt.to_request(self.settings.temperature, max_tokens);
        match self.llm.generate(request).await {
            Ok(response) => {
                if response.truncated {
                    tracing::warn!(chat_id = %chat_id, kind, "Response hit the token limit");
                }
                Ok(response.content)
            }
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, kind, error = %e, "Generation failed");
                Err(EncounterError::Llm(e))
            }
        }
    }

    /// Swap in `updated` if the live session still equals `original`, then save.
    async fn commit(
        &self,
        context: &EncounterContext,
        original: &EncounterSession,
        updated: EncounterSession,
    ) -> Result<bool, EncounterError> {
        let snapshot = {
            let mut live = context.session().write().await;
            if *live != *original {
                tracing::warn!(
                    chat_id = %context.chat_id(),
                    "Encounter changed during generation, discarding the response"
                );
                return Err(EncounterError::Superseded);
            }
            *live = updated;
            live.snapshot(self.clock.now())
        };
        Ok(self.persist(context.chat_id(), &snapshot).await)
    }

    /// Save the snapshot, or clear the slot once the chat is back to Idle.
    async fn persist(&self, chat_id: &ChatId, snapshot: &SessionSnapshot) -> bool {
        let result = if snapshot.state == EncounterState::Idle {
            self.snapshots.clear(chat_id).await
        } else {
            self.snapshots.save(chat_id, snapshot).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to save encounter snapshot");
                false
            }
        }
    }

    async fn committed_tracker(&self, chat_id: &ChatId) -> Option<TrackerSnapshot> {
        match self.tracker.committed(chat_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, error = %e, "Failed to read tracker, starting without a baseline");
                None
            }
        }
    }
}

fn require_state(
    session: &EncounterSession,
    allowed: &[EncounterState],
    operation: &'static str,
) -> Result<(), EncounterError> {
    if allowed.contains(&session.state()) {
        Ok(())
    } else {
        Err(EncounterError::InvalidState {
            operation,
            state: session.state(),
        })
    }
}

/// Errors from encounter operations. The session is unchanged after any of them.
#[derive(Debug, thiserror::Error)]
pub enum EncounterError {
    #[error("A generation request is already in flight for this chat")]
    GenerationInProgress,

    #[error("Cannot {operation} while the encounter is {state}")]
    InvalidState {
        operation: &'static str,
        state: EncounterState,
    },

    #[error("The model response could not be understood, try again")]
    Unparseable,

    #[error("The encounter changed while the response was generated")]
    Superseded,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for EncounterError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::InvalidState { operation, state } => {
                Self::InvalidState { operation, state }
            }
            other => Self::Session(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::in_memory::{InMemoryEncounterStore, StaticTrackerSnapshots};
    use crate::infrastructure::ports::{
        LlmRequest, LlmResponse, MockClockPort, MockLlmPort, MockSessionSnapshotStore,
        MockTrackerSnapshotPort, RepoError,
    };

    /// Replies with queued responses in order, yielding once first so that
    /// concurrent callers interleave at the await point.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl LlmPort for ScriptedLlm {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
            tokio::task::yield_now().await;
            self.requests.lock().expect("lock").push(request);
            self.responses
                .lock()
                .expect("lock")
                .pop_front()
                .map(LlmResponse::text)
                .ok_or_else(|| LlmError::Unreachable("script exhausted".into()))
        }
    }

    const INIT: &str = r#"```json
{
  "combatStats": {
    "environment": "A moonlit crossroads",
    "party": [{"name": "Aria", "hp": 20, "maxHp": 20, "isPlayer": true}],
    "enemies": [{"name": "Goblin", "hp": 10, "maxHp": 10}]
  },
  "narrative": "A goblin leaps from the ditch."
}
```"#;

    const INIT_WITH_PENDING: &str = r#"{
  "combatStats": {
    "environment": "A moonlit crossroads",
    "party": [{"name": "Aria", "hp": 20, "maxHp": 20, "isPlayer": true}],
    "enemies": [{"name": "Goblin", "hp": 10, "maxHp": 10}]
  },
  "narrative": "A goblin leaps from the ditch.",
  "pendingEnemies": [{"name": "Goblin archer", "hp": 6, "maxHp": 6}]
}"#;

    fn turn(narrative: &str, goblin_hp: i32) -> String {
        format!(
            r#"{{"narrative": "{narrative}", "combatStats": {{"environment": "A moonlit crossroads", "party": [{{"name": "Aria", "hp": 20, "maxHp": 20, "isPlayer": true}}], "enemies": [{{"name": "Goblin", "hp": {goblin_hp}, "maxHp": 10}}]}}, "enemyActions": ["The goblin snarls."], "combatEnd": false}}"#
        )
    }

    struct Harness {
        ops: Arc<EncounterOps>,
        store: Arc<InMemoryEncounterStore>,
        tracker: Arc<StaticTrackerSnapshots>,
    }

    fn harness_with(llm: Arc<dyn LlmPort>, snapshots: Option<Arc<dyn SessionSnapshotStore>>) -> Harness {
        let store = Arc::new(InMemoryEncounterStore::new());
        let tracker = Arc::new(StaticTrackerSnapshots::new());
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 5, 4, 20, 0, 0)
                .single()
                .expect("valid timestamp"),
        ));
        let ops = EncounterOps::new(
            Arc::new(EncounterContexts::new()),
            Arc::new(ProfileOps::new(store.clone())),
            llm,
            snapshots.unwrap_or_else(|| store.clone() as Arc<dyn SessionSnapshotStore>),
            store.clone(),
            tracker.clone(),
            clock,
            EncounterSettings::default(),
        );
        Harness {
            ops: Arc::new(ops),
            store,
            tracker,
        }
    }

    fn harness(responses: &[&str]) -> (Harness, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm::new(responses));
        (harness_with(llm.clone(), None), llm)
    }

    fn chat() -> ChatId {
        ChatId::new("chat-1")
    }

    fn start() -> EncounterStart {
        EncounterStart {
            start_message: "A goblin ambush!".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_encounter_with_regenerated_middle_turn() {
        let (t1, t2, t3, t2b) = (
            turn("You slash the goblin.", 7),
            turn("You feint left.", 5),
            turn("You drive it back.", 2),
            turn("You kick dust in its eyes.", 4),
        );
        let (h, _llm) = harness(&[
            INIT,
            t1.as_str(),
            t2.as_str(),
            t3.as_str(),
            t2b.as_str(),
            "The goblin fled into the night.",
        ]);
        let ctx = PromptContext::new();

        let started = h.ops.start_encounter(&chat(), start(), &ctx).await.expect("starts");
        assert_eq!(started.value, EncounterState::Active);
        assert!(started.persisted);

        for action in ["Slash", "Feint", "Press"] {
            h.ops.take_action(&chat(), action, &ctx).await.expect("turn");
        }
        let regenerated = h.ops.regenerate_turn(&chat(), 1, &ctx).await.expect("regenerated");
        assert_eq!(regenerated.value.swipe_index(), 1);

        let snapshot = h.ops.snapshot(&chat()).await;
        assert_eq!(snapshot.encounter_log.len(), 3);
        let second = snapshot.encounter_log.get(1).expect("second turn");
        assert_eq!(second.swipe_count(), 2);
        assert_eq!(second.current().result, "You kick dust in its eyes.");
        assert_eq!(
            snapshot.combat_stats.as_ref().map(|s| s.enemies[0].hp),
            Some(2),
            "earlier alternatives leave current stats alone"
        );

        let concluded = h
            .ops
            .conclude_encounter(&chat(), Some(EncounterOutcome::Victory), &ctx)
            .await
            .expect("concludes");
        assert!(concluded.value.archived);
        assert_eq!(concluded.value.record.log.len(), 3);
        assert_eq!(concluded.value.record.result, EncounterOutcome::Victory);

        let archive = h.store.list(&chat()).await.expect("archive");
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].result, EncounterOutcome::Victory);
        assert_eq!(archive[0].summary, "The goblin fled into the night.");
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Idle);
        assert!(!h.ops.has_saved_encounter(&chat()).await);
    }

    #[tokio::test]
    async fn concurrent_triggers_create_one_encounter() {
        let (h, llm) = harness(&[INIT, INIT]);
        let ctx = PromptContext::new();
        let chat = chat();

        let (a, b) = tokio::join!(
            h.ops.start_encounter(&chat, start(), &ctx),
            h.ops.start_encounter(&chat, start(), &ctx)
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(EncounterError::GenerationInProgress))));
        assert_eq!(llm.request_count(), 1);
        assert_eq!(h.ops.state(&chat).await, EncounterState::Active);

        let again = h.ops.start_encounter(&chat, start(), &ctx).await;
        assert!(matches!(again, Err(EncounterError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn llm_failure_leaves_session_untouched() {
        let mut llm = MockLlmPort::new();
        llm.expect_generate()
            .times(1)
            .returning(|_| Err(LlmError::Unreachable("connection refused".into())));
        let h = harness_with(Arc::new(llm), None);

        let result = h.ops.start_encounter(&chat(), start(), &PromptContext::new()).await;
        assert!(matches!(result, Err(EncounterError::Llm(_))));
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Idle);
        assert!(!h.ops.is_generating(&chat()).await);
    }

    #[tokio::test]
    async fn unparseable_turn_is_reported_and_dropped() {
        let (h, _llm) = harness(&[INIT, "I cannot comply."]);
        let ctx = PromptContext::new();
        h.ops.start_encounter(&chat(), start(), &ctx).await.expect("starts");

        let result = h.ops.take_action(&chat(), "Slash", &ctx).await;
        assert!(matches!(result, Err(EncounterError::Unparseable)));
        assert!(h.ops.snapshot(&chat()).await.encounter_log.is_empty());
    }

    #[tokio::test]
    async fn model_turns_never_lose_the_player() {
        const EMPTY_PARTY: &str = r#"{"narrative": "Dust everywhere.", "combatStats": {"environment": "A moonlit crossroads", "party": [], "enemies": [{"name": "Goblin", "hp": 8, "maxHp": 10}]}, "combatEnd": false}"#;
        const ALLY_ONLY: &str = r#"{"narrative": "Bram joins in.", "combatStats": {"environment": "A moonlit crossroads", "party": [{"name": "Aria", "hp": 17.5, "maxHp": "20", "isPlayer": true}, {"name": "Bram", "hp": 12, "maxHp": 12, "isPlayer": true}], "enemies": [{"name": "Goblin", "hp": 6, "maxHp": 10}]}, "combatEnd": false}"#;
        let (h, _llm) = harness(&[INIT, EMPTY_PARTY, ALLY_ONLY]);
        let ctx = PromptContext::new();
        let chat = chat();
        h.ops.start_encounter(&chat, start(), &ctx).await.expect("starts");

        h.ops.take_action(&chat, "Kick dust", &ctx).await.expect("first turn");
        let stats = h.ops.snapshot(&chat).await.combat_stats.expect("stats");
        assert_eq!(stats.player().map(|p| p.name.as_str()), Some("Aria"));
        assert_eq!(stats.enemies[0].hp, 8);

        h.ops.take_action(&chat, "Call for help", &ctx).await.expect("second turn");
        let stats = h.ops.snapshot(&chat).await.combat_stats.expect("stats");
        let party: Vec<_> = stats
            .party
            .iter()
            .map(|c| (c.name.as_str(), c.hp, c.is_player))
            .collect();
        assert_eq!(party, vec![("Aria", 18, true), ("Bram", 12, false)]);
    }

    #[tokio::test]
    async fn pending_suggestions_gate_combat() {
        let (h, _llm) = harness(&[INIT_WITH_PENDING]);
        let started = h
            .ops
            .start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        assert_eq!(started.value, EncounterState::Initializing);

        let blocked = h.ops.begin_combat(&chat()).await;
        assert!(matches!(
            blocked,
            Err(EncounterError::Session(SessionError::PendingUnresolved { enemies: 1, party: 0 }))
        ));

        let approved = h.ops.approve_pending_enemy(&chat(), 0).await.expect("approved");
        assert!(matches!(approved.value, PendingResolution::Approved { index: 1, .. }));
        h.ops.begin_combat(&chat()).await.expect("combat begins");
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Active);
    }

    #[tokio::test]
    async fn ending_turn_moves_to_resolving() {
        let ending = r#"{"narrative": "The goblin collapses.", "combatEnd": true, "result": "victory"}"#;
        let (h, _llm) = harness(&[INIT, ending, "Short fight."]);
        let ctx = PromptContext::new();
        h.ops.start_encounter(&chat(), start(), &ctx).await.expect("starts");

        let recorded = h.ops.take_action(&chat(), "Finish it", &ctx).await.expect("turn");
        assert_eq!(recorded.value.outcome(), Some(EncounterOutcome::Victory));
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Resolving);

        let more = h.ops.take_action(&chat(), "Keep going", &ctx).await;
        assert!(matches!(
            more,
            Err(EncounterError::InvalidState { state: EncounterState::Resolving, .. })
        ));

        let concluded = h.ops.conclude_encounter(&chat(), None, &ctx).await.expect("concludes");
        assert_eq!(concluded.value.record.result, EncounterOutcome::Victory);
    }

    #[tokio::test]
    async fn combatant_edits_log_and_ignore_invalid_requests() {
        let (h, _llm) = harness(&[INIT]);
        assert_eq!(h.ops.add_enemy(&chat(), Combatant::new("Wolf", 8)).await, None);

        h.ops
            .start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        assert_eq!(h.ops.remove_party_member(&chat(), 0).await, None);
        assert_eq!(h.ops.remove_enemy(&chat(), 5).await, None);
        assert_eq!(
            h.ops.add_enemy(&chat(), Combatant::new("Wolf", 8)).await,
            Some(CombatantChange::Added {
                side: CombatSide::Enemies,
                index: 1
            })
        );
        assert_eq!(h.ops.snapshot(&chat()).await.combat_stats.expect("stats").party.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_restores_after_restart() {
        let slash = turn("You slash the goblin.", 7);
        let (h, _llm) = harness(&[INIT, slash.as_str()]);
        let ctx = PromptContext::new();
        h.ops.start_encounter(&chat(), start(), &ctx).await.expect("starts");
        h.ops.take_action(&chat(), "Slash", &ctx).await.expect("turn");
        let before = h.ops.snapshot(&chat()).await;

        let restarted = harness_with(Arc::new(ScriptedLlm::new(&[])), Some(h.store.clone()));
        assert_eq!(restarted.ops.restore(&chat()).await, Some(EncounterState::Active));
        let after = restarted.ops.snapshot(&chat()).await;
        assert_eq!(after.encounter_log, before.encounter_log);
        assert_eq!(after.combat_stats, before.combat_stats);
        assert_eq!(after.checkpoint, before.checkpoint);

        assert_eq!(restarted.ops.restore(&ChatId::new("other")).await, None);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_not_raised() {
        let mut snapshots = MockSessionSnapshotStore::new();
        snapshots
            .expect_save()
            .returning(|_, _| Err(RepoError::database("save_snapshot", "disk full")));
        let h = harness_with(Arc::new(ScriptedLlm::new(&[INIT])), Some(Arc::new(snapshots)));

        let started = h
            .ops
            .start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        assert!(!started.persisted);
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Active);
    }

    #[tokio::test]
    async fn tracker_baseline_is_captured_at_start() {
        let (h, llm) = harness(&[INIT]);
        h.tracker
            .commit(
                chat(),
                TrackerSnapshot {
                    user_stats: "HP 20/20, Gold 12".into(),
                    ..Default::default()
                },
            )
            .await;

        h.ops
            .start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        let snapshot = h.ops.snapshot(&chat()).await;
        assert_eq!(
            snapshot.tracker_baseline.map(|t| t.user_stats),
            Some("HP 20/20, Gold 12".to_string())
        );
        let requests = llm.requests.lock().expect("lock");
        assert!(requests[0].messages[0].content.contains("HP 20/20, Gold 12"));
    }

    #[tokio::test]
    async fn unreadable_tracker_starts_without_baseline() {
        let store = Arc::new(InMemoryEncounterStore::new());
        let mut tracker = MockTrackerSnapshotPort::new();
        tracker
            .expect_committed()
            .returning(|_| Err(RepoError::database("read_tracker", "host unavailable")));
        let mut clock = MockClockPort::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 5, 4, 20, 0, 0).single().expect("valid"));
        let ops = EncounterOps::new(
            Arc::new(EncounterContexts::new()),
            Arc::new(ProfileOps::new(store.clone())),
            Arc::new(ScriptedLlm::new(&[INIT])),
            store.clone(),
            store,
            Arc::new(tracker),
            Arc::new(clock),
            EncounterSettings::default(),
        );

        ops.start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        let snapshot = ops.snapshot(&chat()).await;
        assert_eq!(snapshot.state, EncounterState::Active);
        assert!(snapshot.tracker_baseline.is_none());
    }

    #[tokio::test]
    async fn abandon_resets_and_clears_snapshot() {
        let (h, _llm) = harness(&[INIT]);
        h.ops
            .start_encounter(&chat(), start(), &PromptContext::new())
            .await
            .expect("starts");
        assert!(h.ops.has_saved_encounter(&chat()).await);

        let abandoned = h.ops.abandon(&chat()).await;
        assert_eq!(abandoned.value.from, EncounterState::Active);
        assert!(abandoned.persisted);
        assert_eq!(h.ops.state(&chat()).await, EncounterState::Idle);
        assert!(!h.ops.has_saved_encounter(&chat()).await);
    }

    #[tokio::test]
    async fn empty_action_is_rejected() {
        let (h, llm) = harness(&[]);
        let result = h.ops.take_action(&chat(), "   ", &PromptContext::new()).await;
        assert!(matches!(result, Err(EncounterError::Validation(_))));
        assert_eq!(llm.request_count(), 0);
    }
}
