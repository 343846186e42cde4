//! EncounterSession aggregate - the live encounter of one chat
//!
//! # State machine
//!
//! ```text
//!   Idle ──begin──> Initializing ──activate──> Active ──turn ends it──> Resolving ──archive──> Archived
//!    ^                  │  ^                     │ ^                        │
//!    │                  └──┘ retry               └─┘ turns, swipes          │ swipe back
//!    │                                           ^──────────────────────────┘
//!    └──────────────────────────── reset (from any state) ─────────────────────────────────
//! ```
//!
//! Every mutator checks the current state first and returns a
//! [`SessionError`] without touching anything when the call is not valid.
//!
//! # Turn alternatives
//!
//! Each turn occupies one entry in the encounter log and two lines in the
//! display log (the user's action and the narration). Regenerating a turn
//! appends an alternative to the log entry and to its narration line, so
//! both always carry the same number of alternatives and the same selection.
//!
//! The latest turn also has a [`TurnCheckpoint`]: the stats before the turn
//! and the stats each alternative produced. Switching alternatives of the
//! latest turn therefore restores matching combat stats. Earlier turns only
//! change text; their stats have long since been superseded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::entities::ArchiveRecord;
use crate::events::{CombatantChange, PendingResolution, StateTransition, TurnRecorded};
use crate::ids::{ChatId, EncounterId, ProfileId};
use crate::value_objects::{
    ActionRecord, BranchError, BranchLog, CombatSide, CombatStats, Combatant, DisplayKind,
    DisplayLine, EncounterOutcome, HistoryEntry, TrackerSnapshot,
};

/// Lifecycle state of an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncounterState {
    #[default]
    Idle,
    Initializing,
    Active,
    Resolving,
    Archived,
}

impl EncounterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Resolving => "resolving",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for EncounterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected session mutation. The session is unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Cannot {operation} while the encounter is {state}")]
    InvalidState {
        operation: &'static str,
        state: EncounterState,
    },

    #[error("No combat stats are loaded")]
    NoCombatStats,

    #[error("The party has no player combatant")]
    NoPlayer,

    #[error("No {side} combatant at index {index} ({len} present)")]
    CombatantOutOfRange {
        side: CombatSide,
        index: usize,
        len: usize,
    },

    #[error("No suggested {side} combatant at index {index} ({len} pending)")]
    PendingOutOfRange {
        side: CombatSide,
        index: usize,
        len: usize,
    },

    #[error("The player combatant cannot be removed")]
    CannotRemovePlayer,

    #[error("{enemies} suggested enemies and {party} suggested party members still await a decision")]
    PendingUnresolved { enemies: usize, party: usize },

    #[error("No turn has been taken yet")]
    NoTurnTaken,

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error("Snapshot is inconsistent: {0}")]
    CorruptSnapshot(String),
}

/// Everything captured when an encounter is triggered.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncounterStart {
    pub start_message: String,
    pub history: Vec<HistoryEntry>,
    pub tracker_baseline: Option<TrackerSnapshot>,
    pub profile_override: Option<ProfileId>,
}

/// Parsed result of the initialization prompt.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitialEncounter {
    pub combat_stats: CombatStats,
    pub narrative: Option<String>,
    pub pending_enemies: Vec<Combatant>,
    pub pending_party: Vec<Combatant>,
}

/// Parsed result of one action prompt, paired with the action that caused it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TurnResult {
    pub action: String,
    pub narrative: String,
    /// `None` keeps the stats from before the turn.
    pub combat_stats: Option<CombatStats>,
    pub enemy_actions: Vec<String>,
    pub party_actions: Vec<String>,
    pub outcome: Option<EncounterOutcome>,
}

impl TurnResult {
    fn record(&self) -> ActionRecord {
        ActionRecord::new(&self.action, &self.narrative).with_outcome(self.outcome)
    }

    fn line(&self) -> DisplayLine {
        DisplayLine::narrative(
            &self.narrative,
            self.enemy_actions.clone(),
            self.party_actions.clone(),
        )
    }
}

/// Stats bookkeeping for the latest turn, one `stats_after` per alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCheckpoint {
    pub entry_index: usize,
    pub stats_before: CombatStats,
    pub stats_after: Vec<CombatStats>,
}

/// Plain-data projection of an [`EncounterSession`] with the time it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub saved_at: DateTime<Utc>,
    pub encounter_id: EncounterId,
    pub chat_id: ChatId,
    pub state: EncounterState,
    #[serde(default)]
    pub profile_override: Option<ProfileId>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_message: Option<String>,
    #[serde(default)]
    pub pre_encounter_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub tracker_baseline: Option<TrackerSnapshot>,
    #[serde(default)]
    pub combat_stats: Option<CombatStats>,
    #[serde(default)]
    pub combat_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub encounter_log: BranchLog<ActionRecord>,
    #[serde(default)]
    pub display_log: BranchLog<DisplayLine>,
    /// Display-log index of each turn's narration line.
    #[serde(default)]
    pub turn_lines: Vec<usize>,
    #[serde(default)]
    pub pending_enemies: Vec<Combatant>,
    #[serde(default)]
    pub pending_party: Vec<Combatant>,
    #[serde(default)]
    pub outcome: Option<EncounterOutcome>,
    #[serde(default)]
    pub checkpoint: Option<TurnCheckpoint>,
}

use EncounterState::{Active, Archived, Idle, Initializing, Resolving};

/// The live encounter of one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterSession {
    id: EncounterId,
    chat_id: ChatId,
    state: EncounterState,
    profile_override: Option<ProfileId>,
    started_at: Option<DateTime<Utc>>,
    start_message: Option<String>,
    pre_encounter_history: Vec<HistoryEntry>,
    tracker_baseline: Option<TrackerSnapshot>,
    combat_stats: Option<CombatStats>,
    combat_history: Vec<HistoryEntry>,
    encounter_log: BranchLog<ActionRecord>,
    display_log: BranchLog<DisplayLine>,
    turn_lines: Vec<usize>,
    pending_enemies: Vec<Combatant>,
    pending_party: Vec<Combatant>,
    outcome: Option<EncounterOutcome>,
    checkpoint: Option<TurnCheckpoint>,
}

impl EncounterSession {
    /// A fresh idle session for `chat_id`.
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            id: EncounterId::new(),
            chat_id,
            state: Idle,
            profile_override: None,
            started_at: None,
            start_message: None,
            pre_encounter_history: Vec::new(),
            tracker_baseline: None,
            combat_stats: None,
            combat_history: Vec::new(),
            encounter_log: BranchLog::new(),
            display_log: BranchLog::new(),
            turn_lines: Vec::new(),
            pending_enemies: Vec::new(),
            pending_party: Vec::new(),
            outcome: None,
            checkpoint: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> EncounterId {
        self.id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn state(&self) -> EncounterState {
        self.state
    }

    pub fn profile_override(&self) -> Option<&ProfileId> {
        self.profile_override.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn start_message(&self) -> Option<&str> {
        self.start_message.as_deref()
    }

    pub fn pre_encounter_history(&self) -> &[HistoryEntry] {
        &self.pre_encounter_history
    }

    pub fn tracker_baseline(&self) -> Option<&TrackerSnapshot> {
        self.tracker_baseline.as_ref()
    }

    pub fn combat_stats(&self) -> Option<&CombatStats> {
        self.combat_stats.as_ref()
    }

    pub fn combat_history(&self) -> &[HistoryEntry] {
        &self.combat_history
    }

    pub fn encounter_log(&self) -> &BranchLog<ActionRecord> {
        &self.encounter_log
    }

    pub fn display_log(&self) -> &BranchLog<DisplayLine> {
        &self.display_log
    }

    pub fn pending_enemies(&self) -> &[Combatant] {
        &self.pending_enemies
    }

    pub fn pending_party(&self) -> &[Combatant] {
        &self.pending_party
    }

    pub fn outcome(&self) -> Option<EncounterOutcome> {
        self.outcome
    }

    pub fn checkpoint(&self) -> Option<&TurnCheckpoint> {
        self.checkpoint.as_ref()
    }

    /// Encounter-log index of the latest turn.
    pub fn latest_turn(&self) -> Option<usize> {
        self.encounter_log.last_index()
    }

    /// Action text of a recorded turn (identical across its alternatives).
    pub fn turn_action(&self, entry_index: usize) -> Option<&str> {
        self.encounter_log
            .get(entry_index)
            .map(|entry| entry.current().action.as_str())
    }

    /// Combat history as it stood before turn `entry_index` was taken.
    pub fn history_before_turn(&self, entry_index: usize) -> &[HistoryEntry] {
        let offset = usize::from(self.intro_index().is_some());
        let end = (offset + entry_index * 2).min(self.combat_history.len());
        &self.combat_history[..end]
    }

    /// Stats a replay of turn `entry_index` starts from.
    ///
    /// Only the latest turn has a checkpoint; earlier turns replay against the
    /// current stats.
    pub fn stats_before_turn(&self, entry_index: usize) -> Option<&CombatStats> {
        match &self.checkpoint {
            Some(checkpoint) if checkpoint.entry_index == entry_index => {
                Some(&checkpoint.stats_before)
            }
            _ => self.combat_stats.as_ref(),
        }
    }

    pub fn set_profile_override(&mut self, profile_id: Option<ProfileId>) {
        self.profile_override = profile_id;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Idle -> Initializing. Captures the triggering message and history once.
    pub fn begin_initialization(
        &mut self,
        start: EncounterStart,
        now: DateTime<Utc>,
    ) -> Result<StateTransition, SessionError> {
        self.require(&[Idle], "start an encounter")?;

        self.id = EncounterId::new();
        self.started_at = Some(now);
        self.start_message = Some(start.start_message);
        self.pre_encounter_history = start.history;
        self.tracker_baseline = start.tracker_baseline;
        if start.profile_override.is_some() {
            self.profile_override = start.profile_override;
        }
        Ok(self.transition(Initializing))
    }

    /// Load (or on retry, replace) the initial combat state.
    ///
    /// A second application adds the new intro as an alternative of the first.
    pub fn apply_initial_state(&mut self, initial: InitialEncounter) -> Result<(), SessionError> {
        self.require(&[Initializing], "apply an initial state")?;

        let intro = initial.narrative.filter(|n| !n.trim().is_empty());
        if let Some(intro) = intro {
            let line = DisplayLine::intro(intro);
            match self.intro_index() {
                Some(index) => {
                    self.display_log.add_swipe(index, line)?;
                }
                None => {
                    self.display_log.add_entry(line);
                }
            }
        }

        let stats = match &self.combat_stats {
            Some(previous) => initial.combat_stats.carrying_player_from(previous),
            None => initial.combat_stats.normalized(),
        };
        self.combat_stats = Some(stats);
        self.pending_enemies = initial
            .pending_enemies
            .into_iter()
            .map(Self::prepare)
            .collect();
        self.pending_party = initial
            .pending_party
            .into_iter()
            .map(Self::prepare)
            .collect();
        self.rebuild_history();
        Ok(())
    }

    /// Initializing -> Active once every suggestion has been approved or dismissed.
    pub fn activate(&mut self) -> Result<StateTransition, SessionError> {
        self.require(&[Initializing], "begin combat")?;
        let stats = self.combat_stats.as_ref().ok_or(SessionError::NoCombatStats)?;
        if stats.player().is_none() {
            return Err(SessionError::NoPlayer);
        }
        if !self.pending_enemies.is_empty() || !self.pending_party.is_empty() {
            return Err(SessionError::PendingUnresolved {
                enemies: self.pending_enemies.len(),
                party: self.pending_party.len(),
            });
        }
        Ok(self.transition(Active))
    }

    /// Active/Resolving -> Resolving with an outcome chosen outside a turn.
    pub fn declare_outcome(
        &mut self,
        outcome: EncounterOutcome,
    ) -> Result<StateTransition, SessionError> {
        self.require(&[Active, Resolving], "conclude the encounter")?;
        self.outcome = Some(outcome);
        Ok(self.transition(Resolving))
    }

    /// Resolving -> Archived, producing the record to append to the chat archive.
    pub fn archive(
        &mut self,
        summary: impl Into<String>,
        profile_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ArchiveRecord, SessionError> {
        self.require(&[Resolving], "archive the encounter")?;
        let result = self.outcome.ok_or(SessionError::InvalidState {
            operation: "archive an encounter without an outcome",
            state: self.state,
        })?;

        let record = ArchiveRecord {
            encounter_id: self.id,
            timestamp: now,
            log: self.encounter_log.current_values().cloned().collect(),
            summary: summary.into(),
            result,
            profile_name,
        };
        self.transition(Archived);
        Ok(record)
    }

    /// Any state -> Idle, discarding the encounter.
    pub fn reset(&mut self) -> StateTransition {
        let from = self.state;
        *self = Self::new(self.chat_id.clone());
        StateTransition { from, to: Idle }
    }

    // =========================================================================
    // Suggested combatants
    // =========================================================================

    pub fn approve_pending(
        &mut self,
        side: CombatSide,
        index: usize,
    ) -> Result<PendingResolution, SessionError> {
        self.require(&[Initializing, Active], "approve a suggested combatant")?;
        if self.combat_stats.is_none() {
            return Err(SessionError::NoCombatStats);
        }
        let combatant = self.take_pending(side, index)?;
        let name = combatant.name.clone();
        let stats = self.combat_stats.as_mut().ok_or(SessionError::NoCombatStats)?;
        stats.side_mut(side).push(combatant);
        stats.normalize();
        let index = stats.side(side).len() - 1;
        Ok(PendingResolution::Approved { side, name, index })
    }

    pub fn dismiss_pending(
        &mut self,
        side: CombatSide,
        index: usize,
    ) -> Result<PendingResolution, SessionError> {
        self.require(&[Initializing, Active], "dismiss a suggested combatant")?;
        let combatant = self.take_pending(side, index)?;
        Ok(PendingResolution::Dismissed {
            side,
            name: combatant.name,
        })
    }

    fn take_pending(&mut self, side: CombatSide, index: usize) -> Result<Combatant, SessionError> {
        let pending = match side {
            CombatSide::Party => &mut self.pending_party,
            CombatSide::Enemies => &mut self.pending_enemies,
        };
        if index >= pending.len() {
            return Err(SessionError::PendingOutOfRange {
                side,
                index,
                len: pending.len(),
            });
        }
        Ok(pending.remove(index))
    }

    // =========================================================================
    // Combatant mutations
    // =========================================================================

    pub fn add_party_member(&mut self, member: Combatant) -> Result<CombatantChange, SessionError> {
        self.add_combatant(CombatSide::Party, member)
    }

    pub fn add_enemy(&mut self, enemy: Combatant) -> Result<CombatantChange, SessionError> {
        self.add_combatant(CombatSide::Enemies, enemy)
    }

    pub fn update_party_member(
        &mut self,
        index: usize,
        member: Combatant,
    ) -> Result<CombatantChange, SessionError> {
        self.update_combatant(CombatSide::Party, index, member)
    }

    pub fn update_enemy(
        &mut self,
        index: usize,
        enemy: Combatant,
    ) -> Result<CombatantChange, SessionError> {
        self.update_combatant(CombatSide::Enemies, index, enemy)
    }

    pub fn remove_party_member(&mut self, index: usize) -> Result<CombatantChange, SessionError> {
        self.remove_combatant(CombatSide::Party, index)
    }

    pub fn remove_enemy(&mut self, index: usize) -> Result<CombatantChange, SessionError> {
        self.remove_combatant(CombatSide::Enemies, index)
    }

    fn add_combatant(
        &mut self,
        side: CombatSide,
        combatant: Combatant,
    ) -> Result<CombatantChange, SessionError> {
        self.require(&[Initializing, Active], "add a combatant")?;
        let stats = self.combat_stats.as_mut().ok_or(SessionError::NoCombatStats)?;
        stats.side_mut(side).push(Self::prepare(combatant));
        stats.normalize();
        Ok(CombatantChange::Added {
            side,
            index: stats.side(side).len() - 1,
        })
    }

    fn update_combatant(
        &mut self,
        side: CombatSide,
        index: usize,
        mut combatant: Combatant,
    ) -> Result<CombatantChange, SessionError> {
        self.require(&[Initializing, Active], "update a combatant")?;
        let stats = self.combat_stats.as_mut().ok_or(SessionError::NoCombatStats)?;
        let slot = Self::slot(stats, side, index)?;
        combatant.is_player = side == CombatSide::Party && slot.is_player;
        combatant.normalize();
        *slot = combatant;
        Ok(CombatantChange::Updated { side, index })
    }

    fn remove_combatant(
        &mut self,
        side: CombatSide,
        index: usize,
    ) -> Result<CombatantChange, SessionError> {
        self.require(&[Initializing, Active], "remove a combatant")?;
        let stats = self.combat_stats.as_mut().ok_or(SessionError::NoCombatStats)?;
        if Self::slot(stats, side, index)?.is_player {
            return Err(SessionError::CannotRemovePlayer);
        }
        let removed = stats.side_mut(side).remove(index);
        Ok(CombatantChange::Removed {
            side,
            name: removed.name,
        })
    }

    fn slot(
        stats: &mut CombatStats,
        side: CombatSide,
        index: usize,
    ) -> Result<&mut Combatant, SessionError> {
        let combatants = stats.side_mut(side);
        let len = combatants.len();
        combatants
            .get_mut(index)
            .ok_or(SessionError::CombatantOutOfRange { side, index, len })
    }

    /// Normalize a combatant joining mid-encounter. Newcomers are never the player.
    fn prepare(mut combatant: Combatant) -> Combatant {
        combatant.is_player = false;
        combatant.normalize();
        combatant
    }

    // =========================================================================
    // Turns and alternatives
    // =========================================================================

    /// Append a new turn and apply its stats.
    pub fn record_turn(&mut self, turn: TurnResult) -> Result<TurnRecorded, SessionError> {
        self.require(&[Active], "take an action")?;
        let stats_before = self
            .combat_stats
            .clone()
            .ok_or(SessionError::NoCombatStats)?;
        let stats_after = Self::stats_after(&turn, &stats_before);

        let entry_index = self.encounter_log.add_entry(turn.record());
        self.display_log.add_entry(DisplayLine::action(&turn.action));
        let line_index = self.display_log.add_entry(turn.line());
        self.turn_lines.push(line_index);
        self.checkpoint = Some(TurnCheckpoint {
            entry_index,
            stats_before,
            stats_after: vec![stats_after],
        });
        self.apply_latest_alternative()
    }

    /// Add a regenerated alternative of the latest turn and make it current.
    ///
    /// Stats are recomputed from the checkpoint, never from the previous alternative.
    pub fn record_regeneration(&mut self, turn: TurnResult) -> Result<TurnRecorded, SessionError> {
        self.require(&[Active, Resolving], "regenerate a turn")?;
        let checkpoint = self.checkpoint.as_ref().ok_or(SessionError::NoTurnTaken)?;
        let entry_index = checkpoint.entry_index;
        let stats_after = Self::stats_after(&turn, &checkpoint.stats_before);
        let line_index = self.line_index(entry_index)?;

        self.encounter_log.add_swipe(entry_index, turn.record())?;
        self.display_log.add_swipe(line_index, turn.line())?;
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            checkpoint.stats_after.push(stats_after);
        }
        self.apply_latest_alternative()
    }

    /// Add an alternative to any recorded turn.
    ///
    /// For the latest turn this is a regeneration. For earlier turns only the
    /// text branches; stats are untouched and the alternative cannot end the
    /// encounter.
    pub fn record_alternative(
        &mut self,
        entry_index: usize,
        mut turn: TurnResult,
    ) -> Result<TurnRecorded, SessionError> {
        if self.is_latest_turn(entry_index) {
            return self.record_regeneration(turn);
        }
        self.require(&[Active, Resolving], "regenerate a turn")?;
        let line_index = self.line_index(entry_index)?;
        turn.outcome = None;

        let swipe_index = self.encounter_log.add_swipe(entry_index, turn.record())?;
        self.display_log.add_swipe(line_index, turn.line())?;
        self.rebuild_history();
        Ok(TurnRecorded::Continued {
            entry_index,
            swipe_index,
        })
    }

    /// Switch the latest turn to another alternative, restoring its stats and outcome.
    pub fn select_turn_alternative(
        &mut self,
        swipe_index: usize,
    ) -> Result<TurnRecorded, SessionError> {
        self.require(&[Active, Resolving], "switch alternatives")?;
        let entry_index = self
            .checkpoint
            .as_ref()
            .map(|c| c.entry_index)
            .ok_or(SessionError::NoTurnTaken)?;
        let line_index = self.line_index(entry_index)?;

        self.encounter_log.set_swipe(entry_index, swipe_index)?;
        self.display_log.set_swipe(line_index, swipe_index)?;
        self.apply_latest_alternative()
    }

    /// Switch the current alternative of any turn.
    pub fn set_swipe(&mut self, entry_index: usize, swipe_index: usize) -> Result<(), SessionError> {
        if self.is_latest_turn(entry_index) {
            return self.select_turn_alternative(swipe_index).map(|_| ());
        }
        self.require(&[Active, Resolving], "switch alternatives")?;
        let line_index = self.line_index(entry_index)?;

        self.encounter_log.set_swipe(entry_index, swipe_index)?;
        self.display_log.set_swipe(line_index, swipe_index)?;
        self.rebuild_history();
        Ok(())
    }

    fn is_latest_turn(&self, entry_index: usize) -> bool {
        self.checkpoint
            .as_ref()
            .is_some_and(|c| c.entry_index == entry_index)
    }

    fn line_index(&self, entry_index: usize) -> Result<usize, SessionError> {
        self.turn_lines.get(entry_index).copied().ok_or_else(|| {
            SessionError::Branch(BranchError::EntryOutOfRange {
                index: entry_index,
                len: self.turn_lines.len(),
            })
        })
    }

    fn stats_after(turn: &TurnResult, stats_before: &CombatStats) -> CombatStats {
        turn.combat_stats
            .clone()
            .map(|stats| stats.carrying_player_from(stats_before))
            .unwrap_or_else(|| stats_before.clone())
    }

    /// Make stats, history, state and outcome agree with the latest turn's selection.
    fn apply_latest_alternative(&mut self) -> Result<TurnRecorded, SessionError> {
        let checkpoint = self.checkpoint.as_ref().ok_or(SessionError::NoTurnTaken)?;
        let entry_index = checkpoint.entry_index;
        let entry = self
            .encounter_log
            .get(entry_index)
            .ok_or(SessionError::NoTurnTaken)?;
        let swipe_index = entry.swipe_index();
        let outcome = entry.current().outcome;
        let stats = checkpoint
            .stats_after
            .get(swipe_index)
            .unwrap_or(&checkpoint.stats_before)
            .clone();

        self.combat_stats = Some(stats);
        self.rebuild_history();
        self.outcome = outcome;
        match outcome {
            Some(outcome) => {
                self.transition(Resolving);
                Ok(TurnRecorded::Ended {
                    entry_index,
                    swipe_index,
                    outcome,
                })
            }
            None => {
                self.transition(Active);
                Ok(TurnRecorded::Continued {
                    entry_index,
                    swipe_index,
                })
            }
        }
    }

    /// Intro narration followed by the current alternative of every turn.
    fn rebuild_history(&mut self) {
        let mut history = Vec::with_capacity(1 + self.encounter_log.len() * 2);
        if let Some(index) = self.intro_index() {
            if let Some(entry) = self.display_log.get(index) {
                history.push(HistoryEntry::assistant(&entry.current().message));
            }
        }
        for record in self.encounter_log.current_values() {
            history.push(HistoryEntry::user(&record.action));
            history.push(HistoryEntry::assistant(&record.result));
        }
        self.combat_history = history;
    }

    fn intro_index(&self) -> Option<usize> {
        self.display_log
            .get(0)
            .filter(|entry| entry.current().kind == DisplayKind::Intro)
            .map(|_| 0)
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn snapshot(&self, saved_at: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            saved_at,
            encounter_id: self.id,
            chat_id: self.chat_id.clone(),
            state: self.state,
            profile_override: self.profile_override.clone(),
            started_at: self.started_at,
            start_message: self.start_message.clone(),
            pre_encounter_history: self.pre_encounter_history.clone(),
            tracker_baseline: self.tracker_baseline.clone(),
            combat_stats: self.combat_stats.clone(),
            combat_history: self.combat_history.clone(),
            encounter_log: self.encounter_log.clone(),
            display_log: self.display_log.clone(),
            turn_lines: self.turn_lines.clone(),
            pending_enemies: self.pending_enemies.clone(),
            pending_party: self.pending_party.clone(),
            outcome: self.outcome,
            checkpoint: self.checkpoint.clone(),
        }
    }

    /// Rebuild a session verbatim from a snapshot, rejecting inconsistent data.
    pub fn restore(snapshot: SessionSnapshot) -> Result<Self, SessionError> {
        Self::check_snapshot(&snapshot).map_err(SessionError::CorruptSnapshot)?;
        Ok(Self {
            id: snapshot.encounter_id,
            chat_id: snapshot.chat_id,
            state: snapshot.state,
            profile_override: snapshot.profile_override,
            started_at: snapshot.started_at,
            start_message: snapshot.start_message,
            pre_encounter_history: snapshot.pre_encounter_history,
            tracker_baseline: snapshot.tracker_baseline,
            combat_stats: snapshot.combat_stats,
            combat_history: snapshot.combat_history,
            encounter_log: snapshot.encounter_log,
            display_log: snapshot.display_log,
            turn_lines: snapshot.turn_lines,
            pending_enemies: snapshot.pending_enemies,
            pending_party: snapshot.pending_party,
            outcome: snapshot.outcome,
            checkpoint: snapshot.checkpoint,
        })
    }

    fn check_snapshot(s: &SessionSnapshot) -> Result<(), String> {
        if s.turn_lines.len() != s.encounter_log.len() {
            return Err(format!(
                "{} turns but {} narration lines",
                s.encounter_log.len(),
                s.turn_lines.len()
            ));
        }
        for (entry_index, (entry, &line_index)) in
            s.encounter_log.entries().iter().zip(&s.turn_lines).enumerate()
        {
            let line = s
                .display_log
                .get(line_index)
                .ok_or_else(|| format!("turn {} points at missing line {}", entry_index, line_index))?;
            if line.swipe_count() != entry.swipe_count() || line.swipe_index() != entry.swipe_index() {
                return Err(format!("turn {} and its narration line disagree", entry_index));
            }
        }
        if let Some(checkpoint) = &s.checkpoint {
            if s.encounter_log.last_index() != Some(checkpoint.entry_index) {
                return Err("checkpoint does not belong to the latest turn".to_string());
            }
            let swipes = s
                .encounter_log
                .get(checkpoint.entry_index)
                .map_or(0, |e| e.swipe_count());
            if checkpoint.stats_after.len() != swipes {
                return Err("checkpoint alternatives do not match the latest turn".to_string());
            }
        }
        if matches!(s.state, Active | Resolving) && s.combat_stats.is_none() {
            return Err(format!("{} encounter without combat stats", s.state));
        }
        if s.state == Resolving && s.outcome.is_none() {
            return Err("resolving encounter without an outcome".to_string());
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require(
        &self,
        allowed: &[EncounterState],
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, to: EncounterState) -> StateTransition {
        let from = self.state;
        self.state = to;
        StateTransition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn opening_stats() -> CombatStats {
        CombatStats::new("Forest clearing")
            .with_party_member(Combatant::player("Aria", 20))
            .with_party_member(Combatant::new("Bram", 15))
            .with_enemy(Combatant::new("Wolf", 8))
            .with_enemy(Combatant::new("Alpha Wolf", 12))
    }

    fn started() -> EncounterSession {
        let mut session = EncounterSession::new(ChatId::new("chat-1"));
        session
            .begin_initialization(
                EncounterStart {
                    start_message: "Wolves burst from the trees!".into(),
                    ..Default::default()
                },
                now(),
            )
            .expect("idle session starts");
        session
            .apply_initial_state(InitialEncounter {
                combat_stats: opening_stats(),
                narrative: Some("The pack circles you.".into()),
                ..Default::default()
            })
            .expect("initializing accepts state");
        session
    }

    fn active() -> EncounterSession {
        let mut session = started();
        session.activate().expect("no pending combatants");
        session
    }

    fn turn(action: &str, narrative: &str) -> TurnResult {
        TurnResult {
            action: action.into(),
            narrative: narrative.into(),
            ..Default::default()
        }
    }

    fn wolf_hp(session: &EncounterSession) -> i32 {
        session.combat_stats().expect("stats loaded").enemies[0].hp
    }

    fn with_wolf_hp(hp: i32) -> CombatStats {
        let mut stats = opening_stats();
        stats.enemies[0].hp = hp;
        stats
    }

    #[test]
    fn lifecycle_follows_state_machine() {
        let mut session = EncounterSession::new(ChatId::new("chat-1"));
        assert_eq!(session.state(), Idle);
        assert!(session.activate().is_err());

        let mut session = started();
        assert_eq!(session.state(), Initializing);
        assert_eq!(session.start_message(), Some("Wolves burst from the trees!"));

        let transition = session.activate().expect("activates");
        assert_eq!(transition, StateTransition { from: Initializing, to: Active });

        let recorded = session
            .record_turn(TurnResult {
                outcome: Some(EncounterOutcome::Victory),
                ..turn("Howl back", "The wolves scatter.")
            })
            .expect("active accepts turns");
        assert_eq!(recorded.outcome(), Some(EncounterOutcome::Victory));
        assert_eq!(session.state(), Resolving);

        let record = session
            .archive("The pack fled.", Some("Combat".into()), now())
            .expect("resolving archives");
        assert_eq!(record.result, EncounterOutcome::Victory);
        assert_eq!(session.state(), Archived);

        session.reset();
        assert_eq!(session.state(), Idle);
        assert!(session.encounter_log().is_empty());
    }

    #[test]
    fn begin_rejected_outside_idle() {
        let mut session = started();
        let err = session
            .begin_initialization(EncounterStart::default(), now())
            .expect_err("already initializing");
        assert!(matches!(err, SessionError::InvalidState { state: Initializing, .. }));
        assert_eq!(session.start_message(), Some("Wolves burst from the trees!"));
    }

    #[test]
    fn retry_adds_intro_alternative() {
        let mut session = started();
        session
            .apply_initial_state(InitialEncounter {
                combat_stats: opening_stats(),
                narrative: Some("Eyes gleam in the dark.".into()),
                ..Default::default()
            })
            .expect("retry accepted");

        assert_eq!(session.display_log().len(), 1);
        let intro = session.display_log().get(0).expect("intro line");
        assert_eq!(intro.swipe_count(), 2);
        assert_eq!(intro.current().message, "Eyes gleam in the dark.");
        assert_eq!(session.combat_history().len(), 1);
    }

    #[test]
    fn pending_must_be_resolved_before_combat() {
        let mut session = EncounterSession::new(ChatId::new("chat-1"));
        session
            .begin_initialization(EncounterStart::default(), now())
            .expect("starts");
        let mut hireling = Combatant::new("Hireling", 6);
        hireling.is_player = true;
        session
            .apply_initial_state(InitialEncounter {
                combat_stats: opening_stats(),
                narrative: None,
                pending_enemies: vec![Combatant::new("Bear", 30)],
                pending_party: vec![hireling],
            })
            .expect("accepted");

        assert_eq!(
            session.activate(),
            Err(SessionError::PendingUnresolved { enemies: 1, party: 1 })
        );

        let approved = session
            .approve_pending(CombatSide::Party, 0)
            .expect("pending exists");
        assert!(matches!(approved, PendingResolution::Approved { index: 2, .. }));
        let stats = session.combat_stats().expect("stats");
        assert_eq!(stats.player_index(), Some(0));
        assert!(!stats.party[2].is_player);

        session
            .dismiss_pending(CombatSide::Enemies, 0)
            .expect("pending exists");
        assert_eq!(
            session.dismiss_pending(CombatSide::Enemies, 0),
            Err(SessionError::PendingOutOfRange {
                side: CombatSide::Enemies,
                index: 0,
                len: 0
            })
        );
        assert!(session.activate().is_ok());
    }

    #[test]
    fn removing_player_is_rejected_without_mutation() {
        let mut session = active();
        let before = session.combat_stats().cloned();

        assert_eq!(session.remove_party_member(0), Err(SessionError::CannotRemovePlayer));
        assert_eq!(session.combat_stats().cloned(), before);

        assert!(matches!(
            session.remove_party_member(1),
            Ok(CombatantChange::Removed { .. })
        ));
        assert_eq!(session.combat_stats().map(|s| s.party.len()), Some(1));
    }

    #[test]
    fn combatant_mutations_reject_bad_indices_and_states() {
        let mut session = active();
        assert_eq!(
            session.update_enemy(7, Combatant::new("Ghost", 1)),
            Err(SessionError::CombatantOutOfRange {
                side: CombatSide::Enemies,
                index: 7,
                len: 2
            })
        );

        let mut idle = EncounterSession::new(ChatId::new("chat-2"));
        assert!(matches!(
            idle.add_enemy(Combatant::new("Rat", 2)),
            Err(SessionError::InvalidState { state: Idle, .. })
        ));
    }

    #[test]
    fn update_keeps_player_flag_on_its_slot() {
        let mut session = active();
        session
            .update_party_member(0, Combatant::new("Aria", 20).with_hp(5))
            .expect("slot exists");
        let mut impostor = Combatant::new("Bram", 15);
        impostor.is_player = true;
        session.update_party_member(1, impostor).expect("slot exists");

        let stats = session.combat_stats().expect("stats");
        assert!(stats.party[0].is_player);
        assert_eq!(stats.party[0].hp, 5);
        assert!(!stats.party[1].is_player);
    }

    #[test]
    fn regeneration_restores_stats_from_checkpoint() {
        let mut session = active();
        session
            .record_turn(TurnResult {
                combat_stats: Some(with_wolf_hp(3)),
                ..turn("Slash", "You cut the wolf.")
            })
            .expect("recorded");
        assert_eq!(wolf_hp(&session), 3);

        let regenerated = session
            .record_regeneration(TurnResult {
                combat_stats: Some(with_wolf_hp(6)),
                ..turn("Slash", "You graze the wolf.")
            })
            .expect("regenerated");
        assert_eq!(regenerated.swipe_index(), 1);
        assert_eq!(wolf_hp(&session), 6);
        assert_eq!(session.encounter_log().len(), 1);

        session.select_turn_alternative(0).expect("swipe exists");
        assert_eq!(wolf_hp(&session), 3);
        assert_eq!(
            session.combat_history().last().map(|h| h.content.as_str()),
            Some("You cut the wolf.")
        );
        let line = session.display_log().get(2).expect("narration line");
        assert_eq!(line.current().message, "You cut the wolf.");
        assert_eq!(line.swipe_count(), 2);
    }

    fn party_names(session: &EncounterSession) -> Vec<(String, bool)> {
        session
            .combat_stats()
            .expect("stats loaded")
            .party
            .iter()
            .map(|c| (c.name.clone(), c.is_player))
            .collect()
    }

    #[test]
    fn model_turn_cannot_drop_the_player() {
        let mut session = active();
        let mut emptied = with_wolf_hp(5);
        emptied.party.clear();
        session
            .record_turn(TurnResult {
                combat_stats: Some(emptied),
                ..turn("Slash", "You cut the wolf.")
            })
            .expect("recorded");
        assert_eq!(
            party_names(&session),
            vec![("Aria".to_string(), true), ("Bram".to_string(), false)]
        );
        assert_eq!(wolf_hp(&session), 5);

        let mut without_player = with_wolf_hp(2);
        without_player.party.remove(0);
        without_player.party[0].is_player = true;
        session
            .record_regeneration(TurnResult {
                combat_stats: Some(without_player),
                ..turn("Slash", "Bram shoulders past you.")
            })
            .expect("regenerated");
        assert_eq!(
            party_names(&session),
            vec![("Aria".to_string(), true), ("Bram".to_string(), false)]
        );
        assert_eq!(session.combat_stats().and_then(CombatStats::player).map(|p| p.hp), Some(20));
    }

    #[test]
    fn retried_setup_keeps_the_player() {
        let mut session = started();
        let mut stats = opening_stats();
        stats.party.remove(0);
        session
            .apply_initial_state(InitialEncounter {
                combat_stats: stats,
                narrative: Some("Bram steps forward alone.".into()),
                ..Default::default()
            })
            .expect("retry accepted");
        assert_eq!(
            party_names(&session),
            vec![("Aria".to_string(), true), ("Bram".to_string(), false)]
        );
    }

    #[test]
    fn switching_to_ending_alternative_moves_to_resolving() {
        let mut session = active();
        session.record_turn(turn("Wait", "Nothing happens.")).expect("recorded");
        session
            .record_regeneration(TurnResult {
                outcome: Some(EncounterOutcome::Fled),
                ..turn("Wait", "The wolves lose interest and leave.")
            })
            .expect("regenerated");
        assert_eq!(session.state(), Resolving);
        assert_eq!(session.outcome(), Some(EncounterOutcome::Fled));

        session.select_turn_alternative(0).expect("swipe exists");
        assert_eq!(session.state(), Active);
        assert_eq!(session.outcome(), None);
    }

    #[test]
    fn out_of_range_swipe_is_rejected_without_mutation() {
        let mut session = active();
        session.record_turn(turn("Slash", "Hit.")).expect("recorded");
        let before = session.snapshot(now());

        assert!(matches!(
            session.select_turn_alternative(4),
            Err(SessionError::Branch(BranchError::SwipeOutOfRange { .. }))
        ));
        assert!(matches!(
            session.record_alternative(9, turn("Ghost", "Never happened.")),
            Err(SessionError::Branch(BranchError::EntryOutOfRange { index: 9, .. }))
        ));
        let after = session.snapshot(before.saved_at);
        assert_eq!(before, after);
    }

    #[test]
    fn earlier_turn_alternatives_leave_stats_alone() {
        let mut session = active();
        for (action, hp) in [("One", 7), ("Two", 5), ("Three", 4)] {
            session
                .record_turn(TurnResult {
                    combat_stats: Some(with_wolf_hp(hp)),
                    ..turn(action, &format!("{} lands.", action))
                })
                .expect("recorded");
        }

        let recorded = session
            .record_alternative(
                1,
                TurnResult {
                    combat_stats: Some(with_wolf_hp(1)),
                    outcome: Some(EncounterOutcome::Victory),
                    ..turn("Two", "Two misses.")
                },
            )
            .expect("entry exists");
        assert_eq!(recorded, TurnRecorded::Continued { entry_index: 1, swipe_index: 1 });
        assert_eq!(wolf_hp(&session), 4);
        assert_eq!(session.state(), Active);
        assert!(session
            .combat_history()
            .iter()
            .any(|h| h.content == "Two misses."));

        session.set_swipe(1, 0).expect("swipe exists");
        assert!(session
            .combat_history()
            .iter()
            .any(|h| h.content == "Two lands."));
    }

    #[test]
    fn three_turns_with_regenerated_second_archive_as_victory() {
        let mut session = active();
        session.record_turn(turn("Strike", "You strike.")).expect("turn 1");
        session.record_turn(turn("Parry", "You parry.")).expect("turn 2");
        session
            .record_alternative(1, turn("Parry", "You parry and riposte."))
            .expect("regenerate 2nd");
        session
            .record_turn(TurnResult {
                outcome: Some(EncounterOutcome::Victory),
                ..turn("Finish", "The alpha falls.")
            })
            .expect("turn 3");

        assert_eq!(session.encounter_log().len(), 3);
        assert_eq!(session.encounter_log().get(1).map(|e| e.swipe_count()), Some(2));
        let record = session.archive("Won.", None, now()).expect("archives");
        assert_eq!(record.result, EncounterOutcome::Victory);
        assert_eq!(record.log.len(), 3);
        assert_eq!(record.log[1].result, "You parry and riposte.");
    }

    #[test]
    fn replay_basis_of_latest_and_earlier_turns() {
        let mut session = active();
        session
            .record_turn(TurnResult {
                combat_stats: Some(with_wolf_hp(6)),
                ..turn("Strike", "You strike.")
            })
            .expect("turn 1");
        session
            .record_turn(TurnResult {
                combat_stats: Some(with_wolf_hp(2)),
                ..turn("Again", "You strike again.")
            })
            .expect("turn 2");

        // intro + two turns
        assert_eq!(session.combat_history().len(), 5);
        assert_eq!(session.history_before_turn(0).len(), 1);
        assert_eq!(session.history_before_turn(1).len(), 3);
        assert_eq!(session.stats_before_turn(1).map(|s| s.enemies[0].hp), Some(6));
        assert_eq!(session.stats_before_turn(0).map(|s| s.enemies[0].hp), Some(2));
    }

    #[test]
    fn snapshot_restores_verbatim() {
        let mut session = active();
        session.record_turn(turn("Strike", "You strike.")).expect("recorded");
        session
            .record_regeneration(turn("Strike", "You miss."))
            .expect("regenerated");

        let snapshot = session.snapshot(now());
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let parsed: SessionSnapshot = serde_json::from_str(&json).expect("deserialize");
        let restored = EncounterSession::restore(parsed).expect("consistent");
        assert_eq!(restored, session);
    }

    #[test]
    fn restore_rejects_inconsistent_snapshot() {
        let mut session = active();
        session.record_turn(turn("Strike", "You strike.")).expect("recorded");
        let mut snapshot = session.snapshot(now());
        snapshot.turn_lines.clear();
        assert!(matches!(
            EncounterSession::restore(snapshot),
            Err(SessionError::CorruptSnapshot(_))
        ));

        let mut snapshot = session.snapshot(now());
        snapshot.combat_stats = None;
        assert!(EncounterSession::restore(snapshot).is_err());
    }

    #[test]
    fn declare_outcome_requires_live_encounter() {
        let mut session = started();
        assert!(session.declare_outcome(EncounterOutcome::Fled).is_err());
        session.activate().expect("activates");
        session
            .declare_outcome(EncounterOutcome::Fled)
            .expect("active can conclude");
        assert_eq!(session.state(), Resolving);
        assert_eq!(session.outcome(), Some(EncounterOutcome::Fled));
    }
}
