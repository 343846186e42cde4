extern crate self as encounter_domain;

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod events;
pub mod ids;
pub mod value_objects;

pub use aggregates::{
    EncounterSession, EncounterStart, EncounterState, InitialEncounter, SessionError,
    SessionSnapshot, TurnCheckpoint, TurnResult,
};
pub use entities::{
    default_profile, is_preset_id, preset_by_id, preset_profiles, ArchiveRecord,
    EncounterProfile, ProfileExport, ProfileLibrary, ProfileVocabulary, DEFAULT_PROFILE_ID,
    PRESET_IDS,
};
pub use error::DomainError;
pub use events::{CombatantChange, PendingResolution, StateTransition, TurnRecorded};
pub use ids::{ChatId, EncounterId, ProfileId};
pub use value_objects::{
    recent_history, ActionRecord, Attack, BranchError, BranchLog, BranchableEntry, CombatSide,
    CombatStats, Combatant, DisplayKind, DisplayLine, EncounterOutcome, EncounterSettings,
    HistoryEntry, HistoryRole, NarrationMode, NarrativeStyle, Person, ResourceBar, Stakes,
    StatusEffect, Tense, TrackerSnapshot,
};
