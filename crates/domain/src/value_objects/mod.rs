//! Value objects - Immutable objects defined by their attributes

mod branch_log;
mod combat_stats;
mod combatant;
mod encounter_log;
mod history;
mod outcome;
mod settings;
mod stakes;
mod tracker;

pub use branch_log::{BranchError, BranchLog, BranchableEntry};
pub use combat_stats::{CombatSide, CombatStats};
pub use combatant::{Attack, Combatant, ResourceBar, StatusEffect};
pub use encounter_log::{ActionRecord, DisplayKind, DisplayLine};
pub use history::{recent_history, HistoryEntry, HistoryRole};
pub use outcome::EncounterOutcome;
pub use settings::{EncounterSettings, NarrationMode, NarrativeStyle, Person, Tense};
pub use stakes::Stakes;
pub use tracker::TrackerSnapshot;
