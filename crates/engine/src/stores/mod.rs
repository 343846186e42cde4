//! In-memory state storage modules.
//!
//! Stores manage runtime state that doesn't belong in the database:
//! - `EncounterContexts` - the live encounter session of each chat

pub mod encounter;

pub use encounter::{EncounterContext, EncounterContexts, GenerationGuard};
