//! Use cases - User story orchestration.
//!
//! Each module contains use cases for a specific domain area.

pub mod archive;
pub mod encounter;
pub mod profiles;
pub mod validation;

pub use archive::{ArchiveError, ArchiveFormat, ArchiveOps};
pub use encounter::{
    Applied, CharacterCard, ConcludedEncounter, EncounterError, EncounterOps, PromptContext,
};
pub use profiles::{ProfileError, ProfileOps};
