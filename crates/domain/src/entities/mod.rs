//! Entities - objects with identity that outlive a single encounter

mod archive;
mod profile;
pub mod profile_presets;

pub use archive::ArchiveRecord;
pub use profile::{EncounterProfile, ProfileExport, ProfileLibrary, ProfileVocabulary};
pub use profile_presets::{
    default_profile, is_preset_id, preset_by_id, preset_profiles, DEFAULT_PROFILE_ID, PRESET_IDS,
};
