//! Profile registry operations.
//!
//! Presets are compiled in and always win for their ids. Custom profiles and
//! the global default id live in a [`ProfileLibrary`] that is written through
//! the repo before the in-memory copy changes, so a failed save leaves the
//! registry as it was.

use std::sync::Arc;

use encounter_domain::{
    default_profile, is_preset_id, preset_by_id, preset_profiles, EncounterProfile,
    ProfileExport, ProfileId, ProfileLibrary,
};
use tokio::sync::RwLock;

use super::sanitize::{sanitize_profile, validate_profile, ProfileValidation};
use crate::infrastructure::ports::{ProfileLibraryRepo, RepoError};

/// Profile registry use case.
pub struct ProfileOps {
    repo: Arc<dyn ProfileLibraryRepo>,
    library: RwLock<ProfileLibrary>,
}

impl ProfileOps {
    /// Registry with an empty library. Call [`ProfileOps::reload`] to read the repo.
    pub fn new(repo: Arc<dyn ProfileLibraryRepo>) -> Self {
        Self {
            repo,
            library: RwLock::new(ProfileLibrary::default()),
        }
    }

    /// Registry populated from the repo.
    pub async fn load(repo: Arc<dyn ProfileLibraryRepo>) -> Result<Self, ProfileError> {
        let ops = Self::new(repo);
        ops.reload().await?;
        Ok(ops)
    }

    pub async fn reload(&self) -> Result<(), ProfileError> {
        let library = self.repo.load().await?.unwrap_or_default();
        *self.library.write().await = library;
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The profile to run an encounter under. Always returns a profile.
    ///
    /// Tries the per-encounter override, then the global default, then falls
    /// back to the built-in Combat profile.
    pub async fn active_profile(&self, override_id: Option<&ProfileId>) -> EncounterProfile {
        let library = self.library.read().await;
        override_id
            .into_iter()
            .chain(library.default_profile_id.as_ref())
            .find_map(|id| Self::resolve(&library, id))
            .unwrap_or_else(default_profile)
    }

    /// Preset or custom profile by id, presets first.
    pub async fn profile_by_id(&self, id: &ProfileId) -> Option<EncounterProfile> {
        let library = self.library.read().await;
        preset_by_id(id).or_else(|| library.find(id).cloned())
    }

    /// Presets followed by custom profiles. A custom entry reusing a preset id
    /// replaces that preset in the listing.
    pub async fn all_profiles(&self) -> Vec<EncounterProfile> {
        let library = self.library.read().await;
        let mut profiles: Vec<EncounterProfile> = preset_profiles()
            .into_iter()
            .map(|preset| library.find(&preset.id).cloned().unwrap_or(preset))
            .collect();
        profiles.extend(
            library
                .custom
                .iter()
                .filter(|p| !is_preset_id(&p.id))
                .cloned(),
        );
        profiles
    }

    pub async fn default_profile_id(&self) -> Option<ProfileId> {
        self.library.read().await.default_profile_id.clone()
    }

    /// Sanitize then validate, without storing anything.
    pub fn validate(&self, profile: &EncounterProfile) -> ProfileValidation {
        validate_profile(&sanitize_profile(profile))
    }

    fn resolve(library: &ProfileLibrary, id: &ProfileId) -> Option<EncounterProfile> {
        if let Some(preset) = preset_by_id(id) {
            return Some(preset);
        }
        // The stored library may have been edited outside the registry.
        let custom = sanitize_profile(library.find(id)?);
        let validation = validate_profile(&custom);
        if validation.valid {
            Some(custom)
        } else {
            tracing::warn!(
                profile_id = %id,
                errors = %validation.message(),
                "Stored profile failed validation, ignoring"
            );
            None
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or replace a custom profile by id.
    pub async fn save_profile(
        &self,
        profile: EncounterProfile,
    ) -> Result<EncounterProfile, ProfileError> {
        if is_preset_id(&profile.id) {
            return Err(ProfileError::PresetImmutable(profile.id));
        }
        let profile = Self::checked(profile)?;

        let mut library = self.library.write().await;
        let mut next = library.clone();
        match next.position(&profile.id) {
            Some(index) => next.custom[index] = profile.clone(),
            None => next.custom.push(profile.clone()),
        }
        self.commit(&mut library, next).await?;

        tracing::info!(profile_id = %profile.id, name = %profile.name, "Saved encounter profile");
        Ok(profile)
    }

    /// Store `profile` as a new custom profile under a fresh id.
    pub async fn create_profile(
        &self,
        mut profile: EncounterProfile,
    ) -> Result<EncounterProfile, ProfileError> {
        profile.id = ProfileId::generate();
        self.save_profile(profile).await
    }

    /// Replace an existing custom profile, keeping its id.
    pub async fn update_profile(
        &self,
        id: &ProfileId,
        mut profile: EncounterProfile,
    ) -> Result<EncounterProfile, ProfileError> {
        if is_preset_id(id) {
            return Err(ProfileError::PresetImmutable(id.clone()));
        }
        if self.library.read().await.find(id).is_none() {
            return Err(ProfileError::NotFound(id.clone()));
        }
        profile.id = id.clone();
        self.save_profile(profile).await
    }

    /// Delete a custom profile. A default pointing at it is cleared.
    pub async fn delete_profile(&self, id: &ProfileId) -> Result<(), ProfileError> {
        if is_preset_id(id) {
            return Err(ProfileError::PresetImmutable(id.clone()));
        }

        let mut library = self.library.write().await;
        let index = library
            .position(id)
            .ok_or_else(|| ProfileError::NotFound(id.clone()))?;
        let mut next = library.clone();
        next.custom.remove(index);
        if next.default_profile_id.as_ref() == Some(id) {
            next.default_profile_id = None;
        }
        self.commit(&mut library, next).await?;

        tracing::info!(profile_id = %id, "Deleted encounter profile");
        Ok(())
    }

    /// Set the global default. `None` returns to the built-in default.
    pub async fn set_active_profile(&self, id: Option<ProfileId>) -> Result<(), ProfileError> {
        let mut library = self.library.write().await;
        if let Some(id) = &id {
            if preset_by_id(id).is_none() && library.find(id).is_none() {
                return Err(ProfileError::NotFound(id.clone()));
            }
        }
        let mut next = library.clone();
        next.default_profile_id = id;
        self.commit(&mut library, next).await
    }

    /// Copy any profile into a new custom profile.
    pub async fn duplicate_profile(
        &self,
        id: &ProfileId,
    ) -> Result<EncounterProfile, ProfileError> {
        let source = self
            .profile_by_id(id)
            .await
            .ok_or_else(|| ProfileError::NotFound(id.clone()))?;
        self.save_profile(source.duplicate()).await
    }

    /// Minimal-field JSON for sharing.
    pub async fn export_profile(&self, id: &ProfileId) -> Result<String, ProfileError> {
        let profile = self
            .profile_by_id(id)
            .await
            .ok_or_else(|| ProfileError::NotFound(id.clone()))?;
        serde_json::to_string_pretty(&profile.to_export())
            .map_err(|e| ProfileError::Import(e.to_string()))
    }

    /// Store an exported profile as a new custom profile.
    ///
    /// Any id in the payload is ignored. Vocabulary is not part of the export
    /// format and comes from the default profile.
    pub async fn import_profile(&self, json: &str) -> Result<EncounterProfile, ProfileError> {
        let export: ProfileExport = serde_json::from_str(json)
            .map_err(|e| ProfileError::Import(format!("Malformed profile JSON: {}", e)))?;
        let profile = EncounterProfile::from_export(export, default_profile().vocabulary);
        self.save_profile(profile).await
    }

    /// Drop custom entries that repeat an earlier id or reuse a preset id.
    pub async fn cleanup_duplicate_profiles(&self) -> Result<usize, ProfileError> {
        let mut library = self.library.write().await;
        let mut seen: Vec<ProfileId> = Vec::new();
        let mut next = library.clone();
        next.custom.retain(|profile| {
            if is_preset_id(&profile.id) || seen.contains(&profile.id) {
                return false;
            }
            seen.push(profile.id.clone());
            true
        });

        let removed = library.custom.len() - next.custom.len();
        if removed > 0 {
            self.commit(&mut library, next).await?;
            tracing::info!(removed, "Removed duplicate encounter profiles");
        }
        Ok(removed)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn checked(profile: EncounterProfile) -> Result<EncounterProfile, ProfileError> {
        let mut profile = sanitize_profile(&profile);
        profile.is_preset = false;
        let validation = validate_profile(&profile);
        if validation.valid {
            Ok(profile)
        } else {
            Err(ProfileError::Invalid(validation.message()))
        }
    }

    async fn commit(
        &self,
        current: &mut ProfileLibrary,
        next: ProfileLibrary,
    ) -> Result<(), ProfileError> {
        self.repo.save(&next).await?;
        *current = next;
        Ok(())
    }
}

/// Errors from profile registry operations.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Invalid profile: {0}")]
    Invalid(String),

    #[error("Profile not found: {0}")]
    NotFound(ProfileId),

    #[error("Preset profile '{0}' cannot be modified or deleted")]
    PresetImmutable(ProfileId),

    #[error("Profile import failed: {0}")]
    Import(String),

    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
}
