//! Storage port traits.
//!
//! Everything is keyed by the host's chat id. Implementations must treat a
//! missing key as "nothing stored", never as an error.

use async_trait::async_trait;
use encounter_domain::{ArchiveRecord, ChatId, ProfileLibrary, SessionSnapshot, TrackerSnapshot};

use super::error::RepoError;

// =============================================================================
// Persistence Bridge
// =============================================================================

/// Snapshot save/restore of the live encounter, one slot per chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionSnapshotStore: Send + Sync {
    async fn save(&self, chat_id: &ChatId, snapshot: &SessionSnapshot) -> Result<(), RepoError>;
    async fn load(&self, chat_id: &ChatId) -> Result<Option<SessionSnapshot>, RepoError>;
    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError>;
    async fn exists(&self, chat_id: &ChatId) -> Result<bool, RepoError>;
}

// =============================================================================
// Encounter Archive
// =============================================================================

/// Append-only list of resolved encounters per chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncounterArchiveRepo: Send + Sync {
    async fn append(&self, chat_id: &ChatId, record: &ArchiveRecord) -> Result<(), RepoError>;
    /// Oldest first.
    async fn list(&self, chat_id: &ChatId) -> Result<Vec<ArchiveRecord>, RepoError>;
    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError>;
}

// =============================================================================
// Profile Library
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileLibraryRepo: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<ProfileLibrary>, RepoError>;
    async fn save(&self, library: &ProfileLibrary) -> Result<(), RepoError>;
}

// =============================================================================
// Tracker (read-only)
// =============================================================================

/// The host tracker's committed state for a chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackerSnapshotPort: Send + Sync {
    async fn committed(&self, chat_id: &ChatId) -> Result<Option<TrackerSnapshot>, RepoError>;
}
