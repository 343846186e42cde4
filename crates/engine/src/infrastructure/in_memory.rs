//! In-process storage adapters.
//!
//! Used by tests and by embedders that persist through their own host.

use async_trait::async_trait;
use encounter_domain::{ArchiveRecord, ChatId, ProfileLibrary, SessionSnapshot, TrackerSnapshot};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{
    EncounterArchiveRepo, ProfileLibraryRepo, RepoError, SessionSnapshotStore,
    TrackerSnapshotPort,
};

/// Snapshot store, archive and profile library held in memory.
#[derive(Default)]
pub struct InMemoryEncounterStore {
    snapshots: RwLock<HashMap<ChatId, SessionSnapshot>>,
    archives: RwLock<HashMap<ChatId, Vec<ArchiveRecord>>>,
    library: RwLock<Option<ProfileLibrary>>,
}

impl InMemoryEncounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionSnapshotStore for InMemoryEncounterStore {
    async fn save(&self, chat_id: &ChatId, snapshot: &SessionSnapshot) -> Result<(), RepoError> {
        self.snapshots
            .write()
            .await
            .insert(chat_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, chat_id: &ChatId) -> Result<Option<SessionSnapshot>, RepoError> {
        Ok(self.snapshots.read().await.get(chat_id).cloned())
    }

    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError> {
        self.snapshots.write().await.remove(chat_id);
        Ok(())
    }

    async fn exists(&self, chat_id: &ChatId) -> Result<bool, RepoError> {
        Ok(self.snapshots.read().await.contains_key(chat_id))
    }
}

#[async_trait]
impl EncounterArchiveRepo for InMemoryEncounterStore {
    async fn append(&self, chat_id: &ChatId, record: &ArchiveRecord) -> Result<(), RepoError> {
        self.archives
            .write()
            .await
            .entry(chat_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list(&self, chat_id: &ChatId) -> Result<Vec<ArchiveRecord>, RepoError> {
        Ok(self
            .archives
            .read()
            .await
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError> {
        self.archives.write().await.remove(chat_id);
        Ok(())
    }
}

#[async_trait]
impl ProfileLibraryRepo for InMemoryEncounterStore {
    async fn load(&self) -> Result<Option<ProfileLibrary>, RepoError> {
        Ok(self.library.read().await.clone())
    }

    async fn save(&self, library: &ProfileLibrary) -> Result<(), RepoError> {
        *self.library.write().await = Some(library.clone());
        Ok(())
    }
}

/// Tracker provider backed by a fixed map, for hosts without a live tracker.
#[derive(Default)]
pub struct StaticTrackerSnapshots {
    snapshots: RwLock<HashMap<ChatId, TrackerSnapshot>>,
}

impl StaticTrackerSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the committed snapshot for `chat_id`.
    pub async fn commit(&self, chat_id: ChatId, snapshot: TrackerSnapshot) {
        self.snapshots.write().await.insert(chat_id, snapshot);
    }
}

#[async_trait]
impl TrackerSnapshotPort for StaticTrackerSnapshots {
    async fn committed(&self, chat_id: &ChatId) -> Result<Option<TrackerSnapshot>, RepoError> {
        Ok(self.snapshots.read().await.get(chat_id).cloned())
    }
}
