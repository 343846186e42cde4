//! SQLite-backed encounter storage: live snapshots, the per-chat archive and
//! the profile library, one table each, stored as JSON blobs.

use async_trait::async_trait;
use encounter_domain::{ArchiveRecord, ChatId, ProfileLibrary, SessionSnapshot};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::infrastructure::ports::{
    ClockPort, EncounterArchiveRepo, ProfileLibraryRepo, RepoError, SessionSnapshotStore,
};

/// The single row key of the profile library table.
const LIBRARY_SCOPE: &str = "global";

/// SQLite implementation of the snapshot store, archive and profile library.
pub struct SqliteEncounterStore {
    pool: SqlitePool,
    clock: Arc<dyn ClockPort>,
}

impl SqliteEncounterStore {
    pub async fn new(db_path: &str, clock: Arc<dyn ClockPort>) -> Result<Self, RepoError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .map_err(|e| RepoError::database("connect", e))?;

        for ddl in [
            r#"
            CREATE TABLE IF NOT EXISTS encounter_snapshots (
                chat_id TEXT PRIMARY KEY,
                snapshot_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS encounter_archive (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                record_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_encounter_archive_chat ON encounter_archive (chat_id, seq)",
            r#"
            CREATE TABLE IF NOT EXISTS profile_library (
                scope TEXT PRIMARY KEY,
                library_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        ] {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(|e| RepoError::database("migrate", e))?;
        }

        Ok(Self { pool, clock })
    }
}

#[async_trait]
impl SessionSnapshotStore for SqliteEncounterStore {
    async fn save(&self, chat_id: &ChatId, snapshot: &SessionSnapshot) -> Result<(), RepoError> {
        let json = serde_json::to_string(snapshot).map_err(RepoError::serialization)?;
        let now = self.clock.now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO encounter_snapshots (chat_id, snapshot_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chat_id.as_str())
        .bind(json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_snapshot", e))?;

        Ok(())
    }

    async fn load(&self, chat_id: &ChatId) -> Result<Option<SessionSnapshot>, RepoError> {
        let row = sqlx::query("SELECT snapshot_json FROM encounter_snapshots WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("load_snapshot", e))?;

        match row {
            Some(row) => {
                let json: String = row.get("snapshot_json");
                let snapshot = serde_json::from_str(&json).map_err(RepoError::serialization)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM encounter_snapshots WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::database("clear_snapshot", e))?;
        Ok(())
    }

    async fn exists(&self, chat_id: &ChatId) -> Result<bool, RepoError> {
        let row = sqlx::query("SELECT 1 AS present FROM encounter_snapshots WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("snapshot_exists", e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl EncounterArchiveRepo for SqliteEncounterStore {
    async fn append(&self, chat_id: &ChatId, record: &ArchiveRecord) -> Result<(), RepoError> {
        let json = serde_json::to_string(record).map_err(RepoError::serialization)?;

        sqlx::query(
            "INSERT INTO encounter_archive (chat_id, record_json, created_at) VALUES (?, ?, ?)",
        )
        .bind(chat_id.as_str())
        .bind(json)
        .bind(self.clock.now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("append_archive", e))?;

        Ok(())
    }

    async fn list(&self, chat_id: &ChatId) -> Result<Vec<ArchiveRecord>, RepoError> {
        let rows = sqlx::query(
            "SELECT record_json FROM encounter_archive WHERE chat_id = ? ORDER BY seq ASC",
        )
        .bind(chat_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepoError::database("list_archive", e))?;

        rows.into_iter()
            .map(|row| {
                let json: String = row.get("record_json");
                serde_json::from_str(&json).map_err(RepoError::serialization)
            })
            .collect()
    }

    async fn clear(&self, chat_id: &ChatId) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM encounter_archive WHERE chat_id = ?")
            .bind(chat_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepoError::database("clear_archive", e))?;
        Ok(())
    }
}

#[async_trait]
impl ProfileLibraryRepo for SqliteEncounterStore {
    async fn load(&self) -> Result<Option<ProfileLibrary>, RepoError> {
        let row = sqlx::query("SELECT library_json FROM profile_library WHERE scope = ?")
            .bind(LIBRARY_SCOPE)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepoError::database("load_profiles", e))?;

        match row {
            Some(row) => {
                let json: String = row.get("library_json");
                let library = serde_json::from_str(&json).map_err(RepoError::serialization)?;
                Ok(Some(library))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, library: &ProfileLibrary) -> Result<(), RepoError> {
        let json = serde_json::to_string(library).map_err(RepoError::serialization)?;

        sqlx::query(
            r#"
            INSERT INTO profile_library (scope, library_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                library_json = excluded.library_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(LIBRARY_SCOPE)
        .bind(json)
        .bind(self.clock.now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| RepoError::database("save_profiles", e))?;

        Ok(())
    }
}
