//! Per-chat encounter archive: listing and export.

use std::sync::Arc;

use encounter_domain::{ArchiveRecord, ChatId};
use serde::Serialize;

use crate::infrastructure::ports::{EncounterArchiveRepo, RepoError};

/// Export formats for a chat's archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Json,
    Markdown,
}

impl std::str::FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            other => Err(ArchiveError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveListing<'a> {
    chat_id: &'a ChatId,
    encounters: &'a [ArchiveRecord],
}

/// Read side of the encounter archive.
pub struct ArchiveOps {
    repo: Arc<dyn EncounterArchiveRepo>,
}

impl ArchiveOps {
    pub fn new(repo: Arc<dyn EncounterArchiveRepo>) -> Self {
        Self { repo }
    }

    /// Archived encounters of a chat, oldest first.
    pub async fn list(&self, chat_id: &ChatId) -> Result<Vec<ArchiveRecord>, ArchiveError> {
        Ok(self.repo.list(chat_id).await?)
    }

    pub async fn export(&self, chat_id: &ChatId, format: ArchiveFormat) -> Result<String, ArchiveError> {
        let records = self.list(chat_id).await?;
        tracing::debug!(chat_id = %chat_id, encounters = records.len(), ?format, "Exporting archive");
        match format {
            ArchiveFormat::Json => Ok(serde_json::to_string_pretty(&ArchiveListing {
                chat_id,
                encounters: &records,
            })
            .map_err(RepoError::serialization)?),
            ArchiveFormat::Markdown => Ok(render_markdown(chat_id, &records)),
        }
    }

    pub async fn clear(&self, chat_id: &ChatId) -> Result<(), ArchiveError> {
        self.repo.clear(chat_id).await?;
        tracing::info!(chat_id = %chat_id, "Encounter archive cleared");
        Ok(())
    }
}

fn render_markdown(chat_id: &ChatId, records: &[ArchiveRecord]) -> String {
    let mut out = format!("# Encounters in {}\n\n", chat_id);
    if records.is_empty() {
        out.push_str("No encounters have been archived yet.\n");
        return out;
    }
    let sections: Vec<_> = records.iter().map(ArchiveRecord::to_markdown).collect();
    out.push_str(&sections.join("\n"));
    out
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Unknown archive format '{0}', expected json or markdown")]
    UnknownFormat(String),

    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
}
