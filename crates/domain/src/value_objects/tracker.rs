//! Read-only view of the host tracker's committed state.

use serde::{Deserialize, Serialize};

/// The committed tracker blocks for a chat.
///
/// Each block is opaque text owned by the tracker; the engine only quotes it
/// into prompts and, in combined mode, asks the model for an updated version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    #[serde(default)]
    pub user_stats: String,
    #[serde(default)]
    pub info_box: String,
    #[serde(default)]
    pub character_thoughts: String,
}

impl TrackerSnapshot {
    pub fn is_empty(&self) -> bool {
        self.user_stats.trim().is_empty()
            && self.info_box.trim().is_empty()
            && self.character_thoughts.trim().is_empty()
    }

    /// Render the non-empty blocks as labelled sections.
    pub fn render(&self) -> String {
        [
            ("User Stats", &self.user_stats),
            ("Info Box", &self.info_box),
            ("Present Characters", &self.character_thoughts),
        ]
        .into_iter()
        .filter(|(_, body)| !body.trim().is_empty())
        .map(|(label, body)| format!("[{}]\n{}", label, body.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
    }
}
