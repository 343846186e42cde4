//! Conversation history messages fed back into prompts.

use serde::{Deserialize, Serialize};

/// Who authored a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
}

impl HistoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A role/content pair, optionally attributed to a named speaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub role: HistoryRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            speaker: None,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Assistant,
            speaker: None,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::System,
            speaker: None,
            content: content.into(),
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Label used when rendering the message into a transcript.
    pub fn label(&self) -> &str {
        match &self.speaker {
            Some(speaker) => speaker,
            None => match self.role {
                HistoryRole::User => "User",
                HistoryRole::Assistant => "Narrator",
                HistoryRole::System => "System",
            },
        }
    }
}

/// Newest `limit` entries of `history`, oldest first.
pub fn recent_history(history: &[HistoryEntry], limit: usize) -> &[HistoryEntry] {
    let start = history.len().saturating_sub(limit);
    &history[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_history_keeps_newest() {
        let history: Vec<_> = (0..5).map(|i| HistoryEntry::user(i.to_string())).collect();
        let recent = recent_history(&history, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "3");
        assert_eq!(recent[1].content, "4");

        assert_eq!(recent_history(&history, 10).len(), 5);
        assert!(recent_history(&history, 0).is_empty());
    }

    #[test]
    fn label_prefers_speaker() {
        assert_eq!(HistoryEntry::assistant("hi").label(), "Narrator");
        assert_eq!(HistoryEntry::user("hi").with_speaker("Aria").label(), "Aria");
    }
}
