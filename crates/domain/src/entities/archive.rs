//! Archive record - what remains of an encounter once it is resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EncounterId;
use crate::value_objects::{ActionRecord, EncounterOutcome};

/// One archived encounter in a chat's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRecord {
    pub encounter_id: EncounterId,
    pub timestamp: DateTime<Utc>,
    /// Current alternative of every turn, in order.
    pub log: Vec<ActionRecord>,
    pub summary: String,
    pub result: EncounterOutcome,
    /// Profile the encounter ran under, by display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl ArchiveRecord {
    /// Render the record as a Markdown section.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "## Encounter {} ({})\n\n",
            self.timestamp.format("%Y-%m-%d %H:%M UTC"),
            self.result
        );
        if let Some(profile) = &self.profile_name {
            out.push_str(&format!("*Profile:* {}\n\n", profile));
        }
        for (turn, record) in self.log.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}**\n   {}\n",
                turn + 1,
                record.action.trim(),
                record.result.trim()
            ));
        }
        if !self.log.is_empty() {
            out.push('\n');
        }
        out.push_str("### Summary\n\n");
        out.push_str(self.summary.trim());
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn markdown_lists_turns_and_summary() {
        let record = ArchiveRecord {
            encounter_id: EncounterId::new(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).single().expect("valid timestamp"),
            log: vec![ActionRecord::new("Swing", "The goblin reels.")],
            summary: "The goblin fled into the dark.".into(),
            result: EncounterOutcome::Victory,
            profile_name: Some("Combat".into()),
        };
        let md = record.to_markdown();
        assert!(md.starts_with("## Encounter 2026-03-01 12:30 UTC (victory)"));
        assert!(md.contains("1. **Swing**\n   The goblin reels."));
        assert!(md.contains("### Summary\n\nThe goblin fled into the dark."));
    }
}
