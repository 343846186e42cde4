//! Host-supplied context quoted into every encounter prompt.

use serde::{Deserialize, Serialize};

/// A character card from the host chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl CharacterCard {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// World, roster and persona of the chat an encounter runs in.
///
/// History is not part of this: it comes from the session, which captures it
/// once when the encounter starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContext {
    /// Setting or world-info text
    #[serde(default)]
    pub world: Option<String>,
    /// Characters present in the chat
    #[serde(default)]
    pub characters: Vec<CharacterCard>,
    /// The user's persona
    #[serde(default)]
    pub persona: Option<CharacterCard>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }

    pub fn with_character(mut self, character: CharacterCard) -> Self {
        self.characters.push(character);
        self
    }

    pub fn with_persona(mut self, persona: CharacterCard) -> Self {
        self.persona = Some(persona);
        self
    }

    pub(crate) fn world_section(&self) -> Option<String> {
        self.world
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(str::to_string)
    }

    pub(crate) fn roster_section(&self) -> Option<String> {
        if self.characters.is_empty() {
            return None;
        }
        Some(
            self.characters
                .iter()
                .map(Self::card_line)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    pub(crate) fn persona_section(&self) -> Option<String> {
        self.persona.as_ref().map(Self::card_line)
    }

    fn card_line(card: &CharacterCard) -> String {
        let description = card.description.trim();
        if description.is_empty() {
            format!("- {}", card.name)
        } else {
            format!("- {}: {}", card.name, description)
        }
    }
}
