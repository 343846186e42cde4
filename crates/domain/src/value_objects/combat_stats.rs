//! Combat stats - the full resource picture of an encounter.

use serde::{Deserialize, Serialize};

use super::combatant::Combatant;
use super::outcome::EncounterOutcome;

/// Which side of the encounter a combatant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombatSide {
    Party,
    Enemies,
}

impl CombatSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Party => "party",
            Self::Enemies => "enemies",
        }
    }
}

impl std::fmt::Display for CombatSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Environment plus both sides of an encounter, in display order.
///
/// # Invariants (after [`CombatStats::normalize`])
///
/// - Every combatant satisfies `0 <= hp <= max_hp`
/// - When the party is non-empty, exactly one member has `is_player = true`
/// - No enemy carries `is_player = true`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CombatStats {
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub party: Vec<Combatant>,
    #[serde(default)]
    pub enemies: Vec<Combatant>,
}

impl CombatStats {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            party: Vec::new(),
            enemies: Vec::new(),
        }
    }

    pub fn with_party_member(mut self, member: Combatant) -> Self {
        self.party.push(member);
        self
    }

    pub fn with_enemy(mut self, enemy: Combatant) -> Self {
        self.enemies.push(enemy);
        self
    }

    pub fn side(&self, side: CombatSide) -> &[Combatant] {
        match side {
            CombatSide::Party => &self.party,
            CombatSide::Enemies => &self.enemies,
        }
    }

    pub fn side_mut(&mut self, side: CombatSide) -> &mut Vec<Combatant> {
        match side {
            CombatSide::Party => &mut self.party,
            CombatSide::Enemies => &mut self.enemies,
        }
    }

    /// Index of the player's combatant in `party`, if any.
    pub fn player_index(&self) -> Option<usize> {
        self.party.iter().position(|c| c.is_player)
    }

    pub fn player(&self) -> Option<&Combatant> {
        self.party.iter().find(|c| c.is_player)
    }

    /// Clamp resources and repair the player flag.
    ///
    /// Model output routinely forgets `isPlayer` or marks several members.
    /// The first flagged member wins; if none is flagged, the first party
    /// member becomes the player.
    pub fn normalize(&mut self) {
        for combatant in self.party.iter_mut().chain(self.enemies.iter_mut()) {
            combatant.normalize();
        }
        for enemy in &mut self.enemies {
            enemy.is_player = false;
        }

        let player = self.player_index().unwrap_or(0);
        for (index, member) in self.party.iter_mut().enumerate() {
            member.is_player = index == player;
        }
    }

    /// Adopt model-written stats while keeping the player from `previous`.
    ///
    /// The player is matched by name. An empty party keeps the previous party
    /// whole; a party without the player gets the previous player entry back
    /// at its old position. Stats without a previous player are only normalized.
    pub fn carrying_player_from(mut self, previous: &CombatStats) -> Self {
        let Some(player_index) = previous.player_index() else {
            return self.normalized();
        };
        if self.party.is_empty() {
            self.party = previous.party.clone();
            return self.normalized();
        }

        let player = &previous.party[player_index];
        let index = match self
            .party
            .iter()
            .position(|c| c.name.trim().eq_ignore_ascii_case(player.name.trim()))
        {
            Some(index) => index,
            None => {
                let index = player_index.min(self.party.len());
                self.party.insert(index, player.clone());
                index
            }
        };
        for (i, member) in self.party.iter_mut().enumerate() {
            member.is_player = i == index;
        }
        self.normalized()
    }

    /// Returns a normalized copy.
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Outcome implied by resources alone: the player is down, or every enemy is.
    pub fn implied_outcome(&self) -> Option<EncounterOutcome> {
        if self.player().is_some_and(Combatant::is_defeated) {
            return Some(EncounterOutcome::Defeat);
        }
        if !self.enemies.is_empty() && self.enemies.iter().all(Combatant::is_defeated) {
            return Some(EncounterOutcome::Victory);
        }
        None
    }
}
