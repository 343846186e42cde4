//! Combatant value objects - the participants of an encounter.
//!
//! These types double as the wire format the model reads and writes, so field
//! names are camelCase and every optional field has a serde default. Values
//! coming back from the model are untrusted; call [`Combatant::normalize`]
//! before storing them.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// An attack or ability a combatant can use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attack {
    pub name: String,
    /// Free-form effect tag ("physical", "fire", "persuasion", ...).
    #[serde(default, alias = "type")]
    pub effect: String,
}

impl Attack {
    pub fn new(name: impl Into<String>, effect: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            effect: effect.into(),
        }
    }
}

/// A status condition applied to a combatant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEffect {
    #[serde(alias = "name")]
    pub tag: String,
    /// Short display glyph (usually a single emoji).
    #[serde(default, alias = "emoji")]
    pub glyph: String,
}

impl StatusEffect {
    pub fn new(tag: impl Into<String>, glyph: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            glyph: glyph.into(),
        }
    }
}

/// A named secondary resource pool (mana, stamina, composure, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBar {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub current: i32,
    #[serde(default, deserialize_with = "lenient_int")]
    pub max: i32,
}

impl ResourceBar {
    pub fn new(name: impl Into<String>, current: i32, max: i32) -> Self {
        let mut bar = Self {
            name: name.into(),
            current,
            max,
        };
        bar.normalize();
        bar
    }

    /// Clamp `current` into `0..=max` (and `max` to non-negative).
    pub fn normalize(&mut self) {
        self.max = self.max.max(0);
        self.current = self.current.clamp(0, self.max);
    }
}

/// A participant in an encounter, on either side.
///
/// # Invariants
///
/// - `0 <= hp <= max_hp` once normalized
/// - `is_player` is only meaningful for party members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub hp: i32,
    #[serde(default, deserialize_with = "lenient_int")]
    pub max_hp: i32,
    #[serde(default)]
    pub attacks: Vec<Attack>,
    #[serde(default, alias = "statusEffects")]
    pub statuses: Vec<StatusEffect>,
    #[serde(default, alias = "resources", skip_serializing_if = "Vec::is_empty")]
    pub resource_bars: Vec<ResourceBar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_player: bool,
}

impl Combatant {
    /// Create a combatant at full health.
    pub fn new(name: impl Into<String>, max_hp: i32) -> Self {
        let max_hp = max_hp.max(0);
        Self {
            name: name.into(),
            hp: max_hp,
            max_hp,
            attacks: Vec::new(),
            statuses: Vec::new(),
            resource_bars: Vec::new(),
            items: Vec::new(),
            description: None,
            is_player: false,
        }
    }

    /// Create the player's own combatant at full health.
    pub fn player(name: impl Into<String>, max_hp: i32) -> Self {
        let mut combatant = Self::new(name, max_hp);
        combatant.is_player = true;
        combatant
    }

    pub fn with_attack(mut self, attack: Attack) -> Self {
        self.attacks.push(attack);
        self
    }

    pub fn with_status(mut self, status: StatusEffect) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_resource_bar(mut self, bar: ResourceBar) -> Self {
        self.resource_bars.push(bar);
        self
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.items.push(item.into());
        self
    }

    pub fn with_hp(mut self, hp: i32) -> Self {
        self.hp = hp;
        self.normalize();
        self
    }

    /// Returns true once the combatant's primary resource is exhausted.
    pub fn is_defeated(&self) -> bool {
        self.hp <= 0
    }

    /// Clamp every resource into its valid range.
    pub fn normalize(&mut self) {
        self.max_hp = self.max_hp.max(0);
        self.hp = self.hp.clamp(0, self.max_hp);
        for bar in &mut self.resource_bars {
            bar.normalize();
        }
    }
}

/// Accept any JSON number or numeric string, rounded and saturated to `i32`.
///
/// Models write `17.5`, `"12"` or absurdly large values for resources.
fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    deserializer.deserialize_any(LenientInt)
}

struct LenientInt;

impl<'de> Visitor<'de> for LenientInt {
    type Value = i32;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i32, E> {
        Ok(v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i32, E> {
        Ok(v.min(i32::MAX as u64) as i32)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i32, E> {
        // Float-to-int `as` saturates, and NaN becomes 0.
        Ok(v.round() as i32)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i32, E> {
        v.trim()
            .parse::<f64>()
            .map(|n| n.round() as i32)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }

    fn visit_unit<E: de::Error>(self) -> Result<i32, E> {
        Ok(0)
    }
}
