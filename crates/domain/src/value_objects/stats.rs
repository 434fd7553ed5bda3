//! Combat stat inputs: claim choices and generated stat blocks.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Starting stats a guest picks when claiming a player slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStats {
    max_hp: i32,
    armor_class: i32,
}

impl ClaimStats {
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `max_hp < 1` or `armor_class < 0`.
    pub fn new(max_hp: i32, armor_class: i32) -> Result<Self, DomainError> {
        if max_hp < 1 {
            return Err(DomainError::validation("Max HP must be at least 1"));
        }
        if armor_class < 0 {
            return Err(DomainError::validation("Armor class cannot be negative"));
        }
        Ok(Self {
            max_hp,
            armor_class,
        })
    }

    pub fn max_hp(&self) -> i32 {
        self.max_hp
    }

    pub fn armor_class(&self) -> i32 {
        self.armor_class
    }
}

/// A stat block produced by the external text-to-stats generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GeneratedStats {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub ac: i32,
    #[serde(default)]
    pub notes: String,
}

impl GeneratedStats {
    pub const FALLBACK_NAME: &'static str = "Manifestation";
    pub const FALLBACK_HP: i32 = 10;
    pub const FALLBACK_AC: i32 = 10;

    /// Replace blank or non-positive values with the summoning defaults.
    pub fn with_fallbacks(self) -> Self {
        let name = if self.name.trim().is_empty() {
            Self::FALLBACK_NAME.to_string()
        } else {
            self.name.trim().to_string()
        };
        Self {
            name,
            hp: if self.hp > 0 { self.hp } else { Self::FALLBACK_HP },
            ac: if self.ac > 0 { self.ac } else { Self::FALLBACK_AC },
            notes: self.notes,
        }
    }
}
