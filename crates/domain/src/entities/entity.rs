//! Tokens and terrain placed on a room grid.

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, RoomId};
use crate::value_objects::GridPosition;

fn default_true() -> bool {
    true
}

/// Default combat numbers for freshly placed tokens.
pub const DEFAULT_MAX_HP: i32 = 20;
pub const DEFAULT_ARMOR_CLASS: i32 = 10;
pub const DEFAULT_INITIATIVE: i32 = 10;

/// What an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// A slot a guest can claim as their hero
    PlayerSlot,
    /// A friendly companion travelling with the party
    Teammate,
    Enemy,
    Npc,
    /// Terrain or an interactive object, see `TerrainKind`
    Obstacle,
    /// A key linked to a lockable obstacle
    Key,
}

impl EntityKind {
    /// Player-type kinds move together on party travel.
    pub fn is_party_member(self) -> bool {
        matches!(self, Self::PlayerSlot | Self::Teammate)
    }

    pub fn default_color(self) -> &'static str {
        match self {
            Self::PlayerSlot => "#22c55e",
            Self::Teammate => "#3b82f6",
            Self::Enemy => "#ef4444",
            Self::Npc => "#eab308",
            Self::Obstacle => "#475569",
            Self::Key => "#f59e0b",
        }
    }

    fn default_name(self) -> &'static str {
        match self {
            Self::PlayerSlot => "Hero Slot",
            Self::Teammate => "New teammate",
            Self::Enemy => "New enemy",
            Self::Npc => "New npc",
            Self::Obstacle => "New obstacle",
            Self::Key => "Key",
        }
    }
}

/// Obstacle subtypes (terrain brushes and interactive objects).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerrainKind {
    Wall,
    Lava,
    Water,
    Grass,
    Pit,
    Forest,
    Rock,
    Door,
    Chest,
    Trap,
    Pillar,
    Statue,
    Fountain,
    Stairs,
    Altar,
}

impl TerrainKind {
    /// Objects that can carry a lock and be opened.
    pub fn is_lockable(self) -> bool {
        matches!(self, Self::Door | Self::Chest)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Wall => "WALL",
            Self::Lava => "LAVA",
            Self::Water => "WATER",
            Self::Grass => "GRASS",
            Self::Pit => "PIT",
            Self::Forest => "FOREST",
            Self::Rock => "ROCK",
            Self::Door => "DOOR",
            Self::Chest => "CHEST",
            Self::Trap => "TRAP",
            Self::Pillar => "PILLAR",
            Self::Statue => "STATUE",
            Self::Fountain => "FOUNTAIN",
            Self::Stairs => "STAIRS",
            Self::Altar => "ALTAR",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Lava => "#ea580c",
            Self::Water => "#0ea5e9",
            Self::Grass => "#16a34a",
            Self::Forest => "#166534",
            Self::Door => "#92400e",
            Self::Chest => "#b45309",
            _ => EntityKind::Obstacle.default_color(),
        }
    }
}

/// A placeable token or terrain feature.
///
/// Plain data: the wire payload of `UPDATE_ENTITY` is this struct. Invariants
/// that span entities (links, claims, room bounds) are enforced by the
/// `SessionState` operations, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub x: u32,
    pub y: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub armor_class: i32,
    pub initiative: i32,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<TerrainKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default = "default_true")]
    pub visible_to_guests: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_room_id: Option<RoomId>,
}

impl Entity {
    /// A token of the given kind with default stats.
    pub fn token(kind: EntityKind, position: GridPosition) -> Self {
        Self {
            id: EntityId::new(),
            name: kind.default_name().to_string(),
            kind,
            x: position.x,
            y: position.y,
            hp: DEFAULT_MAX_HP,
            max_hp: DEFAULT_MAX_HP,
            armor_class: DEFAULT_ARMOR_CLASS,
            initiative: DEFAULT_INITIATIVE,
            color: kind.default_color().to_string(),
            claimed_by: None,
            notes: None,
            subtype: None,
            contents: None,
            visible_to_guests: kind != EntityKind::Key,
            locked: false,
            open: false,
            linked_id: None,
            linked_room_id: None,
        }
    }

    /// A terrain brush or interactive object.
    pub fn terrain(subtype: TerrainKind, position: GridPosition) -> Self {
        Self {
            name: subtype.label().to_string(),
            hp: 1,
            max_hp: 1,
            armor_class: 0,
            initiative: 0,
            color: subtype.color().to_string(),
            subtype: Some(subtype),
            ..Self::token(EntityKind::Obstacle, position)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stats(mut self, max_hp: i32, armor_class: i32) -> Self {
        self.max_hp = max_hp.max(0);
        self.hp = self.max_hp;
        self.armor_class = armor_class;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn position(&self) -> GridPosition {
        GridPosition::new(self.x, self.y)
    }

    pub fn set_position(&mut self, position: GridPosition) {
        self.x = position.x;
        self.y = position.y;
    }

    /// Set hit points, clamped to `0..=max_hp`.
    pub fn set_hp(&mut self, hp: i32) {
        self.hp = hp.clamp(0, self.max_hp.max(0));
    }

    pub fn is_lockable(&self) -> bool {
        self.kind == EntityKind::Obstacle && self.subtype.is_some_and(TerrainKind::is_lockable)
    }

    pub fn is_door(&self) -> bool {
        self.kind == EntityKind::Obstacle && self.subtype == Some(TerrainKind::Door)
    }

    pub fn is_party_member(&self) -> bool {
        self.kind.is_party_member()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed_by.is_some()
    }
}
