//! Entities placed on the battle-map and the rooms that hold them

mod entity;
mod room;

pub use entity::{
    Entity, EntityKind, TerrainKind, DEFAULT_ARMOR_CLASS, DEFAULT_INITIATIVE, DEFAULT_MAX_HP,
};
pub use room::Room;
