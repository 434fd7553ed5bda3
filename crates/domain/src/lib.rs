//! RealmLink domain: the replicated battle-map model.
//!
//! Everything in here is synchronous and I/O free. The engine crate owns the
//! only mutable `SessionState` on the host and routes every local gesture and
//! guest request through the operations defined on it.

pub mod aggregates;
pub mod entities;
pub mod error;
pub mod ids;
pub mod value_objects;
pub mod view;

#[cfg(test)]
mod test_support;

pub use aggregates::{
    EncounterStatus, GuestUpdate, MoveOutcome, SessionContent, SessionState, TravelReport,
    FIRST_ROOM_NAME,
};
pub use entities::{
    Entity, EntityKind, Room, TerrainKind, DEFAULT_ARMOR_CLASS, DEFAULT_INITIATIVE, DEFAULT_MAX_HP,
};
pub use error::DomainError;
pub use ids::{EntityId, RoomId};
pub use value_objects::{
    Actor, ClaimStats, DisplayName, GeneratedStats, GridDimensions, GridPosition, Revision,
    RoomName, MAX_GRID_SIDE, SPAWN_SEARCH_RINGS,
};
pub use view::{GuestEntityView, GuestRoomView};
