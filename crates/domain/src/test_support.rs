//! Small builders shared by the unit tests in this crate.

use crate::aggregates::SessionState;
use crate::ids::{EntityId, RoomId};
use crate::value_objects::{Actor, ClaimStats, DisplayName, GridDimensions, GridPosition, RoomName};

pub(crate) fn name(value: &str) -> DisplayName {
    DisplayName::new(value).expect("valid display name")
}

pub(crate) fn guest(value: &str) -> Actor {
    Actor::guest(name(value))
}

pub(crate) fn stats(max_hp: i32, armor_class: i32) -> ClaimStats {
    ClaimStats::new(max_hp, armor_class).expect("valid stats")
}

pub(crate) fn add_room(state: &mut SessionState, room_name: &str) -> RoomId {
    state.add_room(
        RoomName::new(room_name).expect("valid room name"),
        GridDimensions::default(),
    )
}

pub(crate) fn position_of(state: &SessionState, id: EntityId) -> GridPosition {
    state.find_entity(id).expect("entity exists").position()
}
