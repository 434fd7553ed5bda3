//! What a guest is allowed to see.
//!
//! Guests receive the full snapshot; this projection is what a guest client
//! renders from it. Hidden entities are left out and enemy hit points are
//! redacted unless the host has chosen to show them.

use serde::Serialize;

use crate::aggregates::SessionState;
use crate::entities::{Entity, EntityKind, Room};
use crate::ids::RoomId;

/// One entity as seen by a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestEntityView<'a> {
    #[serde(flatten)]
    pub entity: &'a Entity,
    pub hp_redacted: bool,
}

impl GuestEntityView<'_> {
    /// Hit points to display, `None` when redacted.
    pub fn visible_hp(&self) -> Option<(i32, i32)> {
        (!self.hp_redacted).then_some((self.entity.hp, self.entity.max_hp))
    }
}

/// A room as seen by a guest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestRoomView<'a> {
    pub room_id: RoomId,
    pub name: &'a str,
    pub entities: Vec<GuestEntityView<'a>>,
}

impl SessionState {
    /// Guest projection of `room_id`, or `None` if the room does not exist.
    pub fn guest_view(&self, room_id: RoomId) -> Option<GuestRoomView<'_>> {
        let room = self.room(room_id)?;
        Some(project(room, self.show_enemy_hp_to_guests()))
    }

    pub fn guest_view_of_active_room(&self) -> Option<GuestRoomView<'_>> {
        self.guest_view(self.active_room_id())
    }
}

fn project(room: &Room, show_enemy_hp: bool) -> GuestRoomView<'_> {
    let entities = room
        .entities()
        .filter(|e| e.visible_to_guests)
        .map(|entity| GuestEntityView {
            entity,
            hp_redacted: entity.kind == EntityKind::Enemy && !show_enemy_hp,
        })
        .collect();
    GuestRoomView {
        room_id: room.id(),
        name: room.name().as_str(),
        entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TerrainKind;
    use crate::value_objects::GridPosition;
    use chrono::Utc;

    #[test]
    fn hidden_keys_are_left_out_until_revealed() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let chest = state
            .place_terrain(room, TerrainKind::Chest, GridPosition::new(3, 3))
            .expect("placed");
        let key = state.forge_key(chest).expect("forged");

        let ids: Vec<_> = state
            .guest_view(room)
            .expect("room")
            .entities
            .iter()
            .map(|v| v.entity.id)
            .collect();
        assert_eq!(ids, vec![chest]);

        state.set_visibility(key, true).expect("exists");
        let view = state.guest_view(room).expect("room");
        assert_eq!(view.entities.len(), 2);
    }

    #[test]
    fn enemy_hp_is_redacted_unless_shown() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        state.add_token(room, EntityKind::Enemy, None).expect("added");
        state.add_token(room, EntityKind::Npc, None).expect("added");
        state.set_show_enemy_hp_to_guests(false);

        let view = state.guest_view_of_active_room().expect("room");
        for v in &view.entities {
            match v.entity.kind {
                EntityKind::Enemy => assert_eq!(v.visible_hp(), None),
                _ => assert!(v.visible_hp().is_some()),
            }
        }

        state.set_show_enemy_hp_to_guests(true);
        let view = state.guest_view_of_active_room().expect("room");
        assert!(view.entities.iter().all(|v| v.visible_hp().is_some()));
    }
}
