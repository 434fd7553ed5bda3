//! Session aggregate - the unit of replication
//!
//! # Design
//!
//! - **Private fields**: rooms, active room and revision are only reachable
//!   through methods that keep the invariants below.
//! - **Arena storage**: entities live in per-room id-indexed maps; key/lock
//!   pairs reference each other by id, never by pointer.
//! - **Outcomes, not events**: mutations return small outcome values the engine
//!   can log or surface; the full state is replicated, not the outcome.
//!
//! # Invariants
//!
//! - There is always at least one room and `active_room_id` names one of them.
//! - Every entity lies inside its room's grid and ids are unique across rooms.
//! - `linked_id` pairs are mutual (see `links.rs`).
//! - `claimed_by` is never cleared once set.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Entity, EntityKind, Room, TerrainKind};
use crate::error::DomainError;
use crate::ids::{EntityId, RoomId};
use crate::value_objects::{Actor, GridDimensions, GridPosition, Revision, RoomName};

fn default_true() -> bool {
    true
}

/// Name of the room every new session starts with.
pub const FIRST_ROOM_NAME: &str = "The Entrance";

/// Encounter status shown to everyone at the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EncounterStatus {
    #[default]
    Active,
    Victory,
    Defeat,
    ShortRest,
    LongRest,
}

/// Canonical shared state of one session.
///
/// Serializes to the snapshot format
/// `{rooms, activeRoomId, status, showEnemyHpToGuests, updatedAt}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    rooms: BTreeMap<RoomId, Room>,
    active_room_id: RoomId,
    status: EncounterStatus,
    #[serde(default = "default_true")]
    show_enemy_hp_to_guests: bool,
    #[serde(rename = "updatedAt")]
    revision: Revision,
}

/// Everything in a snapshot except the revision stamp.
///
/// Two states with equal content serialize identically here, which is what the
/// host uses to decide whether a mutation deserves a new revision.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContent<'a> {
    rooms: &'a BTreeMap<RoomId, Room>,
    active_room_id: RoomId,
    status: EncounterStatus,
    show_enemy_hp_to_guests: bool,
}

impl SessionState {
    // =========================================================================
    // Constructor
    // =========================================================================

    /// A fresh session with a single default room.
    pub fn new(now: DateTime<Utc>) -> Self {
        let first = Room::new(RoomName::from_static(FIRST_ROOM_NAME), GridDimensions::default());
        let active_room_id = first.id();
        let mut rooms = BTreeMap::new();
        rooms.insert(active_room_id, first);
        Self {
            rooms,
            active_room_id,
            status: EncounterStatus::Active,
            show_enemy_hp_to_guests: true,
            revision: Revision::at(now),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn room(&self, id: RoomId) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_room_id(&self) -> RoomId {
        self.active_room_id
    }

    pub fn active_room(&self) -> Option<&Room> {
        self.rooms.get(&self.active_room_id)
    }

    pub fn status(&self) -> EncounterStatus {
        self.status
    }

    pub fn show_enemy_hp_to_guests(&self) -> bool {
        self.show_enemy_hp_to_guests
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn content(&self) -> SessionContent<'_> {
        SessionContent {
            rooms: &self.rooms,
            active_room_id: self.active_room_id,
            status: self.status,
            show_enemy_hp_to_guests: self.show_enemy_hp_to_guests,
        }
    }

    /// Room currently holding `entity`.
    pub fn room_of(&self, entity: EntityId) -> Option<RoomId> {
        self.rooms
            .values()
            .find(|room| room.contains(entity))
            .map(Room::id)
    }

    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        self.rooms.values().find_map(|room| room.entity(id))
    }

    pub fn entity_count(&self) -> usize {
        self.rooms.values().map(Room::len).sum()
    }

    // =========================================================================
    // Revision
    // =========================================================================

    /// Stamp a new revision. Only the owning store calls this.
    pub fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    pub fn add_room(&mut self, name: RoomName, grid: GridDimensions) -> RoomId {
        let room = Room::new(name, grid);
        let id = room.id();
        self.rooms.insert(id, room);
        id
    }

    pub fn rename_room(&mut self, id: RoomId, name: RoomName) -> Result<(), DomainError> {
        self.room_mut(id)?.set_name(name);
        Ok(())
    }

    pub fn resize_room(&mut self, id: RoomId, grid: GridDimensions) -> Result<(), DomainError> {
        self.room_mut(id)?.set_grid(grid)
    }

    /// Remove a room. Doors pointing at it lose their destination and links
    /// crossing into it are cleared on the surviving side.
    pub fn remove_room(&mut self, id: RoomId) -> Result<Room, DomainError> {
        if !self.rooms.contains_key(&id) {
            return Err(DomainError::not_found("Room", id));
        }
        if self.rooms.len() == 1 {
            return Err(DomainError::constraint("A session needs at least one room"));
        }
        let removed = self
            .rooms
            .remove(&id)
            .ok_or_else(|| DomainError::not_found("Room", id))?;
        let orphaned: HashSet<EntityId> = removed.entities().map(|e| e.id).collect();
        for room in self.rooms.values_mut() {
            for entity in room.entities_mut() {
                if entity.linked_room_id == Some(id) {
                    entity.linked_room_id = None;
                }
                if entity.linked_id.is_some_and(|l| orphaned.contains(&l)) {
                    entity.linked_id = None;
                    entity.locked = false;
                }
            }
        }
        if self.active_room_id == id {
            if let Some(next) = self.rooms.keys().next() {
                self.active_room_id = *next;
            }
        }
        Ok(removed)
    }

    pub fn set_active_room(&mut self, id: RoomId) -> Result<(), DomainError> {
        if !self.rooms.contains_key(&id) {
            return Err(DomainError::not_found("Room", id));
        }
        self.active_room_id = id;
        Ok(())
    }

    // =========================================================================
    // Encounter settings
    // =========================================================================

    pub fn set_status(&mut self, status: EncounterStatus) {
        self.status = status;
    }

    pub fn set_show_enemy_hp_to_guests(&mut self, show: bool) {
        self.show_enemy_hp_to_guests = show;
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Add a host-built entity to a room.
    ///
    /// Links between entities can only be created by `forge_key`, so an entity
    /// arriving with `linked_id` set is refused.
    pub fn add_entity(&mut self, room_id: RoomId, entity: Entity) -> Result<EntityId, DomainError> {
        if entity.linked_id.is_some() {
            return Err(DomainError::constraint("Links are created by forging a key"));
        }
        if self.find_entity(entity.id).is_some() {
            return Err(DomainError::constraint(format!(
                "Entity id {} already in use",
                entity.id
            )));
        }
        self.check_door_target(room_id, &entity)?;
        let id = entity.id;
        self.room_mut(room_id)?.insert(entity)?;
        Ok(id)
    }

    /// Add a default token of `kind`, at `position` or the nearest free cell
    /// to the room centre.
    pub fn add_token(
        &mut self,
        room_id: RoomId,
        kind: EntityKind,
        position: Option<GridPosition>,
    ) -> Result<EntityId, DomainError> {
        let room = self.room(room_id).ok_or_else(|| DomainError::not_found("Room", room_id))?;
        let position = position.unwrap_or_else(|| room.nearest_free_cell(room.grid().center()));
        self.add_entity(room_id, Entity::token(kind, position))
    }

    /// Paint a terrain brush at a cell.
    pub fn place_terrain(
        &mut self,
        room_id: RoomId,
        subtype: TerrainKind,
        position: GridPosition,
    ) -> Result<EntityId, DomainError> {
        self.add_entity(room_id, Entity::terrain(subtype, position))
    }

    /// Point a door at another room.
    pub fn link_door(&mut self, door_id: EntityId, destination: Option<RoomId>) -> Result<(), DomainError> {
        let room_id = self.room_of(door_id).ok_or_else(|| DomainError::not_found("Entity", door_id))?;
        let mut candidate = self
            .find_entity(door_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Entity", door_id))?;
        candidate.linked_room_id = destination;
        self.check_door_target(room_id, &candidate)?;
        if let Some(door) = self.entity_mut(door_id) {
            door.linked_room_id = destination;
        }
        Ok(())
    }

    /// Eraser brush: remove the first entity at a cell.
    pub fn erase_at(&mut self, room_id: RoomId, position: GridPosition) -> Result<Option<Entity>, DomainError> {
        let target = self
            .room(room_id)
            .ok_or_else(|| DomainError::not_found("Room", room_id))?
            .entities_at(position)
            .next()
            .map(|e| e.id);
        match target {
            Some(id) => self.remove_entity(id).map(Some),
            None => Ok(None),
        }
    }

    /// Delete an entity. A linked partner loses its link.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<Entity, DomainError> {
        let room_id = self.room_of(id).ok_or_else(|| DomainError::not_found("Entity", id))?;
        let removed = self
            .room_mut(room_id)?
            .remove(id)
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        if let Some(partner) = removed.linked_id.and_then(|p| self.entity_mut(p)) {
            partner.linked_id = None;
        }
        Ok(removed)
    }

    /// Set hit points (clamped). Guests may only touch their own token.
    pub fn update_hp(&mut self, id: EntityId, hp: i32, actor: &Actor) -> Result<(), DomainError> {
        let entity = self.entity_mut(id).ok_or_else(|| DomainError::not_found("Entity", id))?;
        if !actor.controls(entity) {
            return Err(DomainError::forbidden("Only the owner may change this token's HP"));
        }
        entity.set_hp(hp);
        Ok(())
    }

    /// Host edit: replace an entity wholesale.
    ///
    /// The id, claim and key link are kept from the current entity. A position
    /// change goes through movement rules, so a party token dropped on a linked
    /// door travels.
    pub fn replace_entity(&mut self, updated: Entity) -> Result<(), DomainError> {
        let id = updated.id;
        let room_id = self.room_of(id).ok_or_else(|| DomainError::not_found("Entity", id))?;
        let current = self
            .find_entity(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        self.check_door_target(room_id, &updated)?;

        let target = updated.position();
        if target != current.position() {
            self.move_entity(id, target, &Actor::Host)?;
        }

        let entity = self.entity_mut(id).ok_or_else(|| DomainError::not_found("Entity", id))?;
        let position = entity.position();
        *entity = Entity {
            linked_id: current.linked_id,
            claimed_by: current.claimed_by,
            ..updated
        };
        entity.set_position(position);
        entity.set_hp(entity.hp);
        Ok(())
    }

    /// Reveal or hide an entity from guests.
    pub fn set_visibility(&mut self, id: EntityId, visible: bool) -> Result<(), DomainError> {
        let entity = self.entity_mut(id).ok_or_else(|| DomainError::not_found("Entity", id))?;
        entity.visible_to_guests = visible;
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check every structural invariant. Used on imported and received snapshots.
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.rooms.contains_key(&self.active_room_id) {
            return Err(DomainError::not_found("Room", self.active_room_id));
        }
        let mut seen = HashSet::new();
        for (key, room) in &self.rooms {
            if *key != room.id() {
                return Err(DomainError::validation(format!(
                    "Room {} stored under key {}",
                    room.id(),
                    key
                )));
            }
            for entity in room.entities() {
                if !seen.insert(entity.id) {
                    return Err(DomainError::validation(format!(
                        "Entity {} appears in more than one room",
                        entity.id
                    )));
                }
                room.grid().ensure_contains(entity.position())?;
                if entity.max_hp < 0 || entity.hp < 0 || entity.hp > entity.max_hp {
                    return Err(DomainError::validation(format!(
                        "Entity {} has hp {} outside 0..={}",
                        entity.id, entity.hp, entity.max_hp
                    )));
                }
                self.check_door_target(room.id(), entity)?;
            }
        }
        self.verify_links()
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    pub(crate) fn room_mut(&mut self, id: RoomId) -> Result<&mut Room, DomainError> {
        self.rooms
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("Room", id))
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.rooms.values_mut().find_map(|room| room.entity_mut(id))
    }

    pub(crate) fn set_active_room_unchecked(&mut self, id: RoomId) {
        self.active_room_id = id;
    }

    fn check_door_target(&self, room_id: RoomId, entity: &Entity) -> Result<(), DomainError> {
        let Some(target) = entity.linked_room_id else {
            return Ok(());
        };
        if !entity.is_door() {
            return Err(DomainError::constraint("Only doors lead to other rooms"));
        }
        if target == room_id {
            return Err(DomainError::constraint("A door cannot lead into its own room"));
        }
        if !self.rooms.contains_key(&target) {
            return Err(DomainError::not_found("Room", target));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn new_session_has_one_active_room_with_default_grid() {
        let state = SessionState::new(Utc::now());
        assert_eq!(state.room_count(), 1);
        let room = state.active_room().expect("active room");
        assert_eq!(room.name().as_str(), FIRST_ROOM_NAME);
        assert_eq!(room.grid().rows(), 15);
        assert_eq!(state.status(), EncounterStatus::Active);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn add_token_defaults_to_room_centre_then_spirals_outward() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let a = state.add_token(room, EntityKind::Enemy, None).expect("added");
        let b = state.add_token(room, EntityKind::Enemy, None).expect("added");
        assert_eq!(position_of(&state, a), GridPosition::new(7, 7));
        assert_eq!(position_of(&state, b), GridPosition::new(6, 6));
    }

    #[test]
    fn removing_the_last_room_is_refused() {
        let mut state = SessionState::new(Utc::now());
        let only = state.active_room_id();
        assert!(state.remove_room(only).is_err());
    }

    #[test]
    fn removing_a_room_unhooks_doors_and_moves_the_active_room() {
        let mut state = SessionState::new(Utc::now());
        let entrance = state.active_room_id();
        let vault = add_room(&mut state, "Vault");
        let door = state
            .place_terrain(entrance, TerrainKind::Door, GridPosition::new(14, 7))
            .expect("placed");
        state.link_door(door, Some(vault)).expect("linked");
        state.set_active_room(vault).expect("exists");

        state.remove_room(vault).expect("removed");

        assert_eq!(state.active_room_id(), entrance);
        assert_eq!(state.find_entity(door).and_then(|d| d.linked_room_id), None);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn only_doors_may_point_at_rooms() {
        let mut state = SessionState::new(Utc::now());
        let entrance = state.active_room_id();
        let vault = add_room(&mut state, "Vault");
        let wall = state
            .place_terrain(entrance, TerrainKind::Wall, GridPosition::new(0, 0))
            .expect("placed");
        assert!(state.link_door(wall, Some(vault)).is_err());
    }

    #[test]
    fn erase_removes_the_entity_under_the_brush() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let cell = GridPosition::new(4, 4);
        state.place_terrain(room, TerrainKind::Lava, cell).expect("placed");

        let erased = state.erase_at(room, cell).expect("room exists");
        assert_eq!(erased.map(|e| e.subtype), Some(Some(TerrainKind::Lava)));
        assert!(state.erase_at(room, cell).expect("room exists").is_none());
    }

    #[test]
    fn guest_cannot_change_hp_of_a_token_they_do_not_own() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let goblin = state.add_token(room, EntityKind::Enemy, None).expect("added");

        let err = state.update_hp(goblin, 1, &guest("Kara")).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        state.update_hp(goblin, -4, &Actor::Host).expect("host may");
        assert_eq!(state.find_entity(goblin).map(|e| e.hp), Some(0));
    }

    #[test]
    fn replace_entity_keeps_identity_claim_and_link() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let chest = state
            .place_terrain(room, TerrainKind::Chest, GridPosition::new(3, 3))
            .expect("placed");
        let key = state.forge_key(chest).expect("forged");

        let mut edited = state.find_entity(chest).cloned().expect("exists");
        edited.name = "Reliquary".into();
        edited.contents = Some("A silver bell".into());
        edited.linked_id = None;
        state.replace_entity(edited).expect("host edit");

        let chest_now = state.find_entity(chest).expect("exists");
        assert_eq!(chest_now.name, "Reliquary");
        assert_eq!(chest_now.linked_id, Some(key));
        assert!(state.verify_links().is_ok());
    }

    #[test]
    fn replace_entity_rejects_out_of_bounds_moves_without_changing_anything() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let npc = state.add_token(room, EntityKind::Npc, None).expect("added");
        let before = state.clone();

        let mut edited = state.find_entity(npc).cloned().expect("exists");
        edited.x = 99;
        edited.name = "Wanderer".into();
        assert!(state.replace_entity(edited).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn validate_catches_bad_hp() {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        let id = state.add_token(room, EntityKind::Npc, None).expect("added");
        if let Some(e) = state.entity_mut(id) {
            e.hp = e.max_hp + 1;
        }
        assert!(matches!(state.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn snapshot_uses_wire_field_names() {
        let state = SessionState::new(Utc::now());
        let json = serde_json::to_value(&state).expect("serialize");
        for field in ["rooms", "activeRoomId", "status", "showEnemyHpToGuests", "updatedAt"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        let back: SessionState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
