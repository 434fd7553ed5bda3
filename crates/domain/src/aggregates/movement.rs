//! Token movement, key pickup and party travel between rooms.

use std::collections::HashSet;

use crate::entities::EntityKind;
use crate::error::DomainError;
use crate::ids::{EntityId, RoomId};
use crate::value_objects::{Actor, GridPosition};

use super::SessionState;

/// What a successful move did besides relocating the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// A party token stepped on a visible key
    CollectedKey {
        key: EntityId,
        unlocked: Option<EntityId>,
    },
    /// The party went through a linked door
    Traveled(TravelReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelReport {
    pub from: RoomId,
    pub to: RoomId,
    pub party: Vec<EntityId>,
}

impl SessionState {
    /// Move an entity to a cell in its own room.
    ///
    /// A party member moving onto an unlocked door that leads elsewhere takes
    /// the whole party through it. A locked door refuses the move. A guest's
    /// token moving onto a visible key picks it up.
    pub fn move_entity(
        &mut self,
        id: EntityId,
        to: GridPosition,
        actor: &Actor,
    ) -> Result<MoveOutcome, DomainError> {
        let room_id = self
            .room_of(id)
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        let room = self
            .room(room_id)
            .ok_or_else(|| DomainError::not_found("Room", room_id))?;
        let mover = room
            .entity(id)
            .ok_or_else(|| DomainError::not_found("Entity", id))?;

        if !actor.controls(mover) {
            return Err(DomainError::forbidden("Only the owner may move this token"));
        }
        room.grid().ensure_contains(to)?;
        if mover.position() == to {
            return Ok(MoveOutcome::Moved);
        }

        if mover.is_party_member() {
            let door = room
                .entities_at(to)
                .find(|e| e.is_door() && e.linked_room_id.is_some());
            if let Some(door) = door {
                if door.locked {
                    return Err(DomainError::Locked(door.name.clone()));
                }
                let door_id = door.id;
                return self.travel_party(room_id, door_id).map(MoveOutcome::Traveled);
            }
        }

        let key = match actor {
            Actor::Guest(_) if mover.is_party_member() => room
                .entities_at(to)
                .find(|e| e.kind == EntityKind::Key && e.visible_to_guests)
                .map(|k| k.id),
            _ => None,
        };

        let outcome = match key {
            Some(key) => {
                let unlocked = self.collect_key(key)?;
                MoveOutcome::CollectedKey { key, unlocked }
            }
            None => MoveOutcome::Moved,
        };
        if let Some(mover) = self.entity_mut(id) {
            mover.set_position(to);
        }
        Ok(outcome)
    }

    /// Move every party member in `from` through `door_id` into its destination.
    ///
    /// Members spawn around the destination's door back to `from`, or the
    /// destination centre when there is none. The destination becomes active.
    /// All-or-nothing: placements are computed before anything moves.
    pub fn travel_party(&mut self, from: RoomId, door_id: EntityId) -> Result<TravelReport, DomainError> {
        let source = self
            .room(from)
            .ok_or_else(|| DomainError::not_found("Room", from))?;
        let door = source
            .entity(door_id)
            .ok_or_else(|| DomainError::not_found("Entity", door_id))?;
        if !door.is_door() {
            return Err(DomainError::constraint("Only doors lead to other rooms"));
        }
        if door.locked {
            return Err(DomainError::Locked(door.name.clone()));
        }
        let to = door
            .linked_room_id
            .ok_or_else(|| DomainError::constraint(format!("'{}' leads nowhere", door.name)))?;
        if to == from {
            return Err(DomainError::constraint("A door cannot lead into its own room"));
        }
        let destination = self
            .room(to)
            .ok_or_else(|| DomainError::not_found("Room", to))?;

        let party: Vec<EntityId> = source.party_members().map(|e| e.id).collect();
        let grid = destination.grid();
        let spawn = destination
            .entities()
            .find(|e| e.is_door() && e.linked_room_id == Some(from))
            .map(|e| e.position())
            .unwrap_or_else(|| grid.center());

        let mut taken: HashSet<GridPosition> = destination.entities().map(|e| e.position()).collect();
        let mut placements = Vec::with_capacity(party.len());
        for id in &party {
            let cell = grid.nearest_free_cell(spawn, |p| !taken.contains(&p));
            grid.ensure_contains(cell)?;
            taken.insert(cell);
            placements.push((*id, cell));
        }

        let mut travellers = Vec::with_capacity(placements.len());
        let source = self.room_mut(from)?;
        for (id, cell) in placements {
            if let Some(mut member) = source.remove(id) {
                member.set_position(cell);
                travellers.push(member);
            }
        }
        let destination = self.room_mut(to)?;
        for member in travellers {
            destination.insert(member)?;
        }
        self.set_active_room_unchecked(to);

        Ok(TravelReport { from, to, party })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::TerrainKind;
    use crate::test_support::*;
    use chrono::Utc;

    struct Dungeon {
        state: SessionState,
        entrance: RoomId,
        vault: RoomId,
        door: EntityId,
        hero: EntityId,
    }

    fn dungeon() -> Dungeon {
        let mut state = SessionState::new(Utc::now());
        let entrance = state.active_room_id();
        let vault = add_room(&mut state, "Vault");
        let door = state
            .place_terrain(entrance, TerrainKind::Door, GridPosition::new(14, 7))
            .expect("placed");
        state.link_door(door, Some(vault)).expect("linked");
        let hero = state
            .add_token(entrance, EntityKind::PlayerSlot, Some(GridPosition::new(13, 7)))
            .expect("added");
        state.claim(hero, &name("Kara"), stats(24, 14)).expect("claimed");
        Dungeon {
            state,
            entrance,
            vault,
            door,
            hero,
        }
    }

    #[test]
    fn owner_moves_own_token() {
        let mut d = dungeon();
        let outcome = d
            .state
            .move_entity(d.hero, GridPosition::new(12, 7), &guest("Kara"))
            .expect("moved");
        assert_eq!(outcome, MoveOutcome::Moved);
        assert_eq!(position_of(&d.state, d.hero), GridPosition::new(12, 7));
    }

    #[test]
    fn strangers_and_out_of_bounds_moves_are_refused() {
        let mut d = dungeon();
        assert!(matches!(
            d.state.move_entity(d.hero, GridPosition::new(12, 7), &guest("Bram")),
            Err(DomainError::Forbidden(_))
        ));
        assert!(matches!(
            d.state.move_entity(d.hero, GridPosition::new(15, 7), &guest("Kara")),
            Err(DomainError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn stepping_through_a_door_moves_the_whole_party() {
        let mut d = dungeon();
        let buddy = d
            .state
            .add_token(d.entrance, EntityKind::Teammate, Some(GridPosition::new(2, 2)))
            .expect("added");
        let goblin = d
            .state
            .add_token(d.entrance, EntityKind::Enemy, Some(GridPosition::new(3, 3)))
            .expect("added");

        let outcome = d
            .state
            .move_entity(d.hero, GridPosition::new(14, 7), &guest("Kara"))
            .expect("traveled");

        let MoveOutcome::Traveled(report) = outcome else {
            panic!("expected travel, got {:?}", outcome);
        };
        assert_eq!((report.from, report.to), (d.entrance, d.vault));
        assert_eq!(d.state.active_room_id(), d.vault);
        assert_eq!(d.state.room_of(d.hero), Some(d.vault));
        assert_eq!(d.state.room_of(buddy), Some(d.vault));
        assert_eq!(d.state.room_of(goblin), Some(d.entrance));
        assert!(d.state.find_entity(d.door).is_some());
        // no reciprocal door: spawn around the centre
        let hero_at = position_of(&d.state, d.hero);
        let buddy_at = position_of(&d.state, buddy);
        assert_ne!(hero_at, buddy_at);
        assert!(hero_at.x.abs_diff(7) <= 1 && hero_at.y.abs_diff(7) <= 1);
        assert!(d.state.validate().is_ok());
    }

    #[test]
    fn party_arrives_next_to_the_reciprocal_door() {
        let mut d = dungeon();
        let back = d
            .state
            .place_terrain(d.vault, TerrainKind::Door, GridPosition::new(0, 3))
            .expect("placed");
        d.state.link_door(back, Some(d.entrance)).expect("linked");

        d.state
            .move_entity(d.hero, GridPosition::new(14, 7), &guest("Kara"))
            .expect("traveled");

        let at = position_of(&d.state, d.hero);
        assert_eq!(at, GridPosition::new(0, 2));
    }

    #[test]
    fn locked_door_refuses_and_nothing_moves() {
        let mut d = dungeon();
        d.state.set_locked(d.door, true).expect("lockable");
        let before = d.state.clone();

        let err = d
            .state
            .move_entity(d.hero, GridPosition::new(14, 7), &guest("Kara"))
            .unwrap_err();
        assert!(matches!(err, DomainError::Locked(_)));
        assert_eq!(d.state, before);
    }

    #[test]
    fn walking_onto_a_revealed_key_picks_it_up() {
        let mut d = dungeon();
        let chest = d
            .state
            .place_terrain(d.entrance, TerrainKind::Chest, GridPosition::new(5, 5))
            .expect("placed");
        let key = d.state.forge_key(chest).expect("forged");
        let key_at = position_of(&d.state, key);
        d.state.set_visibility(key, true).expect("exists");

        let outcome = d
            .state
            .move_entity(d.hero, key_at, &guest("Kara"))
            .expect("moved");

        assert_eq!(
            outcome,
            MoveOutcome::CollectedKey {
                key,
                unlocked: Some(chest)
            }
        );
        assert!(d.state.find_entity(key).is_none());
        assert!(!d.state.find_entity(chest).expect("chest").locked);
        assert!(d.state.verify_links().is_ok());
    }

    #[test]
    fn hidden_keys_stay_put() {
        let mut d = dungeon();
        let chest = d
            .state
            .place_terrain(d.entrance, TerrainKind::Chest, GridPosition::new(5, 5))
            .expect("placed");
        let key = d.state.forge_key(chest).expect("forged");
        let key_at = position_of(&d.state, key);

        let outcome = d
            .state
            .move_entity(d.hero, key_at, &guest("Kara"))
            .expect("moved");
        assert_eq!(outcome, MoveOutcome::Moved);
        assert!(d.state.find_entity(key).is_some());
    }
}
