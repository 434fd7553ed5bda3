//! Rooms: independent grids that own their entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::Entity;
use crate::error::DomainError;
use crate::ids::{EntityId, RoomId};
use crate::value_objects::{GridDimensions, GridPosition, RoomName};

/// A named grid holding an id-indexed arena of entities.
///
/// Entities are serialized as a list; the arena is rebuilt on load and a
/// duplicate id is a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    id: RoomId,
    name: RoomName,
    #[serde(with = "entity_list")]
    entities: BTreeMap<EntityId, Entity>,
    grid_dimensions: GridDimensions,
}

impl Room {
    pub fn new(name: RoomName, grid: GridDimensions) -> Self {
        Self {
            id: RoomId::new(),
            name,
            entities: BTreeMap::new(),
            grid_dimensions: grid,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &RoomName {
        &self.name
    }

    pub fn grid(&self) -> GridDimensions {
        self.grid_dimensions
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities_at(&self, pos: GridPosition) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.position() == pos)
    }

    pub fn is_occupied(&self, pos: GridPosition) -> bool {
        self.entities_at(pos).next().is_some()
    }

    pub fn party_members(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(|e| e.is_party_member())
    }

    /// The token `name` holds in this room, if any.
    pub fn claimed_by(&self, name: &str) -> Option<&Entity> {
        self.entities
            .values()
            .find(|e| e.claimed_by.as_deref() == Some(name))
    }

    /// Nearest unoccupied cell to `spawn` (see `GridDimensions::nearest_free_cell`).
    pub fn nearest_free_cell(&self, spawn: GridPosition) -> GridPosition {
        self.grid_dimensions
            .nearest_free_cell(spawn, |p| !self.is_occupied(p))
    }

    // =========================================================================
    // Mutations (crate-private; the session aggregate guards invariants)
    // =========================================================================

    pub(crate) fn set_name(&mut self, name: RoomName) {
        self.name = name;
    }

    pub(crate) fn set_grid(&mut self, grid: GridDimensions) -> Result<(), DomainError> {
        if let Some(stranded) = self.entities.values().find(|e| !grid.contains(e.position())) {
            return Err(DomainError::constraint(format!(
                "Resizing would strand '{}' at ({}, {})",
                stranded.name, stranded.x, stranded.y
            )));
        }
        self.grid_dimensions = grid;
        Ok(())
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub(crate) fn insert(&mut self, entity: Entity) -> Result<(), DomainError> {
        self.grid_dimensions.ensure_contains(entity.position())?;
        self.entities.insert(entity.id, entity);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub(crate) fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }
}

mod entity_list {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::entities::Entity;
    use crate::ids::EntityId;

    pub fn serialize<S>(entities: &BTreeMap<EntityId, Entity>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(entities.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<EntityId, Entity>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<Entity>::deserialize(deserializer)?;
        let mut arena = BTreeMap::new();
        for entity in list {
            let id = entity.id;
            if arena.insert(id, entity).is_some() {
                return Err(D::Error::custom(format!("duplicate entity id {}", id)));
            }
        }
        Ok(arena)
    }
}
