//! Key/lock pairs and lockable objects.
//!
//! A forged key and its lock reference each other through `linked_id`. The
//! pair is created, consumed and broken only here and in `remove_entity`, so
//! a link is always mutual or absent.

use std::collections::HashMap;

use crate::entities::{Entity, EntityKind};
use crate::error::DomainError;
use crate::ids::EntityId;
use crate::value_objects::Actor;

use super::SessionState;

impl SessionState {
    /// Forge a hidden key for a door or chest and lock it.
    ///
    /// The key lands on the nearest free cell to the lock. Returns the key id.
    pub fn forge_key(&mut self, lock_id: EntityId) -> Result<EntityId, DomainError> {
        let room_id = self
            .room_of(lock_id)
            .ok_or_else(|| DomainError::not_found("Entity", lock_id))?;
        let room = self
            .room(room_id)
            .ok_or_else(|| DomainError::not_found("Room", room_id))?;
        let lock = room
            .entity(lock_id)
            .ok_or_else(|| DomainError::not_found("Entity", lock_id))?;

        if !lock.is_lockable() {
            return Err(DomainError::constraint("Only doors and chests take a key"));
        }
        if lock.linked_id.is_some() {
            return Err(DomainError::constraint(format!(
                "'{}' already has a key",
                lock.name
            )));
        }

        let position = room.nearest_free_cell(lock.position());
        let mut key = Entity::token(EntityKind::Key, position).with_name(format!("Key: {}", lock.name));
        key.linked_id = Some(lock_id);
        key.visible_to_guests = false;
        let key_id = key.id;

        self.room_mut(room_id)?.insert(key)?;
        if let Some(lock) = self.entity_mut(lock_id) {
            lock.linked_id = Some(key_id);
            lock.locked = true;
            lock.open = false;
        }
        Ok(key_id)
    }

    /// Host lock toggle. Locking also closes the object.
    pub fn set_locked(&mut self, id: EntityId, locked: bool) -> Result<(), DomainError> {
        let entity = self
            .entity_mut(id)
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        if !entity.is_lockable() {
            return Err(DomainError::constraint("Only doors and chests have locks"));
        }
        entity.locked = locked;
        if locked {
            entity.open = false;
        }
        Ok(())
    }

    /// Open or close a door or chest.
    ///
    /// Guests cannot open a locked object. The host always can, which unlocks it.
    pub fn open_object(&mut self, id: EntityId, open: bool, actor: &Actor) -> Result<(), DomainError> {
        let entity = self
            .entity_mut(id)
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        if !entity.is_lockable() {
            return Err(DomainError::constraint("Only doors and chests open"));
        }
        if open && entity.locked {
            if !actor.is_host() {
                return Err(DomainError::Locked(entity.name.clone()));
            }
            entity.locked = false;
        }
        entity.open = open;
        Ok(())
    }

    /// Pick up a key: the key disappears and its lock is released.
    ///
    /// Returns the id of the lock that was unlocked, if the key still had one.
    pub(crate) fn collect_key(&mut self, key_id: EntityId) -> Result<Option<EntityId>, DomainError> {
        let room_id = self
            .room_of(key_id)
            .ok_or_else(|| DomainError::not_found("Entity", key_id))?;
        let key = self
            .room_mut(room_id)?
            .remove(key_id)
            .ok_or_else(|| DomainError::not_found("Entity", key_id))?;
        let Some(lock_id) = key.linked_id else {
            return Ok(None);
        };
        match self.entity_mut(lock_id) {
            Some(lock) => {
                lock.linked_id = None;
                lock.locked = false;
                Ok(Some(lock_id))
            }
            None => Ok(None),
        }
    }

    /// Check that every link is mutual, unique and joins a key to a lockable.
    pub fn verify_links(&self) -> Result<(), DomainError> {
        let index: HashMap<EntityId, &Entity> = self
            .rooms()
            .flat_map(|room| room.entities())
            .map(|e| (e.id, e))
            .collect();

        for entity in index.values() {
            let Some(partner_id) = entity.linked_id else {
                continue;
            };
            if partner_id == entity.id {
                return Err(DomainError::broken_link(format!("{} links to itself", entity.id)));
            }
            let partner = index.get(&partner_id).ok_or_else(|| {
                DomainError::broken_link(format!("{} links to missing {}", entity.id, partner_id))
            })?;
            if partner.linked_id != Some(entity.id) {
                return Err(DomainError::broken_link(format!(
                    "{} -> {} is not mutual",
                    entity.id, partner_id
                )));
            }
            let pair_ok = (entity.kind == EntityKind::Key && partner.is_lockable())
                || (entity.is_lockable() && partner.kind == EntityKind::Key);
            if !pair_ok {
                return Err(DomainError::broken_link(format!(
                    "{} and {} are not a key and a lock",
                    entity.id, partner_id
                )));
            }
        }
        Ok(())
    }
}
