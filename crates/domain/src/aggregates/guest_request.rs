//! Classifying a guest's proposed entity edit.
//!
//! A guest sends the whole entity as it wants it to look. Only three shapes of
//! change are accepted: claiming a free slot, editing the guest's own token,
//! and opening or closing a door or chest. Everything else is refused and the
//! state is left untouched.

use crate::entities::{Entity, EntityKind};
use crate::error::DomainError;
use crate::ids::EntityId;
use crate::value_objects::{Actor, ClaimStats, DisplayName};

use super::{MoveOutcome, SessionState};

/// How a guest edit was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestUpdate {
    Claimed,
    Edited { moved: Option<MoveOutcome> },
    Toggled { open: bool },
}

impl SessionState {
    pub fn apply_guest_update(
        &mut self,
        guest: &DisplayName,
        proposed: Entity,
    ) -> Result<GuestUpdate, DomainError> {
        let current = self
            .find_entity(proposed.id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Entity", proposed.id))?;
        let actor = Actor::guest(guest.clone());

        let claims_slot = current.kind == EntityKind::PlayerSlot
            && !current.is_claimed()
            && proposed.claimed_by.as_deref() == Some(guest.as_str());
        if claims_slot {
            let stats = ClaimStats::new(proposed.max_hp, proposed.armor_class)?;
            self.claim(current.id, guest, stats)?;
            return Ok(GuestUpdate::Claimed);
        }

        if actor.controls(&current) {
            if proposed.claimed_by != current.claimed_by {
                return Err(DomainError::forbidden("A claim cannot be handed over"));
            }
            let target = proposed.position();
            let moved = if target != current.position() {
                Some(self.move_entity(current.id, target, &actor)?)
            } else {
                None
            };
            if let Some(token) = self.entity_mut(current.id) {
                token.set_hp(proposed.hp);
                token.initiative = proposed.initiative;
                token.notes = proposed.notes;
            }
            return Ok(GuestUpdate::Edited { moved });
        }

        if current.is_lockable() && proposed.open != current.open {
            self.open_object(current.id, proposed.open, &actor)?;
            return Ok(GuestUpdate::Toggled {
                open: proposed.open,
            });
        }

        Err(DomainError::forbidden(format!(
            "{} may not edit '{}'",
            guest, current.name
        )))
    }

    /// Guest `UPDATE_HP`: only the token's owner may set it.
    pub fn apply_guest_hp(
        &mut self,
        guest: &DisplayName,
        id: EntityId,
        hp: i32,
    ) -> Result<(), DomainError> {
        self.update_hp(id, hp, &Actor::guest(guest.clone()))
    }
}
