//! Binding a guest to a player slot.

use crate::entities::EntityKind;
use crate::error::DomainError;
use crate::ids::EntityId;
use crate::value_objects::{ClaimStats, DisplayName};

use super::SessionState;

impl SessionState {
    /// Claim an unclaimed player slot for `claimant`.
    ///
    /// Name, hit points and armor class are set in the same step, so no
    /// snapshot ever shows a claimed slot with placeholder stats. A guest holds
    /// at most one token per room.
    pub fn claim(
        &mut self,
        slot_id: EntityId,
        claimant: &DisplayName,
        stats: ClaimStats,
    ) -> Result<(), DomainError> {
        let room_id = self
            .room_of(slot_id)
            .ok_or_else(|| DomainError::not_found("Entity", slot_id))?;
        let room = self
            .room(room_id)
            .ok_or_else(|| DomainError::not_found("Room", room_id))?;
        let slot = room
            .entity(slot_id)
            .ok_or_else(|| DomainError::not_found("Entity", slot_id))?;

        if slot.kind != EntityKind::PlayerSlot {
            return Err(DomainError::constraint("Only player slots can be claimed"));
        }
        if slot.is_claimed() {
            return Err(DomainError::AlreadyClaimed(slot_id.to_string()));
        }
        if let Some(held) = room.claimed_by(claimant.as_str()) {
            return Err(DomainError::constraint(format!(
                "{} already plays '{}' in this room",
                claimant, held.name
            )));
        }

        let slot = self
            .entity_mut(slot_id)
            .ok_or_else(|| DomainError::not_found("Entity", slot_id))?;
        slot.claimed_by = Some(claimant.as_str().to_string());
        slot.name = claimant.as_str().to_string();
        slot.max_hp = stats.max_hp();
        slot.hp = stats.max_hp();
        slot.armor_class = stats.armor_class();
        Ok(())
    }
}
