//! Action forwarding.
//!
//! Guests never touch shared state: they send `ACTION_REQUEST`s and wait for
//! the next snapshot. The host runs those requests, and its own local edits,
//! through the store so that both paths hit the same domain routines.

use realmlink_domain::{
    Actor, ClaimStats, DisplayName, DomainError, EncounterStatus, Entity, EntityId, EntityKind,
    GridDimensions, GridPosition, GuestUpdate, MoveOutcome, RoomId, RoomName, SessionState,
    TerrainKind,
};
use realmlink_shared::{GuestAction, HpUpdate, PeerId, WireMessage};

use crate::infrastructure::ports::TransportPort;
use crate::stores::{Committed, SessionStore};

// =============================================================================
// Host: guest requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestActionOutcome {
    Entity(GuestUpdate),
    Hp,
}

/// Apply one guest request on behalf of `guest`.
pub fn apply_guest_action(
    store: &mut SessionStore,
    guest: &DisplayName,
    action: GuestAction,
) -> Result<Committed<GuestActionOutcome>, DomainError> {
    match action {
        GuestAction::UpdateEntity(entity) => store.mutate(|state| {
            state
                .apply_guest_update(guest, entity)
                .map(GuestActionOutcome::Entity)
        }),
        GuestAction::UpdateHp(update) => store.mutate(|state| {
            state
                .apply_guest_hp(guest, update.id, update.hp)
                .map(|()| GuestActionOutcome::Hp)
        }),
    }
}

// =============================================================================
// Host: local edits
// =============================================================================

/// Everything the host can do to the map directly.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEdit {
    AddRoom { name: RoomName, grid: GridDimensions },
    RenameRoom { room: RoomId, name: RoomName },
    ResizeRoom { room: RoomId, grid: GridDimensions },
    RemoveRoom { room: RoomId },
    SetActiveRoom { room: RoomId },
    SetStatus(EncounterStatus),
    SetShowEnemyHp(bool),
    AddToken {
        room: RoomId,
        kind: EntityKind,
        position: Option<GridPosition>,
    },
    AddEntity { room: RoomId, entity: Entity },
    PlaceTerrain {
        room: RoomId,
        subtype: TerrainKind,
        position: GridPosition,
    },
    LinkDoor {
        door: EntityId,
        destination: Option<RoomId>,
    },
    EraseAt { room: RoomId, position: GridPosition },
    RemoveEntity { id: EntityId },
    ReplaceEntity(Entity),
    MoveEntity { id: EntityId, to: GridPosition },
    UpdateHp { id: EntityId, hp: i32 },
    SetVisibility { id: EntityId, visible: bool },
    SetLocked { id: EntityId, locked: bool },
    OpenObject { id: EntityId, open: bool },
    ForgeKey { lock: EntityId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Done,
    RoomAdded(RoomId),
    EntityAdded(EntityId),
    Moved(MoveOutcome),
    /// Entity removed by the eraser, if there was one
    Erased(Option<EntityId>),
}

impl HostEdit {
    pub fn apply(self, state: &mut SessionState) -> Result<EditOutcome, DomainError> {
        let host = Actor::Host;
        let outcome = match self {
            Self::AddRoom { name, grid } => EditOutcome::RoomAdded(state.add_room(name, grid)),
            Self::RenameRoom { room, name } => {
                state.rename_room(room, name)?;
                EditOutcome::Done
            }
            Self::ResizeRoom { room, grid } => {
                state.resize_room(room, grid)?;
                EditOutcome::Done
            }
            Self::RemoveRoom { room } => {
                state.remove_room(room)?;
                EditOutcome::Done
            }
            Self::SetActiveRoom { room } => {
                state.set_active_room(room)?;
                EditOutcome::Done
            }
            Self::SetStatus(status) => {
                state.set_status(status);
                EditOutcome::Done
            }
            Self::SetShowEnemyHp(show) => {
                state.set_show_enemy_hp_to_guests(show);
                EditOutcome::Done
            }
            Self::AddToken {
                room,
                kind,
                position,
            } => EditOutcome::EntityAdded(state.add_token(room, kind, position)?),
            Self::AddEntity { room, entity } => {
                EditOutcome::EntityAdded(state.add_entity(room, entity)?)
            }
            Self::PlaceTerrain {
                room,
                subtype,
                position,
            } => EditOutcome::EntityAdded(state.place_terrain(room, subtype, position)?),
            Self::LinkDoor { door, destination } => {
                state.link_door(door, destination)?;
                EditOutcome::Done
            }
            Self::EraseAt { room, position } => {
                EditOutcome::Erased(state.erase_at(room, position)?.map(|e| e.id))
            }
            Self::RemoveEntity { id } => {
                state.remove_entity(id)?;
                EditOutcome::Done
            }
            Self::ReplaceEntity(entity) => {
                state.replace_entity(entity)?;
                EditOutcome::Done
            }
            Self::MoveEntity { id, to } => EditOutcome::Moved(state.move_entity(id, to, &host)?),
            Self::UpdateHp { id, hp } => {
                state.update_hp(id, hp, &host)?;
                EditOutcome::Done
            }
            Self::SetVisibility { id, visible } => {
                state.set_visibility(id, visible)?;
                EditOutcome::Done
            }
            Self::SetLocked { id, locked } => {
                state.set_locked(id, locked)?;
                EditOutcome::Done
            }
            Self::OpenObject { id, open } => {
                state.open_object(id, open, &host)?;
                EditOutcome::Done
            }
            Self::ForgeKey { lock } => EditOutcome::EntityAdded(state.forge_key(lock)?),
        };
        Ok(outcome)
    }
}

// =============================================================================
// Guest: sending
// =============================================================================

/// A guest gesture, turned into a request against the guest's replica.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestIntent {
    Claim { slot: EntityId, stats: ClaimStats },
    Move { id: EntityId, to: GridPosition },
    SetHp { id: EntityId, hp: i32 },
    SetInitiative { id: EntityId, initiative: i32 },
    SetNotes { id: EntityId, notes: Option<String> },
    Toggle { id: EntityId, open: bool },
}

impl GuestIntent {
    /// Build the request the host expects: the whole entity as the guest wants
    /// it, or a bare hit point update. Permissions are checked by the host.
    pub fn into_action(
        self,
        replica: &SessionState,
        guest: &DisplayName,
    ) -> Result<GuestAction, DomainError> {
        if let Self::SetHp { id, hp } = self {
            return Ok(GuestAction::UpdateHp(HpUpdate { id, hp }));
        }
        let id = match &self {
            Self::Claim { slot, .. } => *slot,
            Self::Move { id, .. }
            | Self::SetHp { id, .. }
            | Self::SetInitiative { id, .. }
            | Self::SetNotes { id, .. }
            | Self::Toggle { id, .. } => *id,
        };
        let mut proposed = replica
            .find_entity(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Entity", id))?;
        match self {
            Self::Claim { stats, .. } => {
                proposed.claimed_by = Some(guest.as_str().to_string());
                proposed.name = guest.as_str().to_string();
                proposed.max_hp = stats.max_hp();
                proposed.hp = stats.max_hp();
                proposed.armor_class = stats.armor_class();
            }
            Self::Move { to, .. } => proposed.set_position(to),
            Self::SetInitiative { initiative, .. } => proposed.initiative = initiative,
            Self::SetNotes { notes, .. } => proposed.notes = notes,
            Self::Toggle { open, .. } => proposed.open = open,
            Self::SetHp { .. } => {}
        }
        Ok(GuestAction::UpdateEntity(proposed))
    }
}

/// What happened to a guest request on the sending side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport; the host may still refuse it
    Sent,
    /// No open host link; the request is gone
    Dropped,
}

/// Fire-and-forget send of a request to the host. No queueing.
pub async fn send_guest_action(
    transport: &dyn TransportPort,
    host: Option<&PeerId>,
    action: GuestAction,
) -> Delivery {
    let Some(host) = host else {
        tracing::debug!(action = action.name(), "No host link, dropping request");
        return Delivery::Dropped;
    };
    let name = action.name();
    let frame = match WireMessage::ActionRequest(action).encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(action = name, error = %e, "Could not encode request");
            return Delivery::Dropped;
        }
    };
    match transport.send(host, frame).await {
        Ok(()) => Delivery::Sent,
        Err(e) => {
            tracing::warn!(action = name, error = %e, "Request send failed");
            Delivery::Dropped
        }
    }
}
