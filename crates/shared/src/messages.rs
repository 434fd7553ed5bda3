//! Wire messages exchanged between host and guests
//!
//! Every frame is one JSON object tagged by `type`. Frames are decoded into
//! `WireMessage` at the transport boundary of each runtime; nothing past that
//! point handles raw text.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Renaming variants is a breaking change
//! - Unknown `type` values deserialize to `Unknown` and are ignored

use serde::{Deserialize, Serialize};

use realmlink_domain::{Entity, EntityId, SessionState};

use crate::error::ProtocolError;

// =============================================================================
// Wire Messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// Host → guests: full snapshot of the session
    StateUpdate { data: SessionState },

    /// Guest → host: request a mutation
    ActionRequest(GuestAction),

    /// Guest → host: announce the guest's display name
    JoinRequest { name: String },

    /// Either direction; keeps idle links warm and is otherwise ignored
    Heartbeat,

    /// Unknown message type for forward compatibility
    #[serde(other)]
    Unknown,
}

/// Actions a guest may ask the host to perform.
///
/// Serialized as `{"action": "...", "payload": {...}}` inside an
/// `ACTION_REQUEST` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuestAction {
    /// The whole entity as the guest wants it to look
    UpdateEntity(Entity),
    UpdateHp(HpUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HpUpdate {
    pub id: EntityId,
    pub hp: i32,
}

impl GuestAction {
    /// Tag as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateEntity(_) => "UPDATE_ENTITY",
            Self::UpdateHp(_) => "UPDATE_HP",
        }
    }
}

impl WireMessage {
    pub fn state_update(state: &SessionState) -> Self {
        Self::StateUpdate {
            data: state.clone(),
        }
    }

    /// Message type as it appears on the wire, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateUpdate { .. } => "STATE_UPDATE",
            Self::ActionRequest(_) => "ACTION_REQUEST",
            Self::JoinRequest { .. } => "JOIN_REQUEST",
            Self::Heartbeat => "HEARTBEAT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a text frame. Snapshots are structurally validated here so an
    /// inconsistent `STATE_UPDATE` never reaches a replica.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_str(frame).map_err(ProtocolError::MalformedFrame)?;
        if let Self::StateUpdate { data } = &message {
            data.validate()?;
        }
        if matches!(message, Self::Unknown) {
            tracing::debug!(frame_len = frame.len(), "Ignoring frame with unknown type");
        }
        Ok(message)
    }
}
