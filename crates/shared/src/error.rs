//! Protocol-level errors
//!
//! Raised while decoding frames, snapshots, session codes and links. None of
//! these ever reach domain logic: a runtime logs them and drops the input.

use thiserror::Error;

use realmlink_domain::DomainError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or does not match any message shape
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// Snapshot could not be encoded
    #[error("Snapshot encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Snapshot decoded but broke a structural invariant
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(#[from] DomainError),

    /// Snapshot is not valid JSON or has the wrong shape
    #[error("Unreadable snapshot: {0}")]
    UnreadableSnapshot(#[source] serde_json::Error),

    #[error("Invalid session code: {0}")]
    InvalidSessionCode(String),

    /// Portal payload failed base64 or zstd decoding
    #[error("Invalid portal payload: {0}")]
    InvalidPortal(String),
}

impl ProtocolError {
    pub fn invalid_session_code(msg: impl Into<String>) -> Self {
        Self::InvalidSessionCode(msg.into())
    }

    pub fn invalid_portal(msg: impl Into<String>) -> Self {
        Self::InvalidPortal(msg.into())
    }
}
