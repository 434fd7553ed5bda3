//! Snapshot codec used for export, import and autosave.
//!
//! The same JSON shape travels inside `STATE_UPDATE`, so a file exported by a
//! host can be fed straight back into any participant.

use realmlink_domain::SessionState;

use crate::error::ProtocolError;

/// Serialize a snapshot as compact JSON.
pub fn encode_snapshot(state: &SessionState) -> Result<String, ProtocolError> {
    serde_json::to_string(state).map_err(ProtocolError::Encode)
}

/// Pretty JSON for file export.
pub fn encode_snapshot_pretty(state: &SessionState) -> Result<String, ProtocolError> {
    serde_json::to_string_pretty(state).map_err(ProtocolError::Encode)
}

/// Parse and validate a snapshot. Rejected whole on any structural problem.
pub fn decode_snapshot(text: &str) -> Result<SessionState, ProtocolError> {
    let state: SessionState =
        serde_json::from_str(text).map_err(ProtocolError::UnreadableSnapshot)?;
    state.validate()?;
    Ok(state)
}

/// Decode from bytes (file or key-value store contents).
pub fn decode_snapshot_bytes(bytes: &[u8]) -> Result<SessionState, ProtocolError> {
    let state: SessionState =
        serde_json::from_slice(bytes).map_err(ProtocolError::UnreadableSnapshot)?;
    state.validate()?;
    Ok(state)
}
