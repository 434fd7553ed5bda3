//! Portal links: a whole session packed into a URL.
//!
//! The payload is `base64url(zstd(json))` under `?portal=`. Opening a portal
//! link imports the snapshot on a new host.

use std::io::Cursor;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use url::Url;

use realmlink_domain::SessionState;

use crate::error::ProtocolError;
use crate::snapshot::{decode_snapshot_bytes, encode_snapshot};

pub const PORTAL_QUERY_PARAM: &str = "portal";

const COMPRESSION_LEVEL: i32 = 19;

/// Largest snapshot a portal may unpack to.
pub const MAX_PORTAL_SNAPSHOT_BYTES: usize = 8 * 1024 * 1024;

pub fn encode_portal(state: &SessionState) -> Result<String, ProtocolError> {
    let json = encode_snapshot(state)?;
    let packed = zstd::encode_all(Cursor::new(json.as_bytes()), COMPRESSION_LEVEL)
        .map_err(|e| ProtocolError::invalid_portal(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(packed))
}

pub fn decode_portal(payload: &str) -> Result<SessionState, ProtocolError> {
    let packed = URL_SAFE_NO_PAD
        .decode(payload.trim())
        .map_err(|e| ProtocolError::invalid_portal(format!("base64: {}", e)))?;
    let json = zstd::bulk::decompress(&packed, MAX_PORTAL_SNAPSHOT_BYTES)
        .map_err(|e| ProtocolError::invalid_portal(format!("zstd: {}", e)))?;
    decode_snapshot_bytes(&json)
}

/// `base` with `?portal=<payload>`.
pub fn portal_link(base: &Url, state: &SessionState) -> Result<Url, ProtocolError> {
    let payload = encode_portal(state)?;
    let mut link = base.clone();
    link.query_pairs_mut()
        .clear()
        .append_pair(PORTAL_QUERY_PARAM, &payload);
    Ok(link)
}

/// Snapshot carried by a portal link. `None` when the link has no portal.
pub fn portal_from_link(link: &Url) -> Option<Result<SessionState, ProtocolError>> {
    link.query_pairs()
        .find(|(k, _)| k == PORTAL_QUERY_PARAM)
        .map(|(_, v)| decode_portal(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use realmlink_domain::{EntityKind, RoomName, GridDimensions};

    fn furnished() -> SessionState {
        let mut state = SessionState::new(Utc::now());
        let crypt = state.add_room(RoomName::new("Crypt").unwrap(), GridDimensions::default());
        for _ in 0..10 {
            state.add_token(crypt, EntityKind::Enemy, None).unwrap();
        }
        state
    }

    #[test]
    fn portal_link_carries_the_session() {
        let state = furnished();
        let base = Url::parse("https://table.example/").unwrap();
        let link = portal_link(&base, &state).unwrap();

        let payload = link
            .query_pairs()
            .find(|(k, _)| k == PORTAL_QUERY_PARAM)
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(payload
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_eq!(portal_from_link(&link).unwrap().unwrap(), state);
    }

    #[test]
    fn links_without_portal_are_ignored() {
        let link = Url::parse("https://table.example/?session=ABC123").unwrap();
        assert!(portal_from_link(&link).is_none());
    }

    #[test]
    fn corrupt_payloads_are_reported() {
        assert!(matches!(
            decode_portal("!!!"),
            Err(ProtocolError::InvalidPortal(_))
        ));
        let not_zstd = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(matches!(
            decode_portal(&not_zstd),
            Err(ProtocolError::InvalidPortal(_))
        ));
    }

    #[test]
    fn oversized_payloads_are_refused() {
        let bomb = vec![b' '; MAX_PORTAL_SNAPSHOT_BYTES + 1];
        let packed = zstd::encode_all(Cursor::new(bomb), 1).unwrap();
        assert!(packed.len() < 64 * 1024);

        let err = decode_portal(&URL_SAFE_NO_PAD.encode(packed)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPortal(_)));
    }
}
