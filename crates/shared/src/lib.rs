//! RealmLink Protocol - Shared types for host and guest communication
//!
//! This crate contains everything that crosses a process boundary:
//! - Wire messages (`WireMessage`, `GuestAction`)
//! - The snapshot codec used for replication, export and autosave
//! - Session codes, peer ids and magic links
//! - Portal links (a compressed snapshot inside a URL)
//!
//! # Design Principles
//!
//! 1. **Closed union** - frames decode into `WireMessage` or are rejected
//! 2. **No business logic** - snapshots are validated, never mutated here
//! 3. **Text frames** - every frame is one JSON object

pub mod error;
pub mod messages;
pub mod portal;
pub mod session_code;
pub mod snapshot;

pub use error::ProtocolError;
pub use messages::{GuestAction, HpUpdate, WireMessage};
pub use portal::{decode_portal, encode_portal, portal_from_link, portal_link, PORTAL_QUERY_PARAM};
pub use session_code::{
    PeerId, SessionCode, HOST_PEER_PREFIX, SESSION_CODE_ALPHABET, SESSION_CODE_LEN,
    SESSION_QUERY_PARAM,
};
pub use snapshot::{decode_snapshot, decode_snapshot_bytes, encode_snapshot, encode_snapshot_pretty};
