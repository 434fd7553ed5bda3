//! Transport adapters.
//!
//! - `memory` - direct channels between transports in one process
//! - `storage_relay` - polled mailboxes in a shared key-value store

pub mod memory;
pub mod storage_relay;

pub use memory::{InMemorySignaling, MemoryTransport, MemoryTransportFactory};
pub use storage_relay::{RelaySettings, StorageRelayFactory, StorageRelayTransport};
