//! RealmLink Engine library.
//!
//! Host/guest replication of a battle-map session. One host owns the state;
//! guests hold replicas, send requests and converge on whatever the host
//! broadcasts.
//!
//! ## Structure
//!
//! - `use_cases/` - replication, presence, action handling, persistence
//! - `stores/` - the host's session store
//! - `api/` - per-runtime connection bookkeeping
//! - `runtime/` - host and guest tasks and their handles
//! - `infrastructure/` - ports plus transports, stores, clock and Ollama

pub mod api;
pub mod infrastructure;
pub mod runtime;
pub mod stores;
pub mod use_cases;

/// Multi-runtime tests over the in-memory hub and the storage relay.
#[cfg(test)]
mod e2e_tests;

pub use runtime::{GuestHandle, GuestRuntime, HostHandle, HostRuntime, RuntimeDeps, SessionEvent};
