//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Transports (in-process channels, a polled shared store, or a real network)
//! - Stat generation (could swap Ollama -> any JSON-capable model)
//! - Key-value persistence (memory, files, browser storage)
//! - Clock/Random (for testing)

mod error;
mod external;
mod testing;
mod transport;

pub use error::{
    ErrorClass, SessionError, SignalingErrorKind, StatGenError, StoreError, TransportError,
};
pub use external::{KeyValueStorePort, StatGeneratorPort};
pub use testing::{ClockPort, RandomPort};
pub use transport::{TransportEvent, TransportFactory, TransportPort};

#[cfg(test)]
pub use external::{MockKeyValueStorePort, MockStatGeneratorPort};
#[cfg(test)]
pub use testing::MockClockPort;
