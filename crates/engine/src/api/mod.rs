//! API layer - connection tracking for transport links.

pub mod connections;

pub use connections::{ConnectionError, ConnectionInfo, ConnectionState, ConnectionTable};
