//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod clock;
pub mod kv_store;
pub mod ollama;
pub mod ports;
pub mod settings;
pub mod transport;
