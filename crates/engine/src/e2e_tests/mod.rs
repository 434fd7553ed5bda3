//! End-to-end tests: real runtimes talking over real transports.
//!
//! Every test wires a host and one or more guests through the in-process
//! signaling hub (or the storage relay) and checks what each side ends up
//! seeing. Timer-driven scenarios run with paused tokio time.
//!
//! ```bash
//! cargo test -p realmlink-engine --lib e2e_tests
//! ```

mod e2e_helpers;
mod reconnection_tests;
mod replication_tests;

pub use e2e_helpers::*;
