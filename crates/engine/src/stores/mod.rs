//! In-memory state storage modules.
//!
//! - `SessionStore` - the host's canonical session state and revision stamping

pub mod session;

pub use session::{Committed, SessionStore};
