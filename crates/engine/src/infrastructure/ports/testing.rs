//! Testability ports for injecting time and randomness.

use chrono::{DateTime, Utc};

// =============================================================================
// Testability Ports
// =============================================================================

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait RandomPort: Send + Sync {
    /// Uniform index in `0..len`.
    fn gen_index(&self, len: usize) -> usize;
}
