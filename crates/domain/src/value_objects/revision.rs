//! Snapshot revision stamps.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic revision of a session snapshot, serialized as `updatedAt`.
///
/// Revisions are wall-clock timestamps, but a host never issues a revision
/// that is not strictly greater than the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(DateTime<Utc>);

impl Revision {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self(timestamp)
    }

    /// The revision following `self`, stamped at `now` unless the clock has not
    /// moved past `self`.
    pub fn next(self, now: DateTime<Utc>) -> Self {
        let floor = self.0 + Duration::microseconds(1);
        Self(if now > self.0 { now } else { floor })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
