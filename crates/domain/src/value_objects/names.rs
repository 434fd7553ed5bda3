//! Validated name newtypes
//!
//! Names are trimmed, non-empty and bounded. Guests are identified by their
//! display name for the lifetime of a session, so the same rules apply when a
//! name arrives over the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

/// Maximum length for display and room names
const MAX_NAME_LENGTH: usize = 64;

// ============================================================================
// DisplayName
// ============================================================================

/// A guest's display name (non-empty, <=64 chars, trimmed)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Create a new validated display name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name is empty after trimming
    /// or exceeds 64 characters.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        validated("Display name", name.into()).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

// ============================================================================
// RoomName
// ============================================================================

/// A room's name (non-empty, <=64 chars, trimmed)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        validated("Room name", name.into()).map(Self)
    }

    /// For compile-time constants already known to be valid.
    pub(crate) fn from_static(name: &'static str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RoomName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomName> for String {
    fn from(value: RoomName) -> Self {
        value.0
    }
}

fn validated(label: &str, name: String) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{} cannot be empty", label)));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(DomainError::validation(format!(
            "{} cannot exceed {} characters",
            label, MAX_NAME_LENGTH
        )));
    }
    Ok(trimmed.to_string())
}
