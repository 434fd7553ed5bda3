//! Who is asking for a mutation.

use crate::entities::Entity;
use crate::value_objects::DisplayName;

/// The origin of a mutation request.
///
/// The host has full authority. A guest is identified by the display name it
/// announced when joining and may only act through its own claimed token,
/// lockable objects, and unclaimed player slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Host,
    Guest(DisplayName),
}

impl Actor {
    pub fn guest(name: DisplayName) -> Self {
        Self::Guest(name)
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }

    pub fn guest_name(&self) -> Option<&DisplayName> {
        match self {
            Self::Host => None,
            Self::Guest(name) => Some(name),
        }
    }

    /// Host controls everything; a guest controls only what it claimed.
    pub fn controls(&self, entity: &Entity) -> bool {
        match self {
            Self::Host => true,
            Self::Guest(name) => entity.claimed_by.as_deref() == Some(name.as_str()),
        }
    }
}
