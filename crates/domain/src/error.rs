//! Unified error types for the domain layer
//!
//! Every replicated operation returns `Result<_, DomainError>`. The engine decides
//! what an error means for the caller: host input gets it back, remote guest
//! requests are refused silently.

use thiserror::Error;

/// Unified error type for domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Entity or room not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Position outside the room grid
    #[error("Cell ({x}, {y}) is outside the {cols}x{rows} grid")]
    OutOfBounds { x: u32, y: u32, cols: u32, rows: u32 },

    /// Business rule violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The actor is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Player slot already bound to a guest
    #[error("Entity {0} is already claimed")]
    AlreadyClaimed(String),

    /// Lockable object refused to open
    #[error("Entity {0} is locked")]
    Locked(String),

    /// Linked key/lock pair is broken
    #[error("Broken link: {0}")]
    BrokenLink(String),
}

impl DomainError {
    /// Creates a validation error for malformed input values.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Create a constraint violation error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a broken link error
    pub fn broken_link(msg: impl Into<String>) -> Self {
        Self::BrokenLink(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_type_and_id() {
        let err = DomainError::not_found("Room", "abc");
        assert_eq!(err.to_string(), "Not found: Room with id abc");
    }

    #[test]
    fn out_of_bounds_names_the_grid() {
        let err = DomainError::OutOfBounds {
            x: 20,
            y: 1,
            cols: 15,
            rows: 15,
        };
        assert!(err.to_string().contains("15x15"));
    }
}
