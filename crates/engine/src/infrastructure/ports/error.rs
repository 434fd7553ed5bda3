//! Error types for port operations.

use realmlink_domain::DomainError;
use realmlink_shared::{PeerId, ProtocolError};

/// Key-value store errors with context for debugging.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend I/O failed - includes operation name for tracing.
    #[error("Store error in {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// Stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }

    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }
}

/// Stat generation failures. Never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum StatGenError {
    #[error("Stat generation request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid stat generation response: {0}")]
    InvalidResponse(String),
    #[error("Stat generation returned nothing")]
    Empty,
}

/// Error class of a transport or signaling failure.
///
/// Each class has its own retry policy in the presence monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Momentary loss; retry after the shortest delay
    Transient,
    /// Signaling server unreachable; rebuild the transport
    FatalSignaling,
    /// Our identity is held by someone else; rebuild after the longest delay
    IdentityCollision,
    /// The peer we dialed is not registered
    PeerNotFound,
    /// Persisted or imported data could not be read
    MalformedData,
    /// An external service (stat generation) failed
    ExternalService,
}

/// Failure kinds a signaling layer can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingErrorKind {
    Network,
    Server,
    Socket,
    UnavailableId,
    PeerUnavailable,
    Other,
}

impl SignalingErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::Network | Self::Server | Self::Socket => ErrorClass::FatalSignaling,
            Self::UnavailableId => ErrorClass::IdentityCollision,
            Self::PeerUnavailable => ErrorClass::PeerNotFound,
            Self::Other => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Signaling failed: {0:?}")]
    Signaling(SignalingErrorKind),
    #[error("No open connection to {0}")]
    NotConnected(PeerId),
    #[error("Transport has not opened signaling yet")]
    NotOpen,
    #[error("Transport was destroyed")]
    Destroyed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransportError {
    /// Error class for the presence monitor.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Signaling(kind) => kind.class(),
            Self::NotConnected(_) | Self::NotOpen | Self::Destroyed => ErrorClass::Transient,
            Self::Store(_) => ErrorClass::FatalSignaling,
        }
    }
}

/// Errors returned to callers of a runtime handle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    StatGen(#[from] StatGenError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Session runtime has stopped")]
    RuntimeStopped,
}

impl SessionError {
    /// Error class, for failures that have one.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Domain(_) | Self::RuntimeStopped => None,
            Self::Protocol(_) | Self::Store(StoreError::Serialization(_)) => {
                Some(ErrorClass::MalformedData)
            }
            Self::Store(_) => Some(ErrorClass::Transient),
            Self::StatGen(_) => Some(ErrorClass::ExternalService),
            Self::Transport(e) => Some(e.class()),
        }
    }
}
