//! Transport contract between a runtime and whatever moves its frames.
//!
//! A transport has a signaling side (registering an identity, dialing peers)
//! and a data side (open links carrying text frames). Synchronous failures are
//! returned from the call; everything that happens later is reported as a
//! `TransportEvent` on the receiver handed out by the factory.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use realmlink_shared::PeerId;

use super::error::{SignalingErrorKind, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Signaling registered under this identity
    SignalingOpened(PeerId),
    /// Signaling lost; open links may still carry data
    SignalingDisconnected,
    SignalingError(SignalingErrorKind),
    ConnectionOpened(PeerId),
    Received { peer: PeerId, frame: String },
    ConnectionClosed(PeerId),
}

#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Register with signaling, under `local_id` or an assigned identity.
    /// Success is also reported as `SignalingOpened`.
    async fn open(&self, local_id: Option<PeerId>) -> Result<PeerId, TransportError>;

    /// Re-register the identity held before a signaling disconnect.
    async fn reattach(&self) -> Result<(), TransportError>;

    /// Dial a peer. The link is usable once `ConnectionOpened` arrives.
    async fn connect(&self, target: &PeerId) -> Result<(), TransportError>;

    /// Fire-and-forget send of one text frame over an open link.
    async fn send(&self, peer: &PeerId, frame: String) -> Result<(), TransportError>;

    async fn close(&self, peer: &PeerId);

    /// Close every link and release the identity. The instance is unusable after.
    async fn destroy(&self);
}

/// Builds fresh transport instances; used at start and on full rebuilds.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> (Arc<dyn TransportPort>, mpsc::UnboundedReceiver<TransportEvent>);
}
