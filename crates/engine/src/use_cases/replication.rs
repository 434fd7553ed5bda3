//! Snapshot replication.
//!
//! Host side: `Broadcaster` turns the canonical state into `STATE_UPDATE`
//! frames and skips frames identical to the last one sent.
//!
//! Guest side: `Replica` keeps the newest snapshot it has seen. Whole-state
//! last-writer-wins by revision; there is no field-level merge.

use realmlink_domain::{DomainError, Revision, SessionState};
use realmlink_shared::{PeerId, ProtocolError, WireMessage};

use crate::infrastructure::ports::TransportPort;

// =============================================================================
// Host
// =============================================================================

#[derive(Debug, Default)]
pub struct Broadcaster {
    last_sent: Option<String>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame for `state`, or `None` when it is byte-identical to the last
    /// frame handed out.
    pub fn prepare(&mut self, state: &SessionState) -> Result<Option<String>, ProtocolError> {
        let frame = WireMessage::state_update(state).encode()?;
        if self.last_sent.as_deref() == Some(frame.as_str()) {
            tracing::debug!(revision = %state.revision(), "Snapshot unchanged, skipping broadcast");
            return Ok(None);
        }
        self.last_sent = Some(frame.clone());
        Ok(Some(frame))
    }

    /// Frame for a newly opened link. Always produced.
    pub fn welcome(&self, state: &SessionState) -> Result<String, ProtocolError> {
        WireMessage::state_update(state).encode()
    }

    /// Send `state` to every peer in `peers` unless nothing changed.
    /// Returns how many sends were accepted by the transport.
    pub async fn broadcast(
        &mut self,
        state: &SessionState,
        transport: &dyn TransportPort,
        peers: &[PeerId],
    ) -> Result<usize, ProtocolError> {
        let Some(frame) = self.prepare(state)? else {
            return Ok(0);
        };
        let mut delivered = 0;
        for peer in peers {
            match transport.send(peer, frame.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(peer = %peer, error = %e, "State broadcast failed"),
            }
        }
        tracing::debug!(
            revision = %state.revision(),
            peers = peers.len(),
            delivered,
            "Broadcast state"
        );
        Ok(delivered)
    }
}

// =============================================================================
// Guest
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaOutcome {
    Applied(Revision),
    /// Not newer than what is already held
    Stale { incoming: Revision, current: Revision },
    /// Structurally invalid; nothing applied
    Rejected(DomainError),
}

/// A guest's copy of the host state.
#[derive(Debug, Default)]
pub struct Replica {
    state: Option<SessionState>,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn last_applied(&self) -> Option<Revision> {
        self.state.as_ref().map(SessionState::revision)
    }

    /// Replace the local state iff `snapshot` is strictly newer.
    pub fn apply(&mut self, snapshot: SessionState) -> ReplicaOutcome {
        let incoming = snapshot.revision();
        if let Some(current) = self.last_applied() {
            if incoming <= current {
                tracing::debug!(%incoming, %current, "Dropping stale snapshot");
                return ReplicaOutcome::Stale { incoming, current };
            }
        }
        if let Err(e) = snapshot.validate() {
            tracing::warn!(revision = %incoming, error = %e, "Rejecting invalid snapshot");
            return ReplicaOutcome::Rejected(e);
        }
        self.state = Some(snapshot);
        ReplicaOutcome::Applied(incoming)
    }
}
