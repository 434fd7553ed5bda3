//! Connection tracking for transport links.
//!
//! Owned by a runtime task, so no locking. The host keeps one record per
//! guest; a guest keeps the record of its single host link.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use realmlink_domain::{Actor, DisplayName};
use realmlink_shared::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Presence record of one peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub state: ConnectionState,
    /// Name announced with `JOIN_REQUEST`
    pub display_name: Option<DisplayName>,
    pub last_heartbeat_sent_at: Option<DateTime<Utc>>,
}

impl ConnectionInfo {
    fn new(peer_id: PeerId, state: ConnectionState) -> Self {
        Self {
            peer_id,
            state,
            display_name: None,
            last_heartbeat_sent_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No connection to {0}")]
    NotFound(PeerId),
}

/// All links of one runtime.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<PeerId, ConnectionInfo>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// An outbound dial is in flight.
    pub fn mark_connecting(&mut self, peer: PeerId) {
        self.connections
            .entry(peer.clone())
            .and_modify(|info| info.state = ConnectionState::Connecting)
            .or_insert_with(|| ConnectionInfo::new(peer, ConnectionState::Connecting));
    }

    /// A link opened. Returns false if it was already open.
    pub fn register_open(&mut self, peer: PeerId) -> bool {
        match self.connections.get_mut(&peer) {
            Some(info) if info.is_open() => false,
            Some(info) => {
                info.state = ConnectionState::Open;
                tracing::debug!(peer = %peer, "Connection open");
                true
            }
            None => {
                tracing::debug!(peer = %peer, "Connection registered");
                self.connections
                    .insert(peer.clone(), ConnectionInfo::new(peer, ConnectionState::Open));
                true
            }
        }
    }

    /// A link closed. The record is dropped and returned in its final state.
    pub fn close(&mut self, peer: &PeerId) -> Option<ConnectionInfo> {
        let mut info = self.connections.remove(peer)?;
        info.state = ConnectionState::Closed;
        tracing::debug!(peer = %peer, "Connection closed");
        Some(info)
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }

    pub fn set_display_name(
        &mut self,
        peer: &PeerId,
        name: DisplayName,
    ) -> Result<(), ConnectionError> {
        let info = self
            .connections
            .get_mut(peer)
            .ok_or_else(|| ConnectionError::NotFound(peer.clone()))?;
        tracing::info!(peer = %peer, name = %name, "Peer announced display name");
        info.display_name = Some(name);
        Ok(())
    }

    pub fn record_heartbeat(&mut self, peer: &PeerId, at: DateTime<Utc>) {
        if let Some(info) = self.connections.get_mut(peer) {
            info.last_heartbeat_sent_at = Some(at);
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&ConnectionInfo> {
        self.connections.get(peer)
    }

    pub fn is_open(&self, peer: &PeerId) -> bool {
        self.get(peer).is_some_and(ConnectionInfo::is_open)
    }

    /// Peers with an open link, in a stable order.
    pub fn open_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .connections
            .values()
            .filter(|info| info.is_open())
            .map(|info| info.peer_id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// The guest acting through `peer`, once it has announced a name.
    pub fn actor_for(&self, peer: &PeerId) -> Option<Actor> {
        self.get(peer)?
            .display_name
            .clone()
            .map(Actor::guest)
    }

    pub fn roster(&self) -> Vec<ConnectionInfo> {
        let mut roster: Vec<ConnectionInfo> = self.connections.values().cloned().collect();
        roster.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        roster
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
