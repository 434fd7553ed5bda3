//! In-process signaling hub and transport.
//!
//! Every `MemoryTransport` created from one `InMemorySignaling` can reach the
//! others by identity. Links are direct channels, so they keep carrying frames
//! while signaling is down, the same way a peer-to-peer data channel survives
//! losing its signaling server.
//!
//! The hub doubles as a fault injector for tests and the demo: signaling can
//! be dropped and restored, identities can be held by phantom registrations,
//! the next signaling call can be made to fail, single links can be cut and
//! frames to a peer can be lost in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;

use realmlink_shared::PeerId;

use crate::infrastructure::ports::{
    SignalingErrorKind, TransportError, TransportEvent, TransportFactory, TransportPort,
};

// =============================================================================
// Hub
// =============================================================================

struct Endpoint {
    transport_id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    links: DashSet<PeerId>,
    online: AtomicBool,
}

impl Endpoint {
    fn emit(&self, event: TransportEvent) {
        // A dropped receiver means the owning runtime is gone.
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
struct HubInner {
    endpoints: DashMap<PeerId, Arc<Endpoint>>,
    reserved: DashSet<PeerId>,
    signaling_down: AtomicBool,
    pending_fault: Mutex<Option<SignalingErrorKind>>,
    frame_losses: DashMap<PeerId, usize>,
    next_id: AtomicU64,
}

/// Shared in-process signaling server.
#[derive(Clone, Default)]
pub struct InMemorySignaling {
    inner: Arc<HubInner>,
}

impl InMemorySignaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            hub: self.clone(),
            transport_id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            events: tx,
            local: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        };
        (transport, rx)
    }

    pub fn factory(&self) -> MemoryTransportFactory {
        MemoryTransportFactory { hub: self.clone() }
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Take the signaling server down. Every registered endpoint is told and
    /// must reattach once it is back. Open links are untouched.
    pub fn drop_signaling(&self) {
        self.inner.signaling_down.store(true, Ordering::SeqCst);
        for entry in self.inner.endpoints.iter() {
            if entry.online.swap(false, Ordering::SeqCst) {
                entry.emit(TransportEvent::SignalingDisconnected);
            }
        }
        tracing::debug!("Signaling dropped");
    }

    pub fn restore_signaling(&self) {
        self.inner.signaling_down.store(false, Ordering::SeqCst);
        tracing::debug!("Signaling restored");
    }

    /// Hold an identity as if a stale registration still owned it.
    pub fn reserve_identity(&self, peer: PeerId) {
        self.inner.reserved.insert(peer);
    }

    pub fn release_identity(&self, peer: &PeerId) {
        self.inner.reserved.remove(peer);
    }

    /// Make the next `open`, `reattach` or `connect` fail with `kind`.
    pub fn inject_fault(&self, kind: SignalingErrorKind) {
        *lock(&self.inner.pending_fault) = Some(kind);
    }

    /// Cut the link between two peers; both sides see `ConnectionClosed`.
    pub fn sever(&self, a: &PeerId, b: &PeerId) {
        if let Some(end) = self.endpoint(a) {
            if end.links.remove(b).is_some() {
                end.emit(TransportEvent::ConnectionClosed(b.clone()));
            }
        }
        if let Some(end) = self.endpoint(b) {
            if end.links.remove(a).is_some() {
                end.emit(TransportEvent::ConnectionClosed(a.clone()));
            }
        }
    }

    pub fn is_registered(&self, peer: &PeerId) -> bool {
        self.endpoint(peer)
            .is_some_and(|e| e.online.load(Ordering::SeqCst))
    }

    /// Lose the next `count` frames sent to `to`. The sender is not told.
    pub fn lose_frames_to(&self, to: PeerId, count: usize) {
        if count > 0 {
            self.inner.frame_losses.insert(to, count);
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn endpoint(&self, peer: &PeerId) -> Option<Arc<Endpoint>> {
        self.inner.endpoints.get(peer).map(|e| Arc::clone(e.value()))
    }

    fn take_frame_loss(&self, to: &PeerId) -> bool {
        let Some(mut left) = self.inner.frame_losses.get_mut(to) else {
            return false;
        };
        *left -= 1;
        let exhausted = *left == 0;
        drop(left);
        if exhausted {
            self.inner.frame_losses.remove(to);
        }
        true
    }

    fn take_fault(&self) -> Option<SignalingErrorKind> {
        lock(&self.inner.pending_fault).take()
    }

    fn signaling_check(&self) -> Result<(), TransportError> {
        if let Some(kind) = self.take_fault() {
            return Err(TransportError::Signaling(kind));
        }
        if self.inner.signaling_down.load(Ordering::SeqCst) {
            return Err(TransportError::Signaling(SignalingErrorKind::Network));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Transport
// =============================================================================

pub struct MemoryTransport {
    hub: InMemorySignaling,
    transport_id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    local: Mutex<Option<PeerId>>,
    destroyed: AtomicBool,
}

impl MemoryTransport {
    pub fn local_id(&self) -> Option<PeerId> {
        lock(&self.local).clone()
    }

    fn ensure_alive(&self) -> Result<(), TransportError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }
        Ok(())
    }

    fn own_endpoint(&self) -> Result<(PeerId, Arc<Endpoint>), TransportError> {
        let local = self.local_id().ok_or(TransportError::NotOpen)?;
        let endpoint = self
            .hub
            .endpoint(&local)
            .filter(|e| e.transport_id == self.transport_id)
            .ok_or(TransportError::NotOpen)?;
        Ok((local, endpoint))
    }
}

#[async_trait]
impl TransportPort for MemoryTransport {
    async fn open(&self, local_id: Option<PeerId>) -> Result<PeerId, TransportError> {
        self.ensure_alive()?;
        self.hub.signaling_check()?;

        let id = local_id.unwrap_or_else(|| {
            let n = self.hub.inner.next_id.fetch_add(1, Ordering::Relaxed);
            PeerId::new(format!("peer-{}", n))
        });
        if self.hub.inner.reserved.contains(&id) {
            return Err(TransportError::Signaling(SignalingErrorKind::UnavailableId));
        }

        let endpoint = Arc::new(Endpoint {
            transport_id: self.transport_id,
            events: self.events.clone(),
            links: DashSet::new(),
            online: AtomicBool::new(true),
        });
        match self.hub.inner.endpoints.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::Signaling(SignalingErrorKind::UnavailableId));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(endpoint);
            }
        }
        *lock(&self.local) = Some(id.clone());

        tracing::debug!(peer = %id, "Signaling opened");
        let _ = self.events.send(TransportEvent::SignalingOpened(id.clone()));
        Ok(id)
    }

    async fn reattach(&self) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let (local, endpoint) = self.own_endpoint()?;
        self.hub.signaling_check()?;
        endpoint.online.store(true, Ordering::SeqCst);
        endpoint.emit(TransportEvent::SignalingOpened(local));
        Ok(())
    }

    async fn connect(&self, target: &PeerId) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let (local, endpoint) = self.own_endpoint()?;
        if !endpoint.online.load(Ordering::SeqCst) {
            return Err(TransportError::Signaling(SignalingErrorKind::Network));
        }
        self.hub.signaling_check()?;

        let remote = self
            .hub
            .endpoint(target)
            .filter(|e| e.online.load(Ordering::SeqCst))
            .ok_or(TransportError::Signaling(SignalingErrorKind::PeerUnavailable))?;

        endpoint.links.insert(target.clone());
        remote.links.insert(local.clone());
        endpoint.emit(TransportEvent::ConnectionOpened(target.clone()));
        remote.emit(TransportEvent::ConnectionOpened(local));
        Ok(())
    }

    async fn send(&self, peer: &PeerId, frame: String) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let (local, endpoint) = self.own_endpoint()?;
        if !endpoint.links.contains(peer) {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        let Some(remote) = self.hub.endpoint(peer) else {
            endpoint.links.remove(peer);
            return Err(TransportError::NotConnected(peer.clone()));
        };
        if !remote.links.contains(&local) {
            return Err(TransportError::NotConnected(peer.clone()));
        }
        if self.hub.take_frame_loss(peer) {
            tracing::debug!(from = %local, to = %peer, "Frame lost");
            return Ok(());
        }
        remote.emit(TransportEvent::Received { peer: local, frame });
        Ok(())
    }

    async fn close(&self, peer: &PeerId) {
        let Ok((local, endpoint)) = self.own_endpoint() else {
            return;
        };
        if endpoint.links.remove(peer).is_none() {
            return;
        }
        if let Some(remote) = self.hub.endpoint(peer) {
            if remote.links.remove(&local).is_some() {
                remote.emit(TransportEvent::ConnectionClosed(local));
            }
        }
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok((local, endpoint)) = self.own_endpoint() else {
            return;
        };
        let peers: Vec<PeerId> = endpoint.links.iter().map(|p| p.key().clone()).collect();
        for peer in peers {
            endpoint.links.remove(&peer);
            if let Some(remote) = self.hub.endpoint(&peer) {
                if remote.links.remove(&local).is_some() {
                    remote.emit(TransportEvent::ConnectionClosed(local.clone()));
                }
            }
        }
        self.hub
            .inner
            .endpoints
            .remove_if(&local, |_, e| e.transport_id == self.transport_id);
        tracing::debug!(peer = %local, "Transport destroyed");
    }
}

// =============================================================================
// Factory
// =============================================================================

#[derive(Clone)]
pub struct MemoryTransportFactory {
    hub: InMemorySignaling,
}

impl TransportFactory for MemoryTransportFactory {
    fn create(&self) -> (Arc<dyn TransportPort>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, rx) = self.hub.transport();
        (Arc::new(transport), rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn host_id() -> PeerId {
        PeerId::from("SESSION-AB12CD")
    }

    #[tokio::test]
    async fn dial_send_and_close() {
        let hub = InMemorySignaling::new();
        let (host, mut host_rx) = hub.transport();
        let (guest, mut guest_rx) = hub.transport();

        host.open(Some(host_id())).await.unwrap();
        let guest_id = guest.open(None).await.unwrap();
        guest.connect(&host_id()).await.unwrap();

        assert_eq!(
            drain(&mut guest_rx),
            vec![
                TransportEvent::SignalingOpened(guest_id.clone()),
                TransportEvent::ConnectionOpened(host_id()),
            ]
        );
        assert_eq!(
            drain(&mut host_rx),
            vec![
                TransportEvent::SignalingOpened(host_id()),
                TransportEvent::ConnectionOpened(guest_id.clone()),
            ]
        );

        guest.send(&host_id(), "hello".into()).await.unwrap();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::Received {
                peer: guest_id.clone(),
                frame: "hello".into()
            }]
        );

        guest.close(&host_id()).await;
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::ConnectionClosed(guest_id)]
        );
        assert!(guest.send(&host_id(), "late".into()).await.is_err());
    }

    #[tokio::test]
    async fn lost_frames_vanish_silently() {
        let hub = InMemorySignaling::new();
        let (host, mut host_rx) = hub.transport();
        let (guest, _guest_rx) = hub.transport();
        host.open(Some(host_id())).await.unwrap();
        let guest_id = guest.open(None).await.unwrap();
        guest.connect(&host_id()).await.unwrap();
        drain(&mut host_rx);

        hub.lose_frames_to(host_id(), 1);
        guest.send(&host_id(), "first".into()).await.unwrap();
        guest.send(&host_id(), "second".into()).await.unwrap();

        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::Received {
                peer: guest_id,
                frame: "second".into()
            }]
        );
    }

    #[tokio::test]
    async fn identities_are_exclusive_and_reservable() {
        let hub = InMemorySignaling::new();
        let (first, _rx1) = hub.transport();
        let (second, _rx2) = hub.transport();
        first.open(Some(host_id())).await.unwrap();

        assert!(matches!(
            second.open(Some(host_id())).await,
            Err(TransportError::Signaling(SignalingErrorKind::UnavailableId))
        ));

        first.destroy().await;
        hub.reserve_identity(host_id());
        assert!(second.open(Some(host_id())).await.is_err());
        hub.release_identity(&host_id());
        assert!(second.open(Some(host_id())).await.is_ok());
    }

    #[tokio::test]
    async fn dialing_an_unknown_peer_reports_peer_unavailable() {
        let hub = InMemorySignaling::new();
        let (guest, _rx) = hub.transport();
        guest.open(None).await.unwrap();
        assert!(matches!(
            guest.connect(&host_id()).await,
            Err(TransportError::Signaling(SignalingErrorKind::PeerUnavailable))
        ));
    }

    #[tokio::test]
    async fn links_survive_a_signaling_outage() {
        let hub = InMemorySignaling::new();
        let (host, mut host_rx) = hub.transport();
        let (guest, mut guest_rx) = hub.transport();
        host.open(Some(host_id())).await.unwrap();
        let guest_id = guest.open(None).await.unwrap();
        guest.connect(&host_id()).await.unwrap();
        drain(&mut host_rx);
        drain(&mut guest_rx);

        hub.drop_signaling();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::SignalingDisconnected]
        );
        assert!(host.reattach().await.is_err());

        host.send(&guest_id, "still here".into()).await.unwrap();
        assert_eq!(drain(&mut guest_rx).len(), 2);

        hub.restore_signaling();
        host.reattach().await.unwrap();
        assert_eq!(
            drain(&mut host_rx),
            vec![TransportEvent::SignalingOpened(host_id())]
        );
    }

    #[tokio::test]
    async fn destroy_closes_links_and_frees_the_identity() {
        let hub = InMemorySignaling::new();
        let (host, _host_rx) = hub.transport();
        let (guest, mut guest_rx) = hub.transport();
        host.open(Some(host_id())).await.unwrap();
        guest.open(None).await.unwrap();
        guest.connect(&host_id()).await.unwrap();
        drain(&mut guest_rx);

        host.destroy().await;

        assert_eq!(
            drain(&mut guest_rx),
            vec![TransportEvent::ConnectionClosed(host_id())]
        );
        assert!(!hub.is_registered(&host_id()));
        assert!(host.open(Some(host_id())).await.is_err());
    }

    #[tokio::test]
    async fn injected_faults_hit_the_next_call_only() {
        let hub = InMemorySignaling::new();
        let (t, _rx) = hub.transport();
        hub.inject_fault(SignalingErrorKind::Server);
        assert!(matches!(
            t.open(None).await,
            Err(TransportError::Signaling(SignalingErrorKind::Server))
        ));
        assert!(t.open(None).await.is_ok());
    }
}
