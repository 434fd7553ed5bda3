//! Relay transport over a shared key-value store.
//!
//! For participants that can only share storage (two processes on one disk,
//! two tabs on one origin). Nothing is pushed; both sides poll.
//!
//! Layout under `relay:<host>:`
//! - `owner`: `{instance, beat}` written by the host every poll
//! - `guest:<id>`: `{beat}` written by each guest every poll
//! - `to-host:<id>` / `to-guest:<id>`: single-writer mailboxes of the last
//!   few sequenced frames, stamped with the writer's instance
//!
//! A peer whose beat stops changing for `stale_polls` polls is considered
//! gone and its link is closed. A host that finds someone else's owner record
//! watches it for the same window and takes it over if it never moves.
//! A guest dial opens only once the current owner instance has registered it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use realmlink_shared::PeerId;

use crate::infrastructure::ports::{
    KeyValueStorePort, SignalingErrorKind, StoreError, TransportError, TransportEvent,
    TransportFactory, TransportPort,
};
use crate::infrastructure::settings::EngineConfig;

/// Frames kept in a mailbox. A reader further behind than this loses frames.
const MAILBOX_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    pub stale_polls: u32,
}

impl From<&EngineConfig> for RelaySettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.relay_poll_interval,
            stale_polls: config.relay_stale_polls.max(1),
        }
    }
}

// =============================================================================
// Stored records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OwnerRecord {
    instance: String,
    beat: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresenceRecord {
    beat: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MailFrame {
    seq: u64,
    frame: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Mailbox {
    #[serde(default)]
    instance: String,
    frames: VecDeque<MailFrame>,
}

impl Mailbox {
    fn new(instance: String) -> Self {
        Self {
            instance,
            frames: VecDeque::new(),
        }
    }

    fn push(&mut self, seq: u64, frame: String) {
        self.frames.push_back(MailFrame { seq, frame });
        while self.frames.len() > MAILBOX_CAPACITY {
            self.frames.pop_front();
        }
    }
}

fn owner_key(host: &PeerId) -> String {
    format!("relay:{}:owner", host)
}

fn roster_prefix(host: &PeerId) -> String {
    format!("relay:{}:guest:", host)
}

fn presence_key(host: &PeerId, guest: &PeerId) -> String {
    format!("relay:{}:guest:{}", host, guest)
}

fn to_host_key(host: &PeerId, guest: &PeerId) -> String {
    format!("relay:{}:to-host:{}", host, guest)
}

fn to_guest_key(host: &PeerId, guest: &PeerId) -> String {
    format!("relay:{}:to-guest:{}", host, guest)
}

// =============================================================================
// Transport state
// =============================================================================

/// Whether a host transport owns its identity yet.
#[derive(Debug)]
enum Claim {
    Held,
    /// Someone else's record was in place at `open`.
    Watching { record: OwnerRecord, unchanged: u32 },
}

#[derive(Debug)]
struct GuestTrack {
    beat: u64,
    unchanged: u32,
    read_seq: u64,
}

#[derive(Debug)]
struct HostLink {
    host: PeerId,
    owner: OwnerRecord,
    unchanged: u32,
    beat: u64,
    read_seq: u64,
    /// Set once the owner has registered this guest.
    acked: bool,
}

#[derive(Debug)]
enum Role {
    Unopened,
    Host {
        id: PeerId,
        beat: u64,
        guests: HashMap<PeerId, GuestTrack>,
        claim: Claim,
        evicted: bool,
    },
    Guest {
        id: PeerId,
        link: Option<HostLink>,
    },
}

struct RelayState {
    role: Role,
    online: bool,
    destroyed: bool,
    outboxes: HashMap<PeerId, Mailbox>,
}

struct Shared {
    store: Arc<dyn KeyValueStorePort>,
    settings: RelaySettings,
    events: mpsc::UnboundedSender<TransportEvent>,
    instance: String,
    next_seq: AtomicU64,
    state: tokio::sync::Mutex<RelayState>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn own_record(&self, beat: u64) -> OwnerRecord {
        OwnerRecord {
            instance: self.instance.clone(),
            beat,
        }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(StoreError::serialization),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let text = serde_json::to_string(value).map_err(StoreError::serialization)?;
        self.store.put(key, text).await
    }

    async fn poll(&self) {
        let mut state = self.state.lock().await;
        if state.destroyed {
            return;
        }
        let result = match state.role {
            Role::Unopened | Role::Host { evicted: true, .. } => Ok(()),
            Role::Host { .. } => self.poll_host(&mut *state).await,
            Role::Guest { .. } => self.poll_guest(&mut *state).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Relay poll failed");
            if state.online {
                state.online = false;
                self.emit(TransportEvent::SignalingDisconnected);
            }
        }
    }

    async fn poll_host(&self, state: &mut RelayState) -> Result<(), StoreError> {
        let RelayState {
            role, outboxes, ..
        } = state;
        let Role::Host {
            id,
            beat,
            guests,
            claim,
            evicted,
        } = role
        else {
            return Ok(());
        };

        let current: Option<OwnerRecord> = self.read(&owner_key(id)).await?;

        if let Claim::Watching { record, unchanged } = claim {
            match current {
                Some(seen) if seen != *record => {
                    tracing::warn!(peer = %id, "Relay identity is held by a live host");
                    *evicted = true;
                    self.emit(TransportEvent::SignalingError(
                        SignalingErrorKind::UnavailableId,
                    ));
                    return Ok(());
                }
                Some(_) => {
                    *unchanged += 1;
                    if *unchanged < self.settings.stale_polls {
                        return Ok(());
                    }
                    tracing::info!(peer = %id, "Taking over abandoned relay identity");
                }
                None => tracing::info!(peer = %id, "Relay identity released"),
            }
            self.write(&owner_key(id), &self.own_record(0)).await?;
            *claim = Claim::Held;
            *beat = 0;
            self.emit(TransportEvent::SignalingOpened(id.clone()));
            return Ok(());
        }

        if current.as_ref().map(|r| r.instance.as_str()) != Some(self.instance.as_str()) {
            tracing::warn!(peer = %id, "Relay identity taken over by another host");
            *evicted = true;
            self.emit(TransportEvent::SignalingError(SignalingErrorKind::UnavailableId));
            return Ok(());
        }
        *beat += 1;
        self.write(&owner_key(id), &self.own_record(*beat)).await?;

        let prefix = roster_prefix(id);
        let listed: Vec<PeerId> = self
            .store
            .list_keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(PeerId::from))
            .collect();

        let departed: Vec<PeerId> = guests
            .keys()
            .filter(|g| !listed.contains(g))
            .cloned()
            .collect();
        for guest in departed {
            guests.remove(&guest);
            outboxes.remove(&guest);
            self.store.delete(&to_guest_key(id, &guest)).await?;
            self.emit(TransportEvent::ConnectionClosed(guest));
        }

        for guest in listed {
            if !guests.contains_key(&guest) {
                let Some(presence) = self.read::<PresenceRecord>(&presence_key(id, &guest)).await?
                else {
                    continue;
                };
                let mailbox = Mailbox::new(self.instance.clone());
                self.write(&to_guest_key(id, &guest), &mailbox).await?;
                outboxes.insert(guest.clone(), mailbox);
                guests.insert(
                    guest.clone(),
                    GuestTrack {
                        beat: presence.beat,
                        unchanged: 0,
                        read_seq: 0,
                    },
                );
                tracing::debug!(peer = %guest, "Relay guest registered");
                self.emit(TransportEvent::ConnectionOpened(guest.clone()));
            }

            let Some(track) = guests.get_mut(&guest) else {
                continue;
            };
            let presence: Option<PresenceRecord> = self.read(&presence_key(id, &guest)).await?;
            let stale = match presence {
                Some(p) if p.beat < track.beat => {
                    // Same guest dialed again; register it afresh next poll.
                    guests.remove(&guest);
                    outboxes.remove(&guest);
                    tracing::debug!(peer = %guest, "Relay guest redialed");
                    self.emit(TransportEvent::ConnectionClosed(guest));
                    continue;
                }
                Some(p) if p.beat != track.beat => {
                    track.beat = p.beat;
                    track.unchanged = 0;
                    false
                }
                Some(_) => {
                    track.unchanged += 1;
                    track.unchanged >= self.settings.stale_polls
                }
                None => true,
            };
            if stale {
                guests.remove(&guest);
                outboxes.remove(&guest);
                self.store.delete(&presence_key(id, &guest)).await?;
                self.store.delete(&to_guest_key(id, &guest)).await?;
                self.store.delete(&to_host_key(id, &guest)).await?;
                tracing::debug!(peer = %guest, "Relay guest went stale");
                self.emit(TransportEvent::ConnectionClosed(guest));
                continue;
            }

            let inbox: Mailbox = self
                .read(&to_host_key(id, &guest))
                .await?
                .unwrap_or_default();
            for mail in inbox.frames {
                if mail.seq > track.read_seq {
                    track.read_seq = mail.seq;
                    self.emit(TransportEvent::Received {
                        peer: guest.clone(),
                        frame: mail.frame,
                    });
                }
            }
        }
        Ok(())
    }

    async fn poll_guest(&self, state: &mut RelayState) -> Result<(), StoreError> {
        let RelayState {
            role, outboxes, ..
        } = state;
        let Role::Guest { id, link } = role else {
            return Ok(());
        };
        let Some(host_link) = link.as_mut() else {
            return Ok(());
        };
        let host = host_link.host.clone();

        let owner: Option<OwnerRecord> = self.read(&owner_key(&host)).await?;
        let host_gone = match owner {
            Some(record) if record.instance != host_link.owner.instance => true,
            Some(record) if record.beat != host_link.owner.beat => {
                host_link.owner = record;
                host_link.unchanged = 0;
                false
            }
            Some(_) => {
                host_link.unchanged += 1;
                host_link.unchanged >= self.settings.stale_polls
            }
            None => true,
        };
        let dropped_by_host = !host_gone
            && host_link.acked
            && self
                .read::<PresenceRecord>(&presence_key(&host, id))
                .await?
                .is_none();

        if host_gone || dropped_by_host {
            *link = None;
            outboxes.remove(&host);
            self.store.delete(&presence_key(&host, id)).await?;
            self.store.delete(&to_host_key(&host, id)).await?;
            self.store.delete(&to_guest_key(&host, id)).await?;
            tracing::debug!(peer = %host, "Relay host link closed");
            self.emit(TransportEvent::ConnectionClosed(host));
            return Ok(());
        }

        host_link.beat += 1;
        self.write(
            &presence_key(&host, id),
            &PresenceRecord {
                beat: host_link.beat,
            },
        )
        .await?;

        let inbox: Option<Mailbox> = self.read(&to_guest_key(&host, id)).await?;
        let Some(inbox) = inbox.filter(|m| m.instance == host_link.owner.instance) else {
            return Ok(());
        };
        if !host_link.acked {
            host_link.acked = true;
            tracing::debug!(peer = %host, "Relay host registered us");
            self.emit(TransportEvent::ConnectionOpened(host.clone()));
        }
        for mail in inbox.frames {
            if mail.seq > host_link.read_seq {
                host_link.read_seq = mail.seq;
                self.emit(TransportEvent::Received {
                    peer: host.clone(),
                    frame: mail.frame,
                });
            }
        }
        Ok(())
    }

    /// Claims `id` if it is free. Otherwise the current record is returned for
    /// the poller to watch.
    async fn claim_host(&self, id: &PeerId) -> Result<Claim, StoreError> {
        let key = owner_key(id);
        if let Some(existing) = self.read::<OwnerRecord>(&key).await? {
            tracing::info!(peer = %id, "Relay identity in use, watching its owner");
            return Ok(Claim::Watching {
                record: existing,
                unchanged: 0,
            });
        }
        self.write(&key, &self.own_record(0)).await?;
        Ok(Claim::Held)
    }
}

// =============================================================================
// Transport
// =============================================================================

pub struct StorageRelayTransport {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl StorageRelayTransport {
    fn new(
        store: Arc<dyn KeyValueStorePort>,
        settings: RelaySettings,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            store,
            settings,
            events: tx,
            instance: Uuid::new_v4().to_string(),
            next_seq: AtomicU64::new(1),
            state: tokio::sync::Mutex::new(RelayState {
                role: Role::Unopened,
                online: false,
                destroyed: false,
                outboxes: HashMap::new(),
            }),
        });
        (
            Self {
                shared,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    fn spawn_poller(&self) {
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.settings.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => shared.poll().await,
                }
            }
        });
    }
}

impl Drop for StorageRelayTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl TransportPort for StorageRelayTransport {
    async fn open(&self, local_id: Option<PeerId>) -> Result<PeerId, TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.destroyed {
            return Err(TransportError::Destroyed);
        }
        if !matches!(state.role, Role::Unopened) {
            return Err(TransportError::Signaling(SignalingErrorKind::Other));
        }

        let (id, registered) = match local_id {
            Some(id) => {
                let claim = shared.claim_host(&id).await?;
                let held = matches!(claim, Claim::Held);
                state.role = Role::Host {
                    id: id.clone(),
                    beat: 0,
                    guests: HashMap::new(),
                    claim,
                    evicted: false,
                };
                (id, held)
            }
            None => {
                let id = PeerId::new(format!("guest-{}", Uuid::new_v4().simple()));
                state.role = Role::Guest {
                    id: id.clone(),
                    link: None,
                };
                (id, true)
            }
        };
        state.online = true;
        drop(state);

        self.spawn_poller();
        tracing::debug!(peer = %id, "Relay opened");
        if registered {
            shared.emit(TransportEvent::SignalingOpened(id.clone()));
        }
        Ok(id)
    }

    async fn reattach(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.destroyed {
            return Err(TransportError::Destroyed);
        }
        let registered = match &state.role {
            Role::Unopened => return Err(TransportError::NotOpen),
            Role::Host { evicted: true, .. } => {
                return Err(TransportError::Signaling(SignalingErrorKind::UnavailableId))
            }
            // The poller announces the identity once the takeover lands.
            Role::Host {
                claim: Claim::Watching { .. },
                ..
            } => None,
            Role::Host { id, .. } => {
                let record: Option<OwnerRecord> = shared.read(&owner_key(id)).await?;
                if record.map(|r| r.instance) != Some(shared.instance.clone()) {
                    return Err(TransportError::Signaling(SignalingErrorKind::UnavailableId));
                }
                Some(id.clone())
            }
            Role::Guest { id, .. } => {
                shared.store.list_keys("relay:").await?;
                Some(id.clone())
            }
        };
        state.online = true;
        if let Some(id) = registered {
            shared.emit(TransportEvent::SignalingOpened(id));
        }
        Ok(())
    }

    async fn connect(&self, target: &PeerId) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.destroyed {
            return Err(TransportError::Destroyed);
        }
        let RelayState { role, outboxes, .. } = &mut *state;
        let Role::Guest { id, link } = role else {
            return Err(TransportError::NotOpen);
        };

        let owner: OwnerRecord = shared
            .read(&owner_key(target))
            .await?
            .ok_or(TransportError::Signaling(SignalingErrorKind::PeerUnavailable))?;

        // Whatever an earlier host left for us is not an answer to this dial.
        shared.store.delete(&to_guest_key(target, id)).await?;
        let mailbox = Mailbox::new(shared.instance.clone());
        shared.write(&to_host_key(target, id), &mailbox).await?;
        shared
            .write(&presence_key(target, id), &PresenceRecord { beat: 0 })
            .await?;
        outboxes.insert(target.clone(), mailbox);
        *link = Some(HostLink {
            host: target.clone(),
            owner,
            unchanged: 0,
            beat: 0,
            read_seq: 0,
            acked: false,
        });
        tracing::debug!(peer = %target, "Relay dial waiting for the host");
        Ok(())
    }

    async fn send(&self, peer: &PeerId, frame: String) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.destroyed {
            return Err(TransportError::Destroyed);
        }
        let RelayState { role, outboxes, .. } = &mut *state;
        let key = match role {
            Role::Host { id, guests, .. } if guests.contains_key(peer) => to_guest_key(id, peer),
            Role::Guest {
                id,
                link: Some(link),
            } if link.host == *peer => to_host_key(peer, id),
            _ => return Err(TransportError::NotConnected(peer.clone())),
        };
        let outbox = outboxes
            .entry(peer.clone())
            .or_insert_with(|| Mailbox::new(shared.instance.clone()));
        outbox.push(shared.next_seq.fetch_add(1, Ordering::Relaxed), frame);
        shared.write(&key, &*outbox).await?;
        Ok(())
    }

    async fn close(&self, peer: &PeerId) {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        let RelayState { role, outboxes, .. } = &mut *state;
        let keys = match role {
            Role::Host { id, guests, .. } => {
                if guests.remove(peer).is_none() {
                    return;
                }
                vec![
                    presence_key(id, peer),
                    to_guest_key(id, peer),
                    to_host_key(id, peer),
                ]
            }
            Role::Guest { id, link } => {
                if link.as_ref().map(|l| &l.host) != Some(peer) {
                    return;
                }
                *link = None;
                vec![
                    presence_key(peer, id),
                    to_host_key(peer, id),
                    to_guest_key(peer, id),
                ]
            }
            Role::Unopened => return,
        };
        outboxes.remove(peer);
        for key in keys {
            if let Err(e) = shared.store.delete(&key).await {
                tracing::warn!(error = %e, key, "Failed to clear relay key");
            }
        }
    }

    async fn destroy(&self) {
        self.cancel.cancel();
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        state.online = false;

        let keys = match &state.role {
            Role::Host {
                id,
                evicted: false,
                claim: Claim::Held,
                ..
            } => {
                let mut keys = Vec::new();
                let owner: Result<Option<OwnerRecord>, _> = shared.read(&owner_key(id)).await;
                if matches!(owner, Ok(Some(ref r)) if r.instance == shared.instance) {
                    keys.push(owner_key(id));
                }
                keys
            }
            Role::Guest {
                id,
                link: Some(link),
            } => vec![
                presence_key(&link.host, id),
                to_host_key(&link.host, id),
                to_guest_key(&link.host, id),
            ],
            _ => Vec::new(),
        };
        for key in keys {
            if let Err(e) = shared.store.delete(&key).await {
                tracing::warn!(error = %e, key, "Failed to clear relay key");
            }
        }
        tracing::debug!("Relay transport destroyed");
    }
}

// =============================================================================
// Factory
// =============================================================================

#[derive(Clone)]
pub struct StorageRelayFactory {
    store: Arc<dyn KeyValueStorePort>,
    settings: RelaySettings,
}

impl StorageRelayFactory {
    pub fn new(store: Arc<dyn KeyValueStorePort>, settings: RelaySettings) -> Self {
        Self { store, settings }
    }
}

impl TransportFactory for StorageRelayFactory {
    fn create(&self) -> (Arc<dyn TransportPort>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, rx) = StorageRelayTransport::new(Arc::clone(&self.store), self.settings);
        (Arc::new(transport), rx)
    }
}
