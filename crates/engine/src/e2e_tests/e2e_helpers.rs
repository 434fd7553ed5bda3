//! Helpers for wiring runtimes together in tests.

use std::sync::Arc;
use std::time::Duration;

use realmlink_domain::{
    ClaimStats, DisplayName, EntityId, EntityKind, GridPosition, Revision, SessionState,
};
use realmlink_shared::SessionCode;

use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::kv_store::InMemoryKvStore;
use crate::infrastructure::ports::TransportFactory;
use crate::infrastructure::settings::EngineConfig;
use crate::infrastructure::transport::InMemorySignaling;
use crate::runtime::{GuestHandle, GuestRuntime, HostHandle, HostRuntime, RuntimeDeps};
use crate::use_cases::{ConnectivityState, EditOutcome, GuestIntent, HostEdit, SessionContext};

/// Longest any test waits for the table to settle. Generous because paused
/// time jumps straight to the next timer anyway.
pub const SETTLE: Duration = Duration::from_secs(300);

pub fn table_code() -> SessionCode {
    SessionCode::parse("AB12CD").unwrap()
}

pub fn deps_for(transports: Arc<dyn TransportFactory>) -> RuntimeDeps {
    RuntimeDeps::new(
        EngineConfig::default(),
        transports,
        Arc::new(SystemClock::new()),
    )
}

/// A host on the in-memory hub plus whatever guests join it.
pub struct Table {
    pub hub: InMemorySignaling,
    pub saves: InMemoryKvStore,
    pub host: HostHandle,
}

impl Table {
    pub async fn open() -> Self {
        let hub = InMemorySignaling::new();
        let saves = InMemoryKvStore::new();
        let deps = deps_for(Arc::new(hub.factory())).with_store(Arc::new(saves.clone()));
        let host = HostRuntime::start(table_code(), deps).await;
        wait_connected(&host.watch_connectivity()).await;
        Self { hub, saves, host }
    }

    /// Start a guest without waiting for it to connect.
    pub fn join(&self, name: &str) -> GuestHandle {
        let context = SessionContext::guest(table_code(), DisplayName::new(name).unwrap());
        GuestRuntime::start(context, deps_for(Arc::new(self.hub.factory()))).unwrap()
    }

    /// Start a guest and wait until it holds the host's current state.
    pub async fn seat(&self, name: &str) -> GuestHandle {
        let guest = self.join(name);
        wait_connected(&guest.watch_connectivity()).await;
        caught_up(&guest, self.host.state().revision()).await;
        guest
    }

    pub async fn add_token(&self, kind: EntityKind, position: GridPosition) -> EntityId {
        let room = self.host.state().active_room_id();
        match self
            .host
            .edit(HostEdit::AddToken {
                room,
                kind,
                position: Some(position),
            })
            .await
            .unwrap()
        {
            EditOutcome::EntityAdded(id) => id,
            other => panic!("expected a new token, got {:?}", other),
        }
    }
}

pub async fn wait_connected(connectivity: &tokio::sync::watch::Receiver<ConnectivityState>) {
    let mut connectivity = connectivity.clone();
    tokio::time::timeout(
        SETTLE,
        connectivity.wait_for(|state| *state == ConnectivityState::Connected),
    )
    .await
    .expect("never connected")
    .unwrap();
}

/// Wait until `guest` has applied `revision` or anything newer.
pub async fn caught_up(guest: &GuestHandle, revision: Revision) -> Arc<SessionState> {
    let mut watcher = guest.watch_state();
    let state = tokio::time::timeout(
        SETTLE,
        watcher.wait_for(|state| state.as_ref().is_some_and(|s| s.revision() >= revision)),
    )
    .await
    .expect("replica never caught up")
    .unwrap()
    .clone();
    state.unwrap()
}

/// Wait until the host state satisfies `check`.
pub async fn host_until(host: &HostHandle, check: impl Fn(&SessionState) -> bool) -> Arc<SessionState> {
    let mut watcher = host.watch_state();
    let state = tokio::time::timeout(SETTLE, watcher.wait_for(|state| check(state)))
        .await
        .expect("host state never matched")
        .unwrap()
        .clone();
    state
}

pub fn claim(slot: EntityId, max_hp: i32, armor_class: i32) -> GuestIntent {
    GuestIntent::Claim {
        slot,
        stats: ClaimStats::new(max_hp, armor_class).unwrap(),
    }
}
