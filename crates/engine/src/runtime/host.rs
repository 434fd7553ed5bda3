//! The authoritative runtime.
//!
//! Owns the only mutable `SessionState`. Local edits arrive as commands from
//! the `HostHandle`, guest requests arrive as `ACTION_REQUEST` frames; both go
//! through the `SessionStore` and every change that sticks is broadcast to all
//! open links and autosaved.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Interval;
use url::Url;

use realmlink_domain::{
    Actor, DisplayName, DomainError, EntityId, GeneratedStats, Revision, RoomId, SessionState,
};
use realmlink_shared::{GuestAction, PeerId, SessionCode, WireMessage};

use super::link::{self, Link, LinkReport};
use super::{emit, event_channel, heartbeat_ticker, RuntimeDeps, SessionEvent, COMMAND_CAPACITY};
use crate::api::{ConnectionInfo, ConnectionTable};
use crate::infrastructure::ports::{
    ClockPort, ErrorClass, SessionError, StatGenError, StatGeneratorPort, TransportEvent,
};
use crate::infrastructure::settings::EngineConfig;
use crate::stores::SessionStore;
use crate::use_cases::{
    apply_guest_action, export_json, export_portal, generate_stats, import_json, import_portal,
    place_monster, Broadcaster, ConnectivityState, EditOutcome, HostEdit, PresenceSignal, Role,
    SessionContext, SnapshotVault,
};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum HostCommand {
    Edit {
        edit: HostEdit,
        reply: Reply<EditOutcome>,
    },
    Summon {
        prompt: String,
        room: Option<RoomId>,
        reply: Reply<EntityId>,
    },
    /// Stat generation finished in its own task
    Summoned {
        result: Result<GeneratedStats, StatGenError>,
        room: Option<RoomId>,
        reply: Reply<EntityId>,
    },
    Replace {
        state: SessionState,
        reply: Reply<Revision>,
    },
    Roster {
        reply: oneshot::Sender<Vec<ConnectionInfo>>,
    },
    UpdateContext {
        context: SessionContext,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable front of a running host.
#[derive(Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
    state: watch::Receiver<Arc<SessionState>>,
    connectivity: watch::Receiver<ConnectivityState>,
    events: broadcast::Sender<SessionEvent>,
}

impl HostHandle {
    /// Apply a local edit. Errors leave the state untouched.
    pub async fn edit(&self, edit: HostEdit) -> Result<EditOutcome, SessionError> {
        self.request(|reply| HostCommand::Edit { edit, reply }).await?
    }

    /// Generate stats for `prompt` and place the result as an enemy in `room`
    /// (the active room when `None`).
    pub async fn summon_monster(
        &self,
        prompt: impl Into<String>,
        room: Option<RoomId>,
    ) -> Result<EntityId, SessionError> {
        let prompt = prompt.into();
        self.request(|reply| HostCommand::Summon {
            prompt,
            room,
            reply,
        })
        .await?
    }

    /// Replace the whole session. The new state gets a fresh revision.
    pub async fn replace_state(&self, state: SessionState) -> Result<Revision, SessionError> {
        self.request(|reply| HostCommand::Replace { state, reply })
            .await?
    }

    pub async fn import_json(&self, text: &str) -> Result<Revision, SessionError> {
        self.replace_state(import_json(text)?).await
    }

    /// Load the snapshot carried by a portal link. A link without one is a
    /// validation error.
    pub async fn import_portal(&self, link: &Url) -> Result<Revision, SessionError> {
        let state = import_portal(link)?
            .ok_or_else(|| DomainError::validation("Link carries no session"))?;
        self.replace_state(state).await
    }

    pub fn export_json(&self) -> Result<String, SessionError> {
        export_json(&self.state())
    }

    pub fn export_portal(&self, base: &Url) -> Result<Url, SessionError> {
        export_portal(base, &self.state())
    }

    pub async fn roster(&self) -> Result<Vec<ConnectionInfo>, SessionError> {
        self.request(|reply| HostCommand::Roster { reply }).await
    }

    /// Swap the session context. A new session code re-registers the host
    /// under the new identity.
    pub async fn update_context(&self, context: SessionContext) -> Result<(), SessionError> {
        self.request(|reply| HostCommand::UpdateContext { context, reply })
            .await?
    }

    /// Tear the transport down and stop the runtime.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| HostCommand::Shutdown { reply }).await
    }

    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<SessionState>> {
        self.state.clone()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        *self.connectivity.borrow()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::RuntimeStopped)?;
        response.await.map_err(|_| SessionError::RuntimeStopped)
    }
}

// =============================================================================
// Runtime
// =============================================================================

pub struct HostRuntime {
    context: SessionContext,
    config: EngineConfig,
    clock: Arc<dyn ClockPort>,
    store: SessionStore,
    vault: Option<SnapshotVault>,
    stat_generator: Option<Arc<dyn StatGeneratorPort>>,
    broadcaster: Broadcaster,
    connections: ConnectionTable,
    link: Link,
    commands: mpsc::Receiver<HostCommand>,
    reentry: mpsc::WeakSender<HostCommand>,
    state_tx: watch::Sender<Arc<SessionState>>,
    connectivity_tx: watch::Sender<ConnectivityState>,
    events: broadcast::Sender<SessionEvent>,
    heartbeat: Interval,
}

impl HostRuntime {
    /// Resume the saved session for `code` if there is one and start serving
    /// it. The runtime stops on `shutdown` or once every handle is dropped.
    pub async fn start(code: SessionCode, deps: RuntimeDeps) -> HostHandle {
        let context = SessionContext::host(code);
        let vault = deps.store.clone().map(SnapshotVault::new);
        let store = resume(&context, vault.as_ref(), &deps).await;

        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(Arc::new(store.state().clone()));
        let (connectivity_tx, connectivity) = watch::channel(ConnectivityState::Disconnected);
        let events = event_channel();

        let runtime = Self {
            link: Link::new(&context, Arc::clone(&deps.transports), deps.config.retry.clone()),
            heartbeat: heartbeat_ticker(deps.config.heartbeat_interval),
            context,
            config: deps.config,
            clock: deps.clock,
            store,
            vault,
            stat_generator: deps.stat_generator,
            broadcaster: Broadcaster::new(),
            connections: ConnectionTable::new(),
            commands,
            reentry: commands_tx.downgrade(),
            state_tx,
            connectivity_tx,
            events: events.clone(),
        };
        tokio::spawn(runtime.run());

        HostHandle {
            commands: commands_tx,
            state,
            connectivity,
            events,
        }
    }

    async fn run(mut self) {
        tracing::info!(code = %self.context.code, revision = %self.store.revision(), "Host runtime started");
        let report = self.link.signal(PresenceSignal::Start).await;
        self.after_link(report);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All host handles dropped");
                        self.stop().await;
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                event = link::next_event(&mut self.link.events) => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => self.link.events = None,
                },
                _ = link::retry_due(&mut self.link.retry) => {
                    self.link.retry = None;
                    let report = self.link.signal(PresenceSignal::RetryElapsed).await;
                    self.after_link(report);
                }
                _ = self.heartbeat.tick() => self.send_heartbeats().await,
            }
        }
        tracing::info!(code = %self.context.code, "Host runtime stopped");
    }

    async fn handle_command(&mut self, command: HostCommand) -> ControlFlow<()> {
        match command {
            HostCommand::Edit { edit, reply } => {
                let result = self.commit(|state| edit.apply(state)).await;
                let _ = reply.send(result);
            }
            HostCommand::Summon {
                prompt,
                room,
                reply,
            } => self.summon(prompt, room, reply),
            HostCommand::Summoned {
                result,
                room,
                reply,
            } => {
                let result = match result {
                    Ok(stats) => {
                        let room = room.unwrap_or_else(|| self.store.state().active_room_id());
                        self.commit(|state| place_monster(state, room, &stats)).await
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Stat generation failed");
                        let e = SessionError::from(e);
                        self.notice(&e);
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            HostCommand::Replace { state, reply } => {
                let result = match self.store.replace(state) {
                    Ok(revision) => {
                        tracing::info!(%revision, "Session replaced");
                        self.publish().await;
                        Ok(revision)
                    }
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
            HostCommand::Roster { reply } => {
                let _ = reply.send(self.connections.roster());
            }
            HostCommand::UpdateContext { context, reply } => {
                let result = self.update_context(context).await;
                let _ = reply.send(result);
            }
            HostCommand::Shutdown { reply } => {
                self.stop().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Run `f` through the store; publish if it changed anything.
    async fn commit<T>(
        &mut self,
        f: impl FnOnce(&mut SessionState) -> Result<T, DomainError>,
    ) -> Result<T, SessionError> {
        let committed = self.store.mutate(f)?;
        if committed.changed {
            self.publish().await;
        }
        Ok(committed.value)
    }

    fn summon(&mut self, prompt: String, room: Option<RoomId>, reply: Reply<EntityId>) {
        let Some(generator) = self.stat_generator.clone() else {
            let _ = reply.send(Err(StatGenError::RequestFailed(
                "No stat generator configured".into(),
            )
            .into()));
            return;
        };
        let reentry = self.reentry.clone();
        tokio::spawn(async move {
            let result = generate_stats(generator.as_ref(), &prompt).await;
            if let Some(commands) = reentry.upgrade() {
                let _ = commands
                    .send(HostCommand::Summoned {
                        result,
                        room,
                        reply,
                    })
                    .await;
            }
        });
    }

    async fn update_context(&mut self, context: SessionContext) -> Result<(), SessionError> {
        if context.role != Role::Host {
            return Err(DomainError::validation("A host runtime cannot become a guest").into());
        }
        if context.code == self.context.code {
            self.context = context;
            return Ok(());
        }
        tracing::info!(from = %self.context.code, to = %context.code, "Session code changed");
        self.context = context;
        let report = self.link.restart(&self.context).await;
        self.after_link(report);
        self.autosave().await;
        Ok(())
    }

    async fn stop(&mut self) {
        let report = self.link.signal(PresenceSignal::Shutdown).await;
        self.after_link(report);
    }

    // -------------------------------------------------------------------------
    // Replication
    // -------------------------------------------------------------------------

    /// Make the committed state visible: local watchers, open links, autosave.
    async fn publish(&mut self) {
        let state = self.store.state();
        self.state_tx.send_replace(Arc::new(state.clone()));
        emit(
            &self.events,
            SessionEvent::StateChanged {
                revision: state.revision(),
            },
        );
        if let Some(transport) = self.link.transport() {
            let peers = self.connections.open_peers();
            if let Err(e) = self
                .broadcaster
                .broadcast(state, transport.as_ref(), &peers)
                .await
            {
                tracing::error!(error = %e, "Could not encode snapshot");
            }
        }
        self.autosave().await;
    }

    async fn autosave(&self) {
        if !self.config.autosave {
            return;
        }
        let Some(vault) = &self.vault else {
            return;
        };
        if let Err(e) = vault.save(&self.context.code, self.store.state()).await {
            tracing::warn!(code = %self.context.code, error = %e, "Autosave failed");
            self.notice(&e);
        }
    }

    async fn send_heartbeats(&mut self) {
        let Some(transport) = self.link.transport().cloned() else {
            return;
        };
        let frame = match WireMessage::Heartbeat.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Could not encode heartbeat");
                return;
            }
        };
        let now = self.clock.now();
        for peer in self.connections.open_peers() {
            match transport.send(&peer, frame.clone()).await {
                Ok(()) => self.connections.record_heartbeat(&peer, now),
                Err(e) => tracing::debug!(peer = %peer, error = %e, "Heartbeat not sent"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Transport events
    // -------------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let report = self.link.on_event(&event).await;
        self.after_link(report);

        match event {
            TransportEvent::ConnectionOpened(peer) => self.guest_joined(peer).await,
            TransportEvent::ConnectionClosed(peer) => {
                if let Some(info) = self.connections.close(&peer) {
                    tracing::info!(peer = %peer, name = ?info.display_name, "Guest link closed");
                    emit(&self.events, SessionEvent::PeerLeft(peer));
                }
            }
            TransportEvent::Received { peer, frame } => self.handle_frame(peer, &frame).await,
            TransportEvent::SignalingError(kind) => emit(
                &self.events,
                SessionEvent::Notice {
                    class: kind.class(),
                    message: format!("Signaling error: {:?}", kind),
                },
            ),
            TransportEvent::SignalingOpened(_) | TransportEvent::SignalingDisconnected => {}
        }
    }

    /// Every new link gets the current state at once.
    async fn guest_joined(&mut self, peer: PeerId) {
        if !self.connections.register_open(peer.clone()) {
            return;
        }
        tracing::info!(peer = %peer, "Guest link opened");
        emit(&self.events, SessionEvent::PeerJoined(peer.clone()));

        let Some(transport) = self.link.transport() else {
            return;
        };
        match self.broadcaster.welcome(self.store.state()) {
            Ok(frame) => {
                if let Err(e) = transport.send(&peer, frame).await {
                    tracing::warn!(peer = %peer, error = %e, "Welcome snapshot not sent");
                }
            }
            Err(e) => tracing::error!(error = %e, "Could not encode snapshot"),
        }
    }

    async fn handle_frame(&mut self, peer: PeerId, frame: &str) {
        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Dropping undecodable frame");
                return;
            }
        };
        match message {
            WireMessage::JoinRequest { name } => match DisplayName::new(name) {
                Ok(name) => {
                    if self
                        .connections
                        .set_display_name(&peer, name.clone())
                        .is_ok()
                    {
                        emit(&self.events, SessionEvent::PeerNamed { peer, name });
                    }
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "Ignoring join request"),
            },
            WireMessage::ActionRequest(action) => self.handle_guest_action(peer, action).await,
            WireMessage::StateUpdate { .. } => {
                tracing::warn!(peer = %peer, "Ignoring snapshot sent by a guest")
            }
            WireMessage::Heartbeat | WireMessage::Unknown => {}
        }
    }

    /// Refusals are silent towards the guest: its replica simply never sees
    /// the change.
    async fn handle_guest_action(&mut self, peer: PeerId, action: GuestAction) {
        let Some(Actor::Guest(name)) = self.connections.actor_for(&peer) else {
            tracing::debug!(peer = %peer, "Refusing request from a peer without a name");
            return;
        };
        let action_name = action.name();
        match apply_guest_action(&mut self.store, &name, action) {
            Ok(committed) => {
                tracing::debug!(guest = %name, action = action_name, outcome = ?committed.value, "Guest request applied");
                if committed.changed {
                    self.publish().await;
                }
            }
            Err(e) => {
                tracing::debug!(guest = %name, action = action_name, error = %e, "Guest request refused")
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn after_link(&mut self, report: LinkReport) {
        if report.transport_reset {
            for peer in self.connections.open_peers() {
                emit(&self.events, SessionEvent::PeerLeft(peer));
            }
            self.connections.clear();
        }
        let state = self.link.state();
        if *self.connectivity_tx.borrow() != state {
            self.connectivity_tx.send_replace(state);
            emit(&self.events, SessionEvent::Connectivity(state));
        }
    }

    fn notice(&self, error: &SessionError) {
        emit(
            &self.events,
            SessionEvent::Notice {
                class: error.class().unwrap_or(ErrorClass::Transient),
                message: error.to_string(),
            },
        );
    }
}

async fn resume(
    context: &SessionContext,
    vault: Option<&SnapshotVault>,
    deps: &RuntimeDeps,
) -> SessionStore {
    let clock = Arc::clone(&deps.clock);
    let Some(vault) = vault.filter(|_| deps.config.autosave) else {
        return SessionStore::new(clock);
    };
    match vault.load(&context.code).await {
        Ok(Some(saved)) => {
            tracing::info!(code = %context.code, revision = %saved.revision(), "Resuming saved session");
            SessionStore::from_snapshot(saved, clock)
        }
        Ok(None) => SessionStore::new(clock),
        Err(e) => {
            tracing::warn!(code = %context.code, error = %e, "Saved session unreadable, starting fresh");
            SessionStore::new(clock)
        }
    }
}
