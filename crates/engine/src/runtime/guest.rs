//! The replica runtime.
//!
//! A guest keeps the newest snapshot the host has sent and nothing else. Every
//! gesture becomes an `ACTION_REQUEST`; whether it took effect shows up in a
//! later snapshot. Requests made while the host link is down are dropped.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Interval;

use realmlink_domain::{DisplayName, DomainError, SessionState};
use realmlink_shared::{GuestAction, PeerId, WireMessage};

use super::link::{self, Link, LinkReport};
use super::{emit, event_channel, heartbeat_ticker, RuntimeDeps, SessionEvent, COMMAND_CAPACITY};
use crate::api::{ConnectionInfo, ConnectionTable};
use crate::infrastructure::ports::{ErrorClass, SessionError, TransportEvent};
use crate::use_cases::{
    send_guest_action, ConnectivityState, Delivery, GuestIntent, PresenceSignal, Replica,
    ReplicaOutcome, Role, SessionContext,
};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum GuestCommand {
    Send {
        action: GuestAction,
        reply: oneshot::Sender<Delivery>,
    },
    Intent {
        intent: GuestIntent,
        reply: Reply<Delivery>,
    },
    HostLink {
        reply: oneshot::Sender<Option<ConnectionInfo>>,
    },
    UpdateContext {
        context: SessionContext,
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front of a running guest.
#[derive(Clone)]
pub struct GuestHandle {
    commands: mpsc::Sender<GuestCommand>,
    state: watch::Receiver<Option<Arc<SessionState>>>,
    connectivity: watch::Receiver<ConnectivityState>,
    events: broadcast::Sender<SessionEvent>,
}

impl GuestHandle {
    /// Send a raw request to the host.
    pub async fn send_action(&self, action: GuestAction) -> Result<Delivery, SessionError> {
        self.request(|reply| GuestCommand::Send { action, reply })
            .await
    }

    /// Turn a gesture into a request against the current replica and send it.
    /// Fails locally if the replica does not know the target entity.
    pub async fn act(&self, intent: GuestIntent) -> Result<Delivery, SessionError> {
        self.request(|reply| GuestCommand::Intent { intent, reply })
            .await?
    }

    /// The link to the host, if one is open or being dialed.
    pub async fn host_link(&self) -> Result<Option<ConnectionInfo>, SessionError> {
        self.request(|reply| GuestCommand::HostLink { reply }).await
    }

    /// Swap the session context. A new display name is announced at once; a
    /// new session code drops the replica and dials the new host.
    pub async fn update_context(&self, context: SessionContext) -> Result<(), SessionError> {
        self.request(|reply| GuestCommand::UpdateContext { context, reply })
            .await?
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| GuestCommand::Shutdown { reply }).await
    }

    /// Latest applied snapshot; `None` before the first one arrives.
    pub fn state(&self) -> Option<Arc<SessionState>> {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<Option<Arc<SessionState>>> {
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
        command: impl FnOnce(oneshot::Sender<T>) -> GuestCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::RuntimeStopped)?;
        response.await.map_err(|_| SessionError::RuntimeStopped)
    }
}

pub struct GuestRuntime {
    context: SessionContext,
    name: DisplayName,
    replica: Replica,
    connections: ConnectionTable,
    link: Link,
    commands: mpsc::Receiver<GuestCommand>,
    state_tx: watch::Sender<Option<Arc<SessionState>>>,
    connectivity_tx: watch::Sender<ConnectivityState>,
    events: broadcast::Sender<SessionEvent>,
    heartbeat: Interval,
}

impl GuestRuntime {
    /// Start dialing the host of `context.code`. The context must be a guest
    /// context with a display name.
    pub fn start(context: SessionContext, deps: RuntimeDeps) -> Result<GuestHandle, SessionError> {
        let name = guest_name(&context)?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(None);
        let (connectivity_tx, connectivity) = watch::channel(ConnectivityState::Disconnected);
        let events = event_channel();

        let runtime = Self {
            link: Link::new(&context, deps.transports, deps.config.retry.clone()),
            heartbeat: heartbeat_ticker(deps.config.heartbeat_interval),
            context,
            name,
            replica: Replica::new(),
            connections: ConnectionTable::new(),
            commands,
            state_tx,
            connectivity_tx,
            events: events.clone(),
        };
        tokio::spawn(runtime.run());

        Ok(GuestHandle {
            commands: commands_tx,
            state,
            connectivity,
            events,
        })
    }

    async fn run(mut self) {
        tracing::info!(code = %self.context.code, name = %self.name, "Guest runtime started");
        let report = self.link.signal(PresenceSignal::Start).await;
        self.after_link(report);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All guest handles dropped");
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
                _ = self.heartbeat.tick() => self.send_heartbeat().await,
            }
        }
        tracing::info!(code = %self.context.code, name = %self.name, "Guest runtime stopped");
    }

    async fn handle_command(&mut self, command: GuestCommand) -> ControlFlow<()> {
        match command {
            GuestCommand::Send { action, reply } => {
                let delivery = self.send(action).await;
                let _ = reply.send(delivery);
            }
            GuestCommand::Intent { intent, reply } => {
                let result = match self.replica.state() {
                    Some(replica) => match intent.into_action(replica, &self.name) {
                        Ok(action) => Ok(self.send(action).await),
                        Err(e) => Err(e.into()),
                    },
                    None => {
                        tracing::debug!("No snapshot yet, dropping request");
                        Ok(Delivery::Dropped)
                    }
                };
                let _ = reply.send(result);
            }
            GuestCommand::HostLink { reply } => {
                let _ = reply.send(self.connections.get(self.link.host_id()).cloned());
            }
            GuestCommand::UpdateContext { context, reply } => {
                let result = self.update_context(context).await;
                let _ = reply.send(result);
            }
            GuestCommand::Shutdown { reply } => {
                self.stop().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn send(&self, action: GuestAction) -> Delivery {
        let Some(transport) = self.link.transport() else {
            tracing::debug!(action = action.name(), "No transport, dropping request");
            return Delivery::Dropped;
        };
        let host = self.link.host_id();
        let linked = self.connections.is_open(host).then_some(host);
        send_guest_action(transport.as_ref(), linked, action).await
    }

    async fn update_context(&mut self, context: SessionContext) -> Result<(), SessionError> {
        let name = guest_name(&context)?;
        let code_changed = context.code != self.context.code;
        let name_changed = name != self.name;
        self.context = context;
        self.name = name;

        if code_changed {
            tracing::info!(code = %self.context.code, "Switching session");
            self.replica = Replica::new();
            self.state_tx.send_replace(None);
            let report = self.link.restart(&self.context).await;
            self.after_link(report);
        } else if name_changed {
            tracing::info!(name = %self.name, "Display name changed");
            self.announce().await;
        }
        Ok(())
    }

    async fn stop(&mut self) {
        let report = self.link.signal(PresenceSignal::Shutdown).await;
        self.after_link(report);
    }

    /// Tell the host who is on the other end of this link.
    async fn announce(&self) {
        let host = self.link.host_id();
        if !self.connections.is_open(host) {
            return;
        }
        let Some(transport) = self.link.transport() else {
            return;
        };
        let join = WireMessage::JoinRequest {
            name: self.name.as_str().to_string(),
        };
        let result = match join.encode() {
            Ok(frame) => transport.send(host, frame).await.map_err(SessionError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Join request not sent");
        }
    }

    async fn send_heartbeat(&self) {
        let host = self.link.host_id();
        let (Some(transport), true) = (self.link.transport(), self.connections.is_open(host))
        else {
            return;
        };
        match WireMessage::Heartbeat.encode() {
            Ok(frame) => {
                if let Err(e) = transport.send(host, frame).await {
                    tracing::debug!(error = %e, "Heartbeat not sent");
                }
            }
            Err(e) => tracing::error!(error = %e, "Could not encode heartbeat"),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let report = self.link.on_event(&event).await;
        self.after_link(report);
        let host = self.link.host_id().clone();

        match event {
            TransportEvent::ConnectionOpened(peer) if peer == host => {
                self.connections.register_open(peer.clone());
                tracing::info!(host = %peer, "Host link opened");
                emit(&self.events, SessionEvent::PeerJoined(peer));
                self.announce().await;
            }
            TransportEvent::ConnectionOpened(peer) => {
                tracing::debug!(peer = %peer, "Closing link from a peer that is not the host");
                if let Some(transport) = self.link.transport() {
                    transport.close(&peer).await;
                }
            }
            TransportEvent::ConnectionClosed(peer) => {
                let was_open = self.connections.is_open(&peer);
                if self.connections.close(&peer).is_some() && was_open {
                    tracing::info!(host = %peer, "Host link closed");
                    emit(&self.events, SessionEvent::PeerLeft(peer));
                }
            }
            TransportEvent::Received { peer, frame } if peer == host => self.handle_frame(&frame),
            TransportEvent::Received { peer, .. } => {
                tracing::debug!(peer = %peer, "Ignoring frame from a peer that is not the host")
            }
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

    fn handle_frame(&mut self, frame: &str) {
        let message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };
        match message {
            WireMessage::StateUpdate { data } => match self.replica.apply(data) {
                ReplicaOutcome::Applied(revision) => {
                    tracing::debug!(%revision, "Snapshot applied");
                    let state = self.replica.state().cloned().map(Arc::new);
                    self.state_tx.send_replace(state);
                    emit(&self.events, SessionEvent::StateChanged { revision });
                }
                ReplicaOutcome::Stale { .. } => {}
                ReplicaOutcome::Rejected(e) => emit(
                    &self.events,
                    SessionEvent::Notice {
                        class: ErrorClass::MalformedData,
                        message: e.to_string(),
                    },
                ),
            },
            WireMessage::ActionRequest(_) | WireMessage::JoinRequest { .. } => {
                tracing::warn!("Ignoring guest message sent by the host")
            }
            WireMessage::Heartbeat | WireMessage::Unknown => {}
        }
    }

    fn after_link(&mut self, report: LinkReport) {
        let host = self.link.host_id().clone();
        if report.transport_reset {
            if self.connections.is_open(&host) {
                emit(&self.events, SessionEvent::PeerLeft(host.clone()));
            }
            self.connections.clear();
        }
        let state = self.link.state();
        if state == ConnectivityState::Connecting
            && self.link.local_id().is_some()
            && !self.connections.is_open(&host)
        {
            self.connections.mark_connecting(host);
        }
        if *self.connectivity_tx.borrow() != state {
            self.connectivity_tx.send_replace(state);
            emit(&self.events, SessionEvent::Connectivity(state));
        }
    }
}

fn guest_name(context: &SessionContext) -> Result<DisplayName, SessionError> {
    if context.role != Role::Guest {
        return Err(DomainError::validation("A guest runtime needs a guest context").into());
    }
    context
        .display_name
        .clone()
        .ok_or_else(|| DomainError::validation("Guests need a display name").into())
}
