//! Transport lifecycle driven by the presence monitor.
//!
//! `Link` owns the current transport, its event receiver and the retry timer.
//! Runtimes feed it presence signals; it executes the resulting commands and
//! turns synchronous transport failures back into signals until the monitor
//! has nothing left to do.

use std::collections::VecDeque;
use std::future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Sleep;

use realmlink_shared::PeerId;

use crate::infrastructure::ports::{TransportError, TransportEvent, TransportFactory, TransportPort};
use crate::infrastructure::settings::RetryPolicy;
use crate::use_cases::{
    ConnectivityState, PresenceCommand, PresenceMonitor, PresenceSignal, Role, SessionContext,
};

/// What a round of presence commands did that the runtime must react to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkReport {
    /// The transport was destroyed; every link it carried is gone.
    pub transport_reset: bool,
}

impl LinkReport {
    fn merge(&mut self, other: LinkReport) {
        self.transport_reset |= other.transport_reset;
    }
}

pub(crate) struct Link {
    role: Role,
    host_id: PeerId,
    policy: RetryPolicy,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Arc<dyn TransportPort>>,
    local_id: Option<PeerId>,
    pub(crate) events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pub(crate) retry: Option<Pin<Box<Sleep>>>,
    monitor: PresenceMonitor,
}

impl Link {
    pub(crate) fn new(
        context: &SessionContext,
        factory: Arc<dyn TransportFactory>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            role: context.role,
            host_id: context.host_peer_id(),
            monitor: PresenceMonitor::new(context.role, policy.clone()),
            policy,
            factory,
            transport: None,
            local_id: None,
            events: None,
            retry: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectivityState {
        self.monitor.state()
    }

    pub(crate) fn host_id(&self) -> &PeerId {
        &self.host_id
    }

    pub(crate) fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub(crate) fn transport(&self) -> Option<&Arc<dyn TransportPort>> {
        self.transport.as_ref()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.monitor.is_shut_down()
    }

    pub(crate) async fn signal(&mut self, signal: PresenceSignal) -> LinkReport {
        let commands = self.monitor.handle(signal);
        self.run(commands).await
    }

    /// Route a transport's signaling events into the monitor. Data events are
    /// the runtime's business and are ignored here.
    pub(crate) async fn on_event(&mut self, event: &TransportEvent) -> LinkReport {
        match event {
            TransportEvent::SignalingOpened(id) => {
                self.local_id = Some(id.clone());
                self.signal(PresenceSignal::SignalingOpened).await
            }
            TransportEvent::SignalingDisconnected => {
                self.signal(PresenceSignal::SignalingDisconnected).await
            }
            TransportEvent::SignalingError(kind) => {
                self.signal(PresenceSignal::TransportFailed(kind.class())).await
            }
            TransportEvent::ConnectionOpened(peer)
                if self.role == Role::Guest && *peer == self.host_id =>
            {
                self.signal(PresenceSignal::HostLinkOpened).await
            }
            TransportEvent::ConnectionClosed(peer)
                if self.role == Role::Guest && *peer == self.host_id =>
            {
                self.signal(PresenceSignal::HostLinkClosed).await
            }
            _ => LinkReport::default(),
        }
    }

    /// Start over under a new session context.
    pub(crate) async fn restart(&mut self, context: &SessionContext) -> LinkReport {
        self.retry = None;
        let mut report = LinkReport::default();
        if self.destroy_transport().await {
            report.transport_reset = true;
        }
        self.role = context.role;
        self.host_id = context.host_peer_id();
        self.monitor = PresenceMonitor::new(context.role, self.policy.clone());
        report.merge(self.signal(PresenceSignal::Start).await);
        report
    }

    async fn run(&mut self, commands: Vec<PresenceCommand>) -> LinkReport {
        let mut report = LinkReport::default();
        let mut queue: VecDeque<PresenceCommand> = commands.into();
        while let Some(command) = queue.pop_front() {
            let result = match command {
                PresenceCommand::OpenSignaling => self.open().await,
                PresenceCommand::DialHost => self.dial().await,
                PresenceCommand::ReattachSignaling => match &self.transport {
                    Some(transport) => transport.reattach().await,
                    None => Err(TransportError::NotOpen),
                },
                PresenceCommand::RebuildTransport => {
                    report.transport_reset |= self.destroy_transport().await;
                    self.create_transport();
                    Ok(())
                }
                PresenceCommand::DiscardTransport => {
                    report.transport_reset |= self.destroy_transport().await;
                    Ok(())
                }
                PresenceCommand::ScheduleRetry { delay, action } => {
                    tracing::info!(?action, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                    self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                    Ok(())
                }
                PresenceCommand::CancelRetry => {
                    self.retry = None;
                    Ok(())
                }
                PresenceCommand::Teardown => {
                    self.retry = None;
                    report.transport_reset |= self.destroy_transport().await;
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!(?command, error = %e, "Transport call failed");
                queue.extend(
                    self.monitor
                        .handle(PresenceSignal::TransportFailed(e.class())),
                );
            }
        }
        report
    }

    fn create_transport(&mut self) {
        let (transport, events) = self.factory.create();
        self.transport = Some(transport);
        self.events = Some(events);
        self.local_id = None;
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.transport.is_none() {
            self.create_transport();
        }
        let Some(transport) = self.transport.clone() else {
            return Err(TransportError::NotOpen);
        };
        let requested = match self.role {
            Role::Host => Some(self.host_id.clone()),
            Role::Guest => None,
        };
        let id = transport.open(requested).await?;
        tracing::info!(peer = %id, role = ?self.role, "Signaling registered");
        self.local_id = Some(id);
        Ok(())
    }

    async fn dial(&mut self) -> Result<(), TransportError> {
        let Some(transport) = self.transport.clone() else {
            return Err(TransportError::NotOpen);
        };
        tracing::debug!(host = %self.host_id, "Dialing host");
        transport.connect(&self.host_id).await
    }

    /// Returns true if there was a transport to destroy.
    async fn destroy_transport(&mut self) -> bool {
        self.events = None;
        self.local_id = None;
        match self.transport.take() {
            Some(transport) => {
                transport.destroy().await;
                true
            }
            None => false,
        }
    }
}

/// Next event of the current transport; pending forever without one.
pub(crate) async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

/// Completes when the scheduled retry is due; pending forever without one.
pub(crate) async fn retry_due(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
