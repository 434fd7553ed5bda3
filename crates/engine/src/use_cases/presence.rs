//! Connectivity state machine.
//!
//! Pure: the runtime feeds it `PresenceSignal`s and carries out the
//! `PresenceCommand`s it returns. Timers and transports live in the runtime,
//! so every transition here is testable without either.
//!
//! ```text
//! disconnected -> connecting -> connected <-> reconnecting -> disconnected
//! ```

use std::time::Duration;

use serde::Serialize;

use crate::infrastructure::ports::ErrorClass;
use crate::infrastructure::settings::RetryPolicy;

use super::context::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceSignal {
    Start,
    SignalingOpened,
    /// Guest only: the data link to the host opened
    HostLinkOpened,
    /// Guest only: the data link to the host closed
    HostLinkClosed,
    SignalingDisconnected,
    TransportFailed(ErrorClass),
    RetryElapsed,
    Shutdown,
}

/// What a scheduled retry does when its timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-register the current transport with signaling
    Reattach,
    /// Dial the host again over the current transport
    Redial,
    /// Replace the transport with a fresh one and open it
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceCommand {
    OpenSignaling,
    DialHost,
    ReattachSignaling,
    /// Destroy the current transport and create a new one
    RebuildTransport,
    /// Destroy the current transport now; a rebuild follows later
    DiscardTransport,
    ScheduleRetry { delay: Duration, action: RetryAction },
    CancelRetry,
    /// Cancel everything and destroy the transport for good
    Teardown,
}

/// Exponential backoff over consecutive failed attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagedBackoff {
    attempts: u32,
}

impl StagedBackoff {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, advancing the stage.
    pub fn next_delay_and_advance(&mut self, base: Duration, policy: &RetryPolicy) -> Duration {
        let factor = policy.multiplier.powi(self.attempts.min(64) as i32);
        let delay = base.as_secs_f64() * factor;
        self.attempts = self.attempts.saturating_add(1);
        Duration::from_secs_f64(delay.min(policy.max_delay.as_secs_f64()))
    }
}

pub struct PresenceMonitor {
    role: Role,
    policy: RetryPolicy,
    state: ConnectivityState,
    backoff: StagedBackoff,
    retry_pending: Option<RetryAction>,
    host_link_open: bool,
    shut_down: bool,
}

impl PresenceMonitor {
    pub fn new(role: Role, policy: RetryPolicy) -> Self {
        Self {
            role,
            policy,
            state: ConnectivityState::Disconnected,
            backoff: StagedBackoff::default(),
            retry_pending: None,
            host_link_open: false,
            shut_down: false,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn retry_pending(&self) -> Option<RetryAction> {
        self.retry_pending
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn handle(&mut self, signal: PresenceSignal) -> Vec<PresenceCommand> {
        if self.shut_down {
            return Vec::new();
        }
        let mut commands = Vec::new();
        match signal {
            PresenceSignal::Start => {
                if self.state == ConnectivityState::Disconnected {
                    self.state = ConnectivityState::Connecting;
                    commands.push(PresenceCommand::OpenSignaling);
                }
            }
            PresenceSignal::SignalingOpened => match self.role {
                Role::Host => self.connected(&mut commands),
                Role::Guest if self.host_link_open => self.connected(&mut commands),
                Role::Guest => {
                    self.state = ConnectivityState::Connecting;
                    commands.push(PresenceCommand::DialHost);
                }
            },
            PresenceSignal::HostLinkOpened => {
                self.host_link_open = true;
                self.connected(&mut commands);
            }
            PresenceSignal::HostLinkClosed => {
                self.host_link_open = false;
                self.state = ConnectivityState::Reconnecting;
                self.schedule(ErrorClass::Transient, RetryAction::Redial, &mut commands);
            }
            PresenceSignal::SignalingDisconnected => {
                self.state = ConnectivityState::Reconnecting;
                self.schedule(ErrorClass::Transient, RetryAction::Reattach, &mut commands);
            }
            PresenceSignal::TransportFailed(class) => self.failed(class, &mut commands),
            PresenceSignal::RetryElapsed => {
                if let Some(action) = self.retry_pending.take() {
                    self.state = ConnectivityState::Connecting;
                    match action {
                        RetryAction::Reattach => commands.push(PresenceCommand::ReattachSignaling),
                        RetryAction::Redial => commands.push(PresenceCommand::DialHost),
                        RetryAction::Rebuild => {
                            self.host_link_open = false;
                            commands.push(PresenceCommand::RebuildTransport);
                            commands.push(PresenceCommand::OpenSignaling);
                        }
                    }
                }
            }
            PresenceSignal::Shutdown => {
                if self.retry_pending.take().is_some() {
                    commands.push(PresenceCommand::CancelRetry);
                }
                commands.push(PresenceCommand::Teardown);
                self.state = ConnectivityState::Disconnected;
                self.host_link_open = false;
                self.shut_down = true;
            }
        }
        if !commands.is_empty() {
            tracing::debug!(?signal, state = ?self.state, ?commands, "Presence transition");
        }
        commands
    }

    fn connected(&mut self, commands: &mut Vec<PresenceCommand>) {
        if self.retry_pending.take().is_some() {
            commands.push(PresenceCommand::CancelRetry);
        }
        if self.state != ConnectivityState::Connected {
            tracing::info!(role = ?self.role, "Connected");
        }
        self.state = ConnectivityState::Connected;
        self.backoff.reset();
    }

    fn failed(&mut self, class: ErrorClass, commands: &mut Vec<PresenceCommand>) {
        let action = match class {
            ErrorClass::FatalSignaling | ErrorClass::IdentityCollision => {
                self.host_link_open = false;
                commands.push(PresenceCommand::DiscardTransport);
                RetryAction::Rebuild
            }
            ErrorClass::PeerNotFound => RetryAction::Redial,
            ErrorClass::Transient => RetryAction::Rebuild,
            // Not connectivity failures
            ErrorClass::MalformedData | ErrorClass::ExternalService => return,
        };
        self.state = ConnectivityState::Reconnecting;
        self.schedule(class, action, commands);
    }

    fn schedule(&mut self, class: ErrorClass, action: RetryAction, commands: &mut Vec<PresenceCommand>) {
        if self.retry_pending.is_some() {
            commands.push(PresenceCommand::CancelRetry);
        }
        let delay = self
            .backoff
            .next_delay_and_advance(self.policy.base_delay(class), &self.policy);
        self.retry_pending = Some(action);
        commands.push(PresenceCommand::ScheduleRetry { delay, action });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PresenceCommand as C;
    use PresenceSignal as S;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn host() -> PresenceMonitor {
        PresenceMonitor::new(Role::Host, RetryPolicy::default())
    }

    fn guest() -> PresenceMonitor {
        PresenceMonitor::new(Role::Guest, RetryPolicy::default())
    }

    #[test]
    fn host_connects_once_signaling_opens() {
        let mut m = host();
        assert_eq!(m.handle(S::Start), vec![C::OpenSignaling]);
        assert_eq!(m.state(), ConnectivityState::Connecting);
        assert!(m.handle(S::SignalingOpened).is_empty());
        assert_eq!(m.state(), ConnectivityState::Connected);
    }

    #[test]
    fn guest_connects_only_when_the_host_link_opens() {
        let mut m = guest();
        m.handle(S::Start);
        assert_eq!(m.handle(S::SignalingOpened), vec![C::DialHost]);
        assert_eq!(m.state(), ConnectivityState::Connecting);
        m.handle(S::HostLinkOpened);
        assert_eq!(m.state(), ConnectivityState::Connected);
    }

    #[test]
    fn signaling_loss_reattaches_after_the_transient_delay() {
        let mut m = host();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);

        assert_eq!(
            m.handle(S::SignalingDisconnected),
            vec![C::ScheduleRetry {
                delay: secs(5.0),
                action: RetryAction::Reattach
            }]
        );
        assert_eq!(m.state(), ConnectivityState::Reconnecting);
        assert_eq!(m.handle(S::RetryElapsed), vec![C::ReattachSignaling]);
        assert_eq!(m.state(), ConnectivityState::Connecting);
        m.handle(S::SignalingOpened);
        assert_eq!(m.state(), ConnectivityState::Connected);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn fatal_signaling_discards_then_rebuilds_with_growing_delay() {
        let mut m = host();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);
        m.handle(S::SignalingDisconnected);
        m.handle(S::RetryElapsed);

        assert_eq!(
            m.handle(S::TransportFailed(ErrorClass::FatalSignaling)),
            vec![
                C::DiscardTransport,
                C::ScheduleRetry {
                    delay: secs(15.0),
                    action: RetryAction::Rebuild
                }
            ]
        );
        assert_eq!(
            m.handle(S::RetryElapsed),
            vec![C::RebuildTransport, C::OpenSignaling]
        );
    }

    #[test]
    fn identity_collision_waits_longest() {
        let mut m = host();
        m.handle(S::Start);
        let commands = m.handle(S::TransportFailed(ErrorClass::IdentityCollision));
        assert_eq!(
            commands.last(),
            Some(&C::ScheduleRetry {
                delay: secs(15.0),
                action: RetryAction::Rebuild
            })
        );
    }

    #[test]
    fn missing_host_is_redialed() {
        let mut m = guest();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);
        assert_eq!(
            m.handle(S::TransportFailed(ErrorClass::PeerNotFound)),
            vec![C::ScheduleRetry {
                delay: secs(8.0),
                action: RetryAction::Redial
            }]
        );
        assert_eq!(m.handle(S::RetryElapsed), vec![C::DialHost]);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        let mut backoff = StagedBackoff::default();
        let delays: Vec<Duration> = (0..12)
            .map(|_| backoff.next_delay_and_advance(policy.fatal_signaling, &policy))
            .collect();
        assert_eq!(delays[0], secs(10.0));
        assert_eq!(delays[1], secs(15.0));
        assert_eq!(delays[2], secs(22.5));
        assert_eq!(*delays.last().unwrap(), policy.max_delay);
    }

    #[test]
    fn a_pending_retry_is_cancelled_before_another_is_scheduled() {
        let mut m = guest();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);
        m.handle(S::HostLinkOpened);
        m.handle(S::SignalingDisconnected);

        let commands = m.handle(S::HostLinkClosed);
        assert_eq!(commands[0], C::CancelRetry);
        assert!(matches!(
            commands[1],
            C::ScheduleRetry {
                action: RetryAction::Redial,
                ..
            }
        ));
    }

    #[test]
    fn guest_with_a_live_link_reconnects_on_reattach() {
        let mut m = guest();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);
        m.handle(S::HostLinkOpened);
        m.handle(S::SignalingDisconnected);
        m.handle(S::RetryElapsed);
        assert!(m.handle(S::SignalingOpened).is_empty());
        assert_eq!(m.state(), ConnectivityState::Connected);
    }

    #[test]
    fn shutdown_is_terminal() {
        let mut m = host();
        m.handle(S::Start);
        m.handle(S::SignalingDisconnected);

        assert_eq!(m.handle(S::Shutdown), vec![C::CancelRetry, C::Teardown]);
        assert_eq!(m.state(), ConnectivityState::Disconnected);
        assert!(m.handle(S::RetryElapsed).is_empty());
        assert!(m.handle(S::Start).is_empty());
        assert!(m.is_shut_down());
    }

    #[test]
    fn non_connectivity_failures_change_nothing() {
        let mut m = host();
        m.handle(S::Start);
        m.handle(S::SignalingOpened);
        assert!(m
            .handle(S::TransportFailed(ErrorClass::ExternalService))
            .is_empty());
        assert_eq!(m.state(), ConnectivityState::Connected);
    }
}
