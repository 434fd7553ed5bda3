//! Host and guest runtimes.
//!
//! Each runtime is one tokio task that owns all of its mutable state and
//! selects over commands from its handle, events of the current transport,
//! the heartbeat ticker and the pending retry. Callers talk to it through a
//! cloneable handle; state and connectivity are published on watch channels
//! and everything else on a broadcast channel of `SessionEvent`s.

mod guest;
mod host;
mod link;

pub use guest::{GuestHandle, GuestRuntime};
pub use host::{HostHandle, HostRuntime};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use realmlink_domain::{DisplayName, Revision};
use realmlink_shared::PeerId;

use crate::infrastructure::ports::{
    ClockPort, ErrorClass, KeyValueStorePort, StatGeneratorPort, TransportFactory,
};
use crate::infrastructure::settings::EngineConfig;
use crate::use_cases::ConnectivityState;

/// Capacity of a runtime's event channel. Slow subscribers lag, they never
/// block the runtime.
const EVENT_CAPACITY: usize = 256;

/// Capacity of a runtime's command channel.
const COMMAND_CAPACITY: usize = 64;

/// Something a runtime wants its embedder to know.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A new state is visible: committed on a host, applied on a guest
    StateChanged { revision: Revision },
    Connectivity(ConnectivityState),
    PeerJoined(PeerId),
    PeerNamed { peer: PeerId, name: DisplayName },
    PeerLeft(PeerId),
    /// A failure worth showing the user
    Notice { class: ErrorClass, message: String },
}

/// Collaborators shared by both runtimes.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub config: EngineConfig,
    pub transports: Arc<dyn TransportFactory>,
    pub clock: Arc<dyn ClockPort>,
    /// Autosave target; without one nothing is saved or resumed
    pub store: Option<Arc<dyn KeyValueStorePort>>,
    /// Monster summoning is unavailable without one
    pub stat_generator: Option<Arc<dyn StatGeneratorPort>>,
}

impl RuntimeDeps {
    pub fn new(
        config: EngineConfig,
        transports: Arc<dyn TransportFactory>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            config,
            transports,
            clock,
            store: None,
            stat_generator: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn KeyValueStorePort>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_stat_generator(mut self, generator: Arc<dyn StatGeneratorPort>) -> Self {
        self.stat_generator = Some(generator);
        self
    }
}

/// Ticker whose first tick is one full period away.
fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn event_channel() -> broadcast::Sender<SessionEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

/// Publishes to subscribers; having none is fine.
fn emit(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let _ = events.send(event);
}
