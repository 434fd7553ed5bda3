//! Use cases - the replication engine's moving parts.
//!
//! Each module is runtime-agnostic: the host and guest runtimes own the state
//! and call into these.

pub mod actions;
pub mod context;
pub mod monster;
pub mod persistence;
pub mod presence;
pub mod replication;

pub use actions::{
    apply_guest_action, send_guest_action, Delivery, EditOutcome, GuestActionOutcome, GuestIntent,
    HostEdit,
};
pub use context::{Role, SessionContext};
pub use monster::{generate_stats, place_monster};
pub use persistence::{
    export_json, export_portal, import_json, import_portal, save_key, SnapshotVault,
};
pub use presence::{
    ConnectivityState, PresenceCommand, PresenceMonitor, PresenceSignal, RetryAction,
    StagedBackoff,
};
pub use replication::{Broadcaster, Replica, ReplicaOutcome};
