//! Value objects - Immutable objects defined by their attributes

mod actor;
mod grid;
mod names;
mod revision;
mod stats;

pub use actor::Actor;
pub use grid::{GridDimensions, GridPosition, MAX_GRID_SIDE, SPAWN_SEARCH_RINGS};
pub use names::{DisplayName, RoomName};
pub use revision::Revision;
pub use stats::{ClaimStats, GeneratedStats};
