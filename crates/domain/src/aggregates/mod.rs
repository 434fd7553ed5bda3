//! Aggregates - consistency boundaries for replicated state
//!
//! `SessionState` is the only aggregate. Its operations are split by concern:
//! rooms and entities in `session`, player slots in `claim`, key/lock pairs in
//! `links`, movement and party travel in `movement`, and guest edit
//! classification in `guest_request`.

mod claim;
mod guest_request;
mod links;
mod movement;
mod session;

pub use guest_request::GuestUpdate;
pub use movement::{MoveOutcome, TravelReport};
pub use session::{EncounterStatus, SessionContent, SessionState, FIRST_ROOM_NAME};
