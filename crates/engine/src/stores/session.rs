//! Host-side owner of the canonical session state.

use std::sync::Arc;

use realmlink_domain::{DomainError, Revision, SessionState};

use crate::infrastructure::ports::ClockPort;

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    /// False when the mutation succeeded but left the content as it was.
    pub changed: bool,
}

/// The only mutable `SessionState` of a host.
///
/// Every mutation runs against a scratch copy and is committed only when it
/// succeeds. A committed change that altered the content gets a fresh revision;
/// a no-op keeps the old one so the broadcaster has nothing new to send.
pub struct SessionStore {
    state: SessionState,
    clock: Arc<dyn ClockPort>,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        let state = SessionState::new(clock.now());
        Self { state, clock }
    }

    /// Resume from a saved or imported snapshot.
    pub fn from_snapshot(state: SessionState, clock: Arc<dyn ClockPort>) -> Self {
        Self { state, clock }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn revision(&self) -> Revision {
        self.state.revision()
    }

    pub fn mutate<T>(
        &mut self,
        f: impl FnOnce(&mut SessionState) -> Result<T, DomainError>,
    ) -> Result<Committed<T>, DomainError> {
        let mut scratch = self.state.clone();
        let value = f(&mut scratch)?;
        let changed = scratch.content() != self.state.content();
        if changed {
            scratch.set_revision(self.next_revision());
            self.state = scratch;
        }
        Ok(Committed { value, changed })
    }

    /// Swap in a whole new state (import, portal). The incoming revision is
    /// discarded: the replacement is always newer than anything sent before.
    pub fn replace(&mut self, mut incoming: SessionState) -> Result<Revision, DomainError> {
        incoming.validate()?;
        let revision = self.next_revision();
        incoming.set_revision(revision);
        self.state = incoming;
        Ok(revision)
    }

    fn next_revision(&self) -> Revision {
        self.state.revision().next(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::ports::MockClockPort;
    use chrono::{Duration, TimeZone, Utc};
    use realmlink_domain::{EncounterStatus, EntityKind, GridPosition};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap()
    }

    #[test]
    fn content_changes_get_a_new_revision() {
        let mut clock = MockClockPort::new();
        let mut ticks = 0;
        clock.expect_now().returning(move || {
            ticks += 1;
            t0() + Duration::seconds(ticks)
        });
        let mut store = SessionStore::new(Arc::new(clock));
        let before = store.revision();

        let committed = store
            .mutate(|s| {
                s.set_status(EncounterStatus::Victory);
                Ok(())
            })
            .unwrap();

        assert!(committed.changed);
        assert!(store.revision() > before);
        assert_eq!(store.state().status(), EncounterStatus::Victory);
    }

    #[test]
    fn no_op_mutations_keep_the_revision() {
        let mut store = SessionStore::new(Arc::new(FixedClock(t0())));
        let before = store.revision();

        let committed = store
            .mutate(|s| {
                s.set_status(EncounterStatus::Active);
                Ok(())
            })
            .unwrap();

        assert!(!committed.changed);
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn failed_mutations_leave_nothing_behind() {
        let mut store = SessionStore::new(Arc::new(FixedClock(t0())));
        let room = store.state().active_room_id();
        let before = store.state().clone();

        let result = store.mutate(|s| {
            s.add_token(room, EntityKind::Enemy, Some(GridPosition::new(1, 1)))?;
            s.add_token(room, EntityKind::Enemy, Some(GridPosition::new(99, 99)))
        });

        assert!(result.is_err());
        assert_eq!(store.state(), &before);
    }

    #[test]
    fn a_stalled_clock_still_yields_increasing_revisions() {
        let mut store = SessionStore::new(Arc::new(FixedClock(t0())));
        let room = store.state().active_room_id();
        let mut last = store.revision();
        for x in 0..3 {
            store
                .mutate(|s| s.add_token(room, EntityKind::Npc, Some(GridPosition::new(x, 0))))
                .unwrap();
            assert!(store.revision() > last);
            last = store.revision();
        }
    }

    #[test]
    fn replace_restamps_the_incoming_state() {
        let mut store = SessionStore::new(Arc::new(FixedClock(t0())));
        let old = SessionState::new(t0() - Duration::days(30));

        let revision = store.replace(old).unwrap();

        assert!(revision > Revision::at(t0()));
        assert_eq!(store.revision(), revision);
    }
}
