//! Saving, resuming, exporting and importing sessions.
//!
//! Every format is the plain snapshot JSON: autosave values, export files and
//! (compressed) portal links. Anything read back is validated before use.

use std::sync::Arc;

use url::Url;

use realmlink_domain::SessionState;
use realmlink_shared::{
    decode_snapshot, encode_snapshot, encode_snapshot_pretty, portal_from_link, portal_link,
    SessionCode,
};

use crate::infrastructure::ports::{KeyValueStorePort, SessionError};

pub const SAVE_KEY_PREFIX: &str = "realm:";

pub fn save_key(code: &SessionCode) -> String {
    format!("{}{}", SAVE_KEY_PREFIX, code)
}

/// Snapshots in a key-value store.
#[derive(Clone)]
pub struct SnapshotVault {
    store: Arc<dyn KeyValueStorePort>,
}

impl SnapshotVault {
    pub fn new(store: Arc<dyn KeyValueStorePort>) -> Self {
        Self { store }
    }

    pub async fn save(&self, code: &SessionCode, state: &SessionState) -> Result<(), SessionError> {
        let text = encode_snapshot(state)?;
        self.store.put(&save_key(code), text).await?;
        tracing::debug!(code = %code, revision = %state.revision(), "Session saved");
        Ok(())
    }

    /// The saved snapshot, if any. A value that does not decode is an error,
    /// not an absence.
    pub async fn load(&self, code: &SessionCode) -> Result<Option<SessionState>, SessionError> {
        let Some(text) = self.store.get(&save_key(code)).await? else {
            return Ok(None);
        };
        Ok(Some(decode_snapshot(&text)?))
    }

    pub async fn discard(&self, code: &SessionCode) -> Result<(), SessionError> {
        self.store.delete(&save_key(code)).await?;
        Ok(())
    }

    /// Codes of every saved session.
    pub async fn saved_sessions(&self) -> Result<Vec<SessionCode>, SessionError> {
        let keys = self.store.list_keys(SAVE_KEY_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(SAVE_KEY_PREFIX))
            .filter_map(|code| SessionCode::parse(code).ok())
            .collect())
    }
}

pub fn export_json(state: &SessionState) -> Result<String, SessionError> {
    Ok(encode_snapshot_pretty(state)?)
}

pub fn import_json(text: &str) -> Result<SessionState, SessionError> {
    Ok(decode_snapshot(text)?)
}

pub fn export_portal(base: &Url, state: &SessionState) -> Result<Url, SessionError> {
    Ok(portal_link(base, state)?)
}

/// The snapshot carried by a portal link; `None` when the link has none.
pub fn import_portal(link: &Url) -> Result<Option<SessionState>, SessionError> {
    portal_from_link(link)
        .transpose()
        .map_err(SessionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv_store::InMemoryKvStore;
    use crate::infrastructure::ports::{ErrorClass, MockKeyValueStorePort, StoreError};
    use chrono::Utc;
    use realmlink_domain::{EntityKind, GridPosition};

    fn code() -> SessionCode {
        SessionCode::parse("ab12cd").unwrap()
    }

    fn populated() -> SessionState {
        let mut state = SessionState::new(Utc::now());
        let room = state.active_room_id();
        state
            .add_token(room, EntityKind::PlayerSlot, Some(GridPosition::new(7, 7)))
            .unwrap();
        state
    }

    #[tokio::test]
    async fn saved_sessions_resume_unchanged() {
        let store = InMemoryKvStore::new();
        let vault = SnapshotVault::new(Arc::new(store.clone()));
        let state = populated();

        vault.save(&code(), &state).await.unwrap();

        assert!(store.get("realm:AB12CD").await.unwrap().is_some());
        assert_eq!(vault.load(&code()).await.unwrap(), Some(state));
        assert_eq!(vault.saved_sessions().await.unwrap(), vec![code()]);

        vault.discard(&code()).await.unwrap();
        assert_eq!(vault.load(&code()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_saves_are_malformed_data() {
        let mut store = MockKeyValueStorePort::new();
        store
            .expect_get()
            .returning(|_| Ok(Some("{\"rooms\": 7}".to_string())));
        let vault = SnapshotVault::new(Arc::new(store));

        let err = vault.load(&code()).await.unwrap_err();
        assert_eq!(err.class(), Some(ErrorClass::MalformedData));
    }

    #[tokio::test]
    async fn store_failures_surface() {
        let mut store = MockKeyValueStorePort::new();
        store
            .expect_put()
            .returning(|_, _| Err(StoreError::backend("put", "disk full")));
        let vault = SnapshotVault::new(Arc::new(store));

        assert!(matches!(
            vault.save(&code(), &populated()).await,
            Err(SessionError::Store(_))
        ));
    }

    #[test]
    fn export_then_import_keeps_everything() {
        let state = populated();
        let text = export_json(&state).unwrap();
        assert!(text.contains('\n'));
        assert_eq!(import_json(&text).unwrap(), state);
    }

    #[test]
    fn importing_garbage_fails() {
        assert!(import_json("not json").is_err());
    }

    #[test]
    fn portal_links_carry_the_snapshot() {
        let base = Url::parse("https://table.example/play").unwrap();
        let state = populated();
        let link = export_portal(&base, &state).unwrap();

        assert_eq!(import_portal(&link).unwrap(), Some(state));
        assert_eq!(import_portal(&base).unwrap(), None);
    }
}
