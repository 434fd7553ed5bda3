//! Who this runtime is: role, session code and display name.

use serde::Serialize;

use realmlink_domain::DisplayName;
use realmlink_shared::{PeerId, SessionCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

/// Passed to a runtime at construction and replaced through its
/// `UpdateContext` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub role: Role,
    pub code: SessionCode,
    /// Required for guests; announced to the host on every (re)connect
    pub display_name: Option<DisplayName>,
}

impl SessionContext {
    pub fn host(code: SessionCode) -> Self {
        Self {
            role: Role::Host,
            code,
            display_name: None,
        }
    }

    pub fn guest(code: SessionCode, display_name: DisplayName) -> Self {
        Self {
            role: Role::Guest,
            code,
            display_name: Some(display_name),
        }
    }

    pub fn host_peer_id(&self) -> PeerId {
        self.code.host_peer_id()
    }

    /// Autosave key of this session.
    pub fn save_key(&self) -> String {
        super::persistence::save_key(&self.code)
    }
}
