//! Session codes, peer ids and magic session links.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProtocolError;

pub const SESSION_CODE_LEN: usize = 6;
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Prefix of the identity a host listens on.
pub const HOST_PEER_PREFIX: &str = "SESSION-";

/// Query parameter of a magic session link.
pub const SESSION_QUERY_PARAM: &str = "session";

// ============================================================================
// SessionCode
// ============================================================================

/// Six characters from `A-Z0-9`. Input is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Parse user input: trimmed, uppercased, then checked.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != SESSION_CODE_LEN {
            return Err(ProtocolError::invalid_session_code(format!(
                "expected {} characters, got {}",
                SESSION_CODE_LEN,
                code.chars().count()
            )));
        }
        if let Some(bad) = code.bytes().find(|b| !SESSION_CODE_ALPHABET.contains(b)) {
            return Err(ProtocolError::invalid_session_code(format!(
                "character '{}' is not allowed",
                char::from(bad)
            )));
        }
        Ok(Self(code))
    }

    /// Build a fresh code. `pick(n)` must return an index in `0..n`; the
    /// engine backs it with its random port.
    pub fn generate(mut pick: impl FnMut(usize) -> usize) -> Self {
        let n = SESSION_CODE_ALPHABET.len();
        let code = (0..SESSION_CODE_LEN)
            .map(|_| char::from(SESSION_CODE_ALPHABET[pick(n) % n]))
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity the host of this session listens on.
    pub fn host_peer_id(&self) -> PeerId {
        PeerId(format!("{}{}", HOST_PEER_PREFIX, self.0))
    }

    /// `base` with `?session=<CODE>` set, other query pairs kept.
    pub fn session_link(&self, base: &Url) -> Url {
        let mut link = base.clone();
        let kept: Vec<(String, String)> = base
            .query_pairs()
            .filter(|(k, _)| k != SESSION_QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut query = link.query_pairs_mut();
            query.clear();
            for (k, v) in &kept {
                query.append_pair(k, v);
            }
            query.append_pair(SESSION_QUERY_PARAM, &self.0);
        }
        link
    }

    /// Code carried by a magic link, if it has a valid one.
    pub fn from_link(link: &Url) -> Option<Self> {
        link.query_pairs()
            .find(|(k, _)| k == SESSION_QUERY_PARAM)
            .and_then(|(_, v)| Self::parse(&v).ok())
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(value: SessionCode) -> Self {
        value.0
    }
}

// ============================================================================
// PeerId
// ============================================================================

/// Transport-level identity of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Session code if this is a host identity.
    pub fn session_code(&self) -> Option<SessionCode> {
        self.0
            .strip_prefix(HOST_PEER_PREFIX)
            .and_then(|code| SessionCode::parse(code).ok())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let code = SessionCode::parse("  ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
        assert_eq!(code.host_peer_id().as_str(), "SESSION-AB12CD");
    }

    #[test]
    fn parse_rejects_wrong_length_and_symbols() {
        assert!(SessionCode::parse("ABC").is_err());
        assert!(SessionCode::parse("ABCDEFG").is_err());
        assert!(SessionCode::parse("AB-2CD").is_err());
    }

    #[test]
    fn generate_draws_from_the_alphabet() {
        let mut n = 0;
        let code = SessionCode::generate(|len| {
            n += 7;
            n % len
        });
        assert_eq!(code.as_str(), "HOV29G");
        assert!(SessionCode::parse(code.as_str()).is_ok());
    }

    #[test]
    fn session_link_round_trips_and_keeps_other_params() {
        let base = Url::parse("https://table.example/play?theme=dark&session=OLD111").unwrap();
        let code = SessionCode::parse("XY9Z00").unwrap();
        let link = code.session_link(&base);

        assert_eq!(SessionCode::from_link(&link), Some(code));
        assert!(link.query().unwrap().contains("theme=dark"));
        assert!(!link.query().unwrap().contains("OLD111"));
    }

    #[test]
    fn host_identity_yields_its_code() {
        let peer = PeerId::from("SESSION-QWE123");
        assert_eq!(peer.session_code().map(String::from), Some("QWE123".into()));
        assert_eq!(PeerId::from("guest-1").session_code(), None);
    }
}
