//! Engine configuration.
//!
//! Defaults match the behavior a table expects out of the box. Every value can
//! be overridden from the environment (`REALMLINK_*`); an unparsable value logs
//! a warning and keeps the default.

use std::time::Duration;

use crate::infrastructure::ports::ErrorClass;

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default model for stat generation.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Retry delays and staged backoff for the presence monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub transient: Duration,
    pub peer_not_found: Duration,
    pub fatal_signaling: Duration,
    pub identity_collision: Duration,
    /// Growth per consecutive failed attempt
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient: Duration::from_secs(5),
            peer_not_found: Duration::from_secs(8),
            fatal_signaling: Duration::from_secs(10),
            identity_collision: Duration::from_secs(15),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Base delay before the first retry of an error class.
    pub fn base_delay(&self, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::PeerNotFound => self.peer_not_found,
            ErrorClass::FatalSignaling => self.fatal_signaling,
            ErrorClass::IdentityCollision => self.identity_collision,
            ErrorClass::Transient | ErrorClass::MalformedData | ErrorClass::ExternalService => {
                self.transient
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Runtime configuration shared by host and guest runtimes.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub heartbeat_interval: Duration,
    pub retry: RetryPolicy,
    /// Poll interval of the storage relay transport
    pub relay_poll_interval: Duration,
    /// Unchanged polls after which a relay peer counts as gone
    pub relay_stale_polls: u32,
    /// Save the host snapshot after every committed change
    pub autosave: bool,
    pub ollama: OllamaSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            relay_poll_interval: Duration::from_secs(1),
            relay_stale_polls: 5,
            autosave: true,
            ollama: OllamaSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `REALMLINK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let secs = |key: &str, current: Duration| -> Duration {
            let Some(value) = parse_or_warn(&lookup, key, current.as_secs_f64()) else {
                return current;
            };
            match Duration::try_from_secs_f64(value) {
                Ok(delay) if value.is_finite() && !delay.is_zero() => delay,
                _ => {
                    tracing::warn!(key, value, default = ?current, "Config delay out of range, using default");
                    current
                }
            }
        };

        config.heartbeat_interval = secs("REALMLINK_HEARTBEAT_SECS", config.heartbeat_interval);
        config.retry.transient = secs("REALMLINK_RETRY_TRANSIENT_SECS", config.retry.transient);
        config.retry.peer_not_found =
            secs("REALMLINK_RETRY_PEER_NOT_FOUND_SECS", config.retry.peer_not_found);
        config.retry.fatal_signaling =
            secs("REALMLINK_RETRY_FATAL_SIGNALING_SECS", config.retry.fatal_signaling);
        config.retry.identity_collision = secs(
            "REALMLINK_RETRY_IDENTITY_COLLISION_SECS",
            config.retry.identity_collision,
        );
        config.retry.max_delay = secs("REALMLINK_RETRY_MAX_SECS", config.retry.max_delay);
        if let Some(m) = parse_or_warn(&lookup, "REALMLINK_RETRY_MULTIPLIER", config.retry.multiplier)
        {
            if m.is_finite() && m >= 1.0 {
                config.retry.multiplier = m;
            } else {
                tracing::warn!(multiplier = m, "Retry multiplier out of range, using default");
            }
        }
        config.relay_poll_interval = secs("REALMLINK_RELAY_POLL_SECS", config.relay_poll_interval);
        if let Some(n) = parse_or_warn(&lookup, "REALMLINK_RELAY_STALE_POLLS", config.relay_stale_polls)
        {
            config.relay_stale_polls = n.max(1);
        }
        if let Some(flag) = parse_or_warn(&lookup, "REALMLINK_AUTOSAVE", config.autosave) {
            config.autosave = flag;
        }
        if let Some(url) = lookup("REALMLINK_OLLAMA_URL") {
            config.ollama.base_url = url;
        }
        if let Some(model) = lookup("REALMLINK_OLLAMA_MODEL") {
            config.ollama.model = model;
        }
        config.ollama.timeout = secs("REALMLINK_OLLAMA_TIMEOUT_SECS", config.ollama.timeout);
        config
    }
}

fn parse_or_warn<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Option<T>
where
    T: std::str::FromStr + std::fmt::Debug,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, default = ?default, "Invalid config value, using default");
            None
        }
    }
}
