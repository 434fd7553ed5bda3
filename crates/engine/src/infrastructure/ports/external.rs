//! External service ports: stat generation and key-value persistence.

use async_trait::async_trait;

use realmlink_domain::GeneratedStats;

use super::error::{StatGenError, StoreError};

// =============================================================================
// Stat Generation
// =============================================================================

/// Turns a free-text monster description into stats.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatGeneratorPort: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedStats, StatGenError>;
}

// =============================================================================
// Key-Value Store
// =============================================================================

/// Minimal string key-value contract used for autosave and the storage relay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStorePort: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Keys starting with `prefix`, sorted.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
