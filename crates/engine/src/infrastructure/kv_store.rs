//! Key-value store adapters.
//!
//! `InMemoryKvStore` is shared between runtimes in one process (tests, the
//! demo, the storage relay). `FileKvStore` keeps one file per key in a
//! directory, written atomically through a temp file and rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::infrastructure::ports::{KeyValueStorePort, StoreError};

// =============================================================================
// In-memory
// =============================================================================

#[derive(Clone, Default)]
pub struct InMemoryKvStore {
    entries: Arc<DashMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStorePort for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// File-backed
// =============================================================================

pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::backend("open", e))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }
}

#[async_trait]
impl KeyValueStorePort for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::backend("get", e)),
        }
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::backend("put", e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::backend("put", e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::backend("delete", e)),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::backend("list_keys", e))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::backend("list_keys", e))?
        {
            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(key) = decode_key(stem) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Keys become file names: `[A-Za-z0-9._-]` kept, everything else `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
