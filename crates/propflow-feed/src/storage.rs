// ── Durable local key/value storage ──
//
// Backs state that never reaches the remote store: notification lists
// and search history, each under an application-namespaced key.

use std::path::PathBuf;

use dashmap::DashMap;

use crate::error::FeedError;

// ── LocalStore ──────────────────────────────────────────────────────

/// Minimal durable KV interface: one string value per namespaced key.
///
/// Writes are expected to be small and infrequent (the engine persists
/// whole serialized lists on mutation), so implementations can be
/// synchronous.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError>;
    fn set(&self, key: &str, value: &str) -> Result<(), FeedError>;
    fn remove(&self, key: &str) -> Result<(), FeedError>;
}

// ── MemoryStore ─────────────────────────────────────────────────────

/// In-memory [`LocalStore`]. Durable only for the process lifetime;
/// the default for tests and ephemeral embeddings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FeedError> {
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), FeedError> {
        self.entries.remove(key);
        Ok(())
    }
}

// ── FileStore ───────────────────────────────────────────────────────

/// File-backed [`LocalStore`]: one file per key under a base directory.
///
/// Key characters outside `[A-Za-z0-9._-]` are mapped to `_` so keys
/// can safely contain namespace separators like `:`.
#[derive(Debug)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base_dir`, creating the directory if
    /// needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, FeedError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("{safe}.json"))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), FeedError> {
        std::fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), FeedError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
