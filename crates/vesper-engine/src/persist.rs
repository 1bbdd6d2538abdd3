//! Cross-session persistence for the stable-identifier counter.
//!
//! Stable identifiers must never collide across sessions, so the pool's
//! counter is written out at clean shutdown and used to seed the identity
//! manager at the next startup. The store is a small JSON document:
//!
//! ```json
//! { "next_stable_id": 42 }
//! ```
//!
//! A missing file is a fresh session, not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from reading or writing the counter file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("counter file io failed")]
    Io(#[from] std::io::Error),

    #[error("counter file is not a valid document")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterDoc {
    next_stable_id: u64,
}

/// Reads and writes the persisted stable-id counter.
#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted counter. `None` means no file yet (fresh session).
    ///
    /// # Errors
    ///
    /// [`PersistError::Io`] on a read failure other than not-found,
    /// [`PersistError::Malformed`] if the file is not a counter document.
    pub fn load(&self) -> Result<Option<u64>, PersistError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no counter file; fresh session");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let doc: CounterDoc = serde_json::from_str(&text)?;
        Ok(Some(doc.next_stable_id))
    }

    /// Write the counter for the next session to pick up.
    ///
    /// # Errors
    ///
    /// [`PersistError::Io`] on a write failure.
    pub fn store(&self, next_stable_id: u64) -> Result<(), PersistError> {
        let doc = CounterDoc { next_stable_id };
        let text = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&self.path, text)?;
        debug!(path = %self.path.display(), next_stable_id, "counter persisted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_pool::class::ClassRegistry;
    use vesper_pool::dispatch::Dispatcher;
    use vesper_pool::identity::IdentityManager;
    use vesper_pool::registry::PoolRegistry;

    fn scratch_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("vesper-counter-{tag}-{}.json", std::process::id()));
        path
    }

    #[test]
    fn missing_file_is_a_fresh_session() {
        let store = CounterStore::new(scratch_path("missing"));
        let _ = std::fs::remove_file(store.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn store_then_load_round_trips() {
        let store = CounterStore::new(scratch_path("roundtrip"));
        store.store(42).unwrap();
        assert_eq!(store.load().unwrap(), Some(42));
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let store = CounterStore::new(scratch_path("malformed"));
        std::fs::write(store.path(), "not json").unwrap();
        assert!(matches!(store.load(), Err(PersistError::Malformed(_))));
        let _ = std::fs::remove_file(store.path());
    }

    #[test]
    fn persisted_counter_seeds_the_next_session() {
        let store = CounterStore::new(scratch_path("seed"));

        let mut first = PoolRegistry::new(ClassRegistry::new());
        let last_id = {
            let mut id = first.new_stable_id().unwrap();
            for _ in 0..9 {
                id = first.new_stable_id().unwrap();
            }
            id
        };
        store.store(first.persisted_counter()).unwrap();

        let seed = store.load().unwrap().unwrap();
        let mut second = PoolRegistry::with_parts(
            ClassRegistry::new(),
            IdentityManager::with_seed(seed),
            Dispatcher::new(),
        );
        assert!(second.new_stable_id().unwrap() > last_id);
        let _ = std::fs::remove_file(store.path());
    }
}
