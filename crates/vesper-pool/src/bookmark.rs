//! The bookmark store: virtual (not-currently-instantiated) instances.
//!
//! A [`BookmarkEntry`] is the persisted description of a pooled instance
//! while it is not materialized: the class name, an immutable snapshot of the
//! spawn parameters, an opaque state blob written by the Synchronize pass,
//! and a structured metadata document used by level-editing tooling to
//! recover bookmark info. An entry exists for every instance that has ever
//! been pooled, whether or not it is currently live.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::identity::StableId;
use crate::PoolError;

// ---------------------------------------------------------------------------
// SpawnParams
// ---------------------------------------------------------------------------

/// World-space placement for a spawned host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    /// Quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }
}

/// Immutable spawn snapshot captured when an instance is first bookmarked.
///
/// These are the parameters the host factory sees on every construction,
/// regardless of how many times the instance cycles through the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnParams {
    /// Instance name (level-editor name, not the class name).
    pub name: String,
    /// Initial placement.
    pub transform: Transform,
    /// Engine spawn flags, opaque to the pool.
    pub flags: u32,
}

impl SpawnParams {
    /// Convenience constructor with a default transform and no flags.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            flags: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// BookmarkEntry
// ---------------------------------------------------------------------------

/// A virtual instance: everything needed to re-materialize it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkEntry {
    /// Name of the registered host class.
    pub class_name: String,
    /// Immutable spawn snapshot.
    pub spawn_params: SpawnParams,
    /// Opaque serialized state, written by Synchronize and consumed by
    /// Prepare/Reload. `None` means "construct from class defaults".
    pub state_blob: Option<Vec<u8>>,
    /// Structured metadata recovered by the tooling layer. The pool never
    /// interprets this document.
    pub metadata: serde_json::Value,
}

impl BookmarkEntry {
    /// Create an entry with no saved state and empty metadata.
    pub fn new(class_name: impl Into<String>, spawn_params: SpawnParams) -> Self {
        Self {
            class_name: class_name.into(),
            spawn_params,
            state_blob: None,
            metadata: serde_json::Value::Null,
        }
    }
}

// ---------------------------------------------------------------------------
// BookmarkStore
// ---------------------------------------------------------------------------

/// Holds one [`BookmarkEntry`] per pooled stable identifier.
///
/// Backed by a `BTreeMap` so iteration is always in ascending stable-id
/// order, which the registry relies on for deterministic bulk operations.
#[derive(Debug, Default)]
pub struct BookmarkStore {
    entries: BTreeMap<StableId, BookmarkEntry>,
}

impl BookmarkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Create an entry for `stable_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::DuplicateBookmark`] if an entry already exists.
    pub fn create(
        &mut self,
        stable_id: StableId,
        class_name: impl Into<String>,
        spawn_params: SpawnParams,
    ) -> Result<&mut BookmarkEntry, PoolError> {
        if self.entries.contains_key(&stable_id) {
            return Err(PoolError::DuplicateBookmark { stable_id });
        }
        Ok(self
            .entries
            .entry(stable_id)
            .or_insert(BookmarkEntry::new(class_name, spawn_params)))
    }

    /// Look up the entry for `stable_id`, if it was ever bookmarked.
    pub fn get(&self, stable_id: StableId) -> Option<&BookmarkEntry> {
        self.entries.get(&stable_id)
    }

    /// Mutable entry access for the registry.
    pub(crate) fn get_mut(&mut self, stable_id: StableId) -> Option<&mut BookmarkEntry> {
        self.entries.get_mut(&stable_id)
    }

    /// Overwrite the state blob for `stable_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownBookmark`] if no entry exists.
    pub fn write_state(&mut self, stable_id: StableId, blob: Vec<u8>) -> Result<(), PoolError> {
        let entry = self
            .entries
            .get_mut(&stable_id)
            .ok_or(PoolError::UnknownBookmark { stable_id })?;
        entry.state_blob = Some(blob);
        Ok(())
    }

    /// Clear the state blob so the next Prepare starts from class defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownBookmark`] if no entry exists.
    pub fn clear_state(&mut self, stable_id: StableId) -> Result<(), PoolError> {
        let entry = self
            .entries
            .get_mut(&stable_id)
            .ok_or(PoolError::UnknownBookmark { stable_id })?;
        entry.state_blob = None;
        Ok(())
    }

    /// Permanently delete the entry. Used only by pool reset and permanent
    /// removal.
    pub fn remove(&mut self, stable_id: StableId) -> Option<BookmarkEntry> {
        self.entries.remove(&stable_id)
    }

    /// Whether an entry exists for `stable_id`.
    pub fn is_bookmarked(&self, stable_id: StableId) -> bool {
        self.entries.contains_key(&stable_id)
    }

    /// All bookmarked stable identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = StableId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
