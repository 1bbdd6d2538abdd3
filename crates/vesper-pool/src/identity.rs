//! Stable identifiers and the identity manager.
//!
//! A [`StableId`] is the permanent, cross-session identity of a logical
//! instance. It is minted once, from a monotonically increasing 64-bit
//! counter seeded from persisted state at startup, and is never reused no
//! matter how many times the instance cycles through the pool.
//!
//! The [`IdentityManager`] also owns the transient-handle allocator and the
//! live-only `handle -> stable id` binding: resolving a handle is defined
//! only while the instance behind it is live.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::handle::{HandleAllocator, InstanceHandle};
use crate::PoolError;

// ---------------------------------------------------------------------------
// StableId
// ---------------------------------------------------------------------------

/// A permanent cross-session identity for a logical pool instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StableId(u64);

impl StableId {
    /// Reconstruct from a raw `u64` (e.g. from persisted storage).
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw `u64` value.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableId({})", self.0)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sid:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdentityManager
// ---------------------------------------------------------------------------

/// Allocates transient handles, mints stable identifiers, and maintains the
/// live-only handle binding.
#[derive(Debug)]
pub struct IdentityManager {
    handles: HandleAllocator,
    /// Next stable identifier to mint. Seeded from persisted state so that
    /// identifiers never collide across sessions.
    next_stable: u64,
    /// Live-only binding. An entry exists exactly while the instance is live.
    bindings: HashMap<InstanceHandle, StableId>,
}

impl IdentityManager {
    /// Create a manager for a fresh session (stable counter starts at 1).
    pub fn new() -> Self {
        Self::with_seed(1)
    }

    /// Create a manager whose stable counter resumes from persisted state.
    pub fn with_seed(next_stable: u64) -> Self {
        Self {
            handles: HandleAllocator::new(),
            next_stable: next_stable.max(1),
            bindings: HashMap::new(),
        }
    }

    /// Allocate a transient handle.
    pub fn allocate(&mut self) -> Result<InstanceHandle, PoolError> {
        self.handles.allocate()
    }

    /// Free a transient handle, dropping its binding if one remains.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidHandle`] on double free.
    pub fn free(&mut self, handle: InstanceHandle) -> Result<(), PoolError> {
        self.handles.free(handle)?;
        self.bindings.remove(&handle);
        Ok(())
    }

    /// Mint a fresh stable identifier. Never reused within or across
    /// sessions (the counter is persisted at shutdown).
    pub fn new_stable_id(&mut self) -> Result<StableId, PoolError> {
        let id = StableId(self.next_stable);
        self.next_stable = self
            .next_stable
            .checked_add(1)
            .ok_or(PoolError::StableIdSpaceExhausted)?;
        Ok(id)
    }

    /// Bind a live handle to its stable identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidHandle`] if the handle is not currently
    /// allocated, or [`PoolError::AlreadyBound`] if it already has a binding.
    pub fn bind(&mut self, handle: InstanceHandle, stable_id: StableId) -> Result<(), PoolError> {
        if !self.handles.is_allocated(handle) {
            return Err(PoolError::InvalidHandle { handle });
        }
        if self.bindings.contains_key(&handle) {
            return Err(PoolError::AlreadyBound { handle });
        }
        self.bindings.insert(handle, stable_id);
        Ok(())
    }

    /// Resolve a live handle to its stable identifier.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotLive`] if the handle has no current binding.
    pub fn resolve(&self, handle: InstanceHandle) -> Result<StableId, PoolError> {
        self.bindings
            .get(&handle)
            .copied()
            .ok_or(PoolError::NotLive { handle })
    }

    /// Remove and return the binding for a handle.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotLive`] if the handle has no current binding.
    pub fn unbind(&mut self, handle: InstanceHandle) -> Result<StableId, PoolError> {
        self.bindings
            .remove(&handle)
            .ok_or(PoolError::NotLive { handle })
    }

    /// Number of live bindings.
    pub fn live_count(&self) -> usize {
        self.bindings.len()
    }

    /// The counter value to persist at clean shutdown. Seeding a later
    /// session with this value guarantees no stable identifier collides.
    pub fn persisted_counter(&self) -> u64 {
        self.next_stable
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
