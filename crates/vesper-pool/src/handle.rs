//! Transient instance handles and their allocator.
//!
//! An [`InstanceHandle`] is a small `u32` wrapper that identifies a *live*
//! pool instance. Handles are unique only among instances that are live at
//! the same moment: once freed, the same numeric value may be handed out
//! again for a different logical instance. Cross-session identity is the job
//! of [`StableId`](crate::identity::StableId), not the handle.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::PoolError;

// ---------------------------------------------------------------------------
// InstanceHandle
// ---------------------------------------------------------------------------

/// A transient, recyclable identity for a live pool instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceHandle(u32);

impl InstanceHandle {
    /// Construct a handle from its raw index.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw `u32` value.
    #[inline]
    pub fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceHandle({})", self.0)
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HandleAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`InstanceHandle`]s.
///
/// Freed handles are kept in a FIFO queue so that a just-returned value is
/// not immediately handed back out, which makes accidental reuse of a stale
/// handle visible sooner in practice. Fresh handles come from a monotonically
/// increasing counter; exhausting the `u32` space within one session is a
/// fatal error, never a wrap.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    /// Whether each slot (by index) is currently allocated.
    alive: Vec<bool>,
    /// Free-list of recyclable handle values (FIFO).
    free: VecDeque<u32>,
}

impl HandleAllocator {
    /// Create a new, empty allocator.
    pub fn new() -> Self {
        Self {
            alive: Vec::new(),
            free: VecDeque::new(),
        }
    }

    /// Allocate a handle, reusing the oldest freed value if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::HandleSpaceExhausted`] when every `u32` value is
    /// simultaneously live.
    pub fn allocate(&mut self) -> Result<InstanceHandle, PoolError> {
        if let Some(value) = self.free.pop_front() {
            self.alive[value as usize] = true;
            return Ok(InstanceHandle(value));
        }
        if self.alive.len() > u32::MAX as usize {
            return Err(PoolError::HandleSpaceExhausted);
        }
        let value = self.alive.len() as u32;
        self.alive.push(true);
        Ok(InstanceHandle(value))
    }

    /// Free a handle, making its value eligible for reuse.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidHandle`] if the handle was never allocated
    /// or is already free (double-free guard).
    pub fn free(&mut self, handle: InstanceHandle) -> Result<(), PoolError> {
        let idx = handle.to_raw() as usize;
        if idx >= self.alive.len() || !self.alive[idx] {
            return Err(PoolError::InvalidHandle { handle });
        }
        self.alive[idx] = false;
        self.free.push_back(handle.to_raw());
        Ok(())
    }

    /// Whether the handle is currently allocated.
    pub fn is_allocated(&self, handle: InstanceHandle) -> bool {
        let idx = handle.to_raw() as usize;
        idx < self.alive.len() && self.alive[idx]
    }

    /// Number of currently allocated handles.
    pub fn allocated_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
