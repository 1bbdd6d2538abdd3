//! Entity pooling with stable identity and an extension lifecycle.
//!
//! `vesper-pool` manages a population of logical instances that alternate
//! between a cheap *bookmarked* (virtual) form and a fully materialized
//! *live* form, without losing identity or state across the transitions:
//!
//! - [`registry::PoolRegistry`] owns the per-instance state machine
//!   (`Bookmarked -> Live -> Returning -> Bookmarked`, terminal `Removed`).
//! - [`identity::IdentityManager`] reconciles transient per-materialization
//!   handles with permanent 64-bit stable identifiers.
//! - [`dispatch::Dispatcher`] fans lifecycle callbacks out over a host
//!   object and its ordered extensions with per-participant fault isolation,
//!   and runs the short-circuiting reload veto chain.
//!
//! # Quick start
//!
//! ```
//! use vesper_pool::prelude::*;
//! use std::any::Any;
//!
//! struct Turret { ammo: u32 }
//!
//! impl LifecycleParticipant for Turret {
//!     fn participant_name(&self) -> &str { "turret" }
//!     fn on_update(&mut self, _cx: &mut InstanceCx) -> HookResult {
//!         self.ammo = self.ammo.saturating_sub(1);
//!         Ok(())
//!     }
//! }
//! impl HostObject for Turret {
//!     fn class_name(&self) -> &str { "Turret" }
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn as_any_mut(&mut self) -> &mut dyn Any { self }
//! }
//!
//! let mut classes = ClassRegistry::new();
//! classes.register("Turret", |_h, _sid, _p| Box::new(Turret { ammo: 12 }));
//!
//! let mut pool = PoolRegistry::new(classes);
//! let sid = pool.new_stable_id()?;
//! pool.bookmark(sid, "Turret", SpawnParams::named("turret_01"))?;
//! let handle = pool.prepare(sid, true)?;
//! pool.update(1.0 / 60.0);
//! assert_eq!(pool.resolve(handle)?, sid);
//! pool.return_instance(sid, true);
//! # Ok::<(), vesper_pool::PoolError>(())
//! ```
//!
//! The pool is single-threaded by contract: all operations happen on the
//! thread driving the frame loop.

#![deny(unsafe_code)]

pub mod bookmark;
pub mod class;
pub mod dispatch;
pub mod handle;
pub mod identity;
pub mod instance;
pub mod lifecycle;
pub mod registry;

use thiserror::Error;

use crate::handle::InstanceHandle;
use crate::identity::StableId;
use crate::registry::PoolState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by pool operations.
///
/// A returned error means the operation was rejected before any side effect;
/// the pool is left exactly as it was.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("transient handle space exhausted")]
    HandleSpaceExhausted,

    #[error("handle {handle} is not currently allocated")]
    InvalidHandle { handle: InstanceHandle },

    #[error("stable identifier space exhausted")]
    StableIdSpaceExhausted,

    #[error("handle {handle} is already bound to a stable identifier")]
    AlreadyBound { handle: InstanceHandle },

    #[error("handle {handle} does not refer to a live instance")]
    NotLive { handle: InstanceHandle },

    #[error("bookmark entry for {stable_id} already exists")]
    DuplicateBookmark { stable_id: StableId },

    #[error("no bookmark entry for {stable_id}")]
    UnknownBookmark { stable_id: StableId },

    #[error("{stable_id} is already bookmarked")]
    AlreadyBookmarked { stable_id: StableId },

    #[error("a prepare for {stable_id} is already queued")]
    AlreadyPreparing { stable_id: StableId },

    #[error("{operation} rejected: {stable_id} is {state}")]
    WrongState {
        operation: &'static str,
        stable_id: StableId,
        state: PoolState,
    },

    #[error("no host class registered under {class_name:?}")]
    NoSuchClass { class_name: String },

    #[error("state blob is not a valid sync document")]
    MalformedBlob(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Common imports for pool users.
pub mod prelude {
    pub use crate::bookmark::{BookmarkEntry, SpawnParams, Transform};
    pub use crate::class::ClassRegistry;
    pub use crate::dispatch::{
        DiagnosticSink, DispatchReport, Dispatcher, ReloadListener, ReloadOutcome,
    };
    pub use crate::handle::InstanceHandle;
    pub use crate::identity::{IdentityManager, StableId};
    pub use crate::instance::LiveInstance;
    pub use crate::lifecycle::{
        Extension, HookResult, HostObject, InstanceCx, LifecycleParticipant, LifecyclePoint,
        ReloadParams, SyncContext, SyncMode,
    };
    pub use crate::registry::{PoolRegistry, PoolState};
    pub use crate::PoolError;
}

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
