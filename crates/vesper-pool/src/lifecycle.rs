//! The lifecycle contract shared by hosts and extensions.
//!
//! Every live instance is a composite: one host object plus an ordered list
//! of extensions, and all of them observe the same lifecycle points in the
//! same fixed order. The [`LifecycleParticipant`] trait defines the hooks;
//! every hook is defaulted so a participant only implements the points it
//! cares about.
//!
//! Hooks return [`HookResult`]; an `Err` is a *participant fault* — it is
//! reported to the diagnostic sink and isolated, never propagated to the
//! caller of the dispatch (see [`crate::dispatch`]).

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;

use crate::handle::InstanceHandle;
use crate::identity::StableId;
use crate::PoolError;

// ---------------------------------------------------------------------------
// LifecyclePoint
// ---------------------------------------------------------------------------

/// The named lifecycle callbacks fanned out by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePoint {
    Initialize,
    PostInitialize,
    Update,
    PostUpdate,
    Synchronize,
    Release,
    Reload,
    PostReload,
}

impl fmt::Display for LifecyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "Initialize",
            Self::PostInitialize => "PostInitialize",
            Self::Update => "Update",
            Self::PostUpdate => "PostUpdate",
            Self::Synchronize => "Synchronize",
            Self::Release => "Release",
            Self::Reload => "Reload",
            Self::PostReload => "PostReload",
        };
        f.write_str(name)
    }
}

/// Outcome of a single lifecycle hook. `Err` is a participant fault.
pub type HookResult = anyhow::Result<()>;

// ---------------------------------------------------------------------------
// InstanceCx -- per-dispatch context
// ---------------------------------------------------------------------------

/// An extension-list mutation requested from inside a hook.
///
/// The extension list may never be mutated while a fan-out is iterating it,
/// so hooks queue their requests here and the dispatcher applies them after
/// the current pass completes.
pub enum ExtensionOp {
    /// Attach a new extension at the end of the list.
    Add(Box<dyn Extension>),
    /// Detach the first extension of the given type.
    Remove {
        type_id: TypeId,
        /// For diagnostics only.
        type_name: &'static str,
    },
}

impl fmt::Debug for ExtensionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(ext) => write!(f, "Add({})", ext.participant_name()),
            Self::Remove { type_name, .. } => write!(f, "Remove({type_name})"),
        }
    }
}

/// Context handed to every hook during a dispatch pass.
#[derive(Debug)]
pub struct InstanceCx {
    /// The instance's transient handle.
    pub handle: InstanceHandle,
    /// The instance's permanent identity.
    pub stable_id: StableId,
    /// Frame delta in seconds. Meaningful for Update/PostUpdate, zero at the
    /// other points.
    pub dt: f32,
    deferred: Vec<ExtensionOp>,
}

impl InstanceCx {
    pub(crate) fn new(handle: InstanceHandle, stable_id: StableId, dt: f32) -> Self {
        Self {
            handle,
            stable_id,
            dt,
            deferred: Vec::new(),
        }
    }

    /// Queue an extension to be attached after the current fan-out.
    pub fn queue_add_extension(&mut self, extension: Box<dyn Extension>) {
        self.deferred.push(ExtensionOp::Add(extension));
    }

    /// Queue detachment of the first extension of type `T` after the current
    /// fan-out.
    pub fn queue_remove_extension<T: Extension + 'static>(&mut self) {
        self.deferred.push(ExtensionOp::Remove {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        });
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<ExtensionOp> {
        std::mem::take(&mut self.deferred)
    }
}

// ---------------------------------------------------------------------------
// SyncContext -- serialization adapter boundary
// ---------------------------------------------------------------------------

/// Direction of a Synchronize pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Participants write their fields into the document.
    Saving,
    /// Participants read their fields back out of the document.
    Loading,
}

/// The grouped-field document participants read and write during
/// Synchronize.
///
/// The physical blob is the JSON encoding of this document; participants
/// only ever see the begin-group / field / end-group surface, which is the
/// stable external contract of the serialization adapter.
#[derive(Debug)]
pub struct SyncContext {
    mode: SyncMode,
    root: serde_json::Value,
    path: Vec<String>,
}

impl SyncContext {
    /// Create an empty document for a save pass.
    pub fn saving() -> Self {
        Self {
            mode: SyncMode::Saving,
            root: serde_json::Value::Object(serde_json::Map::new()),
            path: Vec::new(),
        }
    }

    /// Decode a blob into a document for a load pass.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::MalformedBlob`] if the bytes are not a valid
    /// document.
    pub fn loading(blob: &[u8]) -> Result<Self, PoolError> {
        let root: serde_json::Value = serde_json::from_slice(blob)?;
        Ok(Self {
            mode: SyncMode::Loading,
            root,
            path: Vec::new(),
        })
    }

    /// Which direction this pass runs in.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Enter (creating if necessary) a named group.
    pub fn begin_group(&mut self, name: impl Into<String>) {
        self.path.push(name.into());
    }

    /// Leave the innermost group. No-op at the root.
    pub fn end_group(&mut self) {
        self.path.pop();
    }

    /// Write a field into the current group.
    pub fn write_field(&mut self, name: &str, value: serde_json::Value) {
        let group = Self::group_mut(&mut self.root, &self.path);
        if let serde_json::Value::Object(map) = group {
            map.insert(name.to_owned(), value);
        }
    }

    /// Read a field from the current group, if present.
    pub fn read_field(&self, name: &str) -> Option<&serde_json::Value> {
        let mut node = &self.root;
        for segment in &self.path {
            node = node.get(segment)?;
        }
        node.get(name)
    }

    /// Encode the document into the opaque blob.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::MalformedBlob`] if encoding fails.
    pub fn into_blob(self) -> Result<Vec<u8>, PoolError> {
        Ok(serde_json::to_vec(&self.root)?)
    }

    /// Borrow the underlying document (used to surface reload payloads).
    pub fn document(&self) -> &serde_json::Value {
        &self.root
    }

    fn group_mut<'a>(
        root: &'a mut serde_json::Value,
        path: &[String],
    ) -> &'a mut serde_json::Value {
        let mut node = root;
        for segment in path {
            if !node.is_object() {
                *node = serde_json::Value::Object(serde_json::Map::new());
            }
            // Index insertion on an object never panics; missing keys come
            // back as Null and are objectified on the next pass.
            node = &mut node[segment.as_str()];
        }
        if !node.is_object() {
            *node = serde_json::Value::Object(serde_json::Map::new());
        }
        node
    }
}

// ---------------------------------------------------------------------------
// ReloadParams
// ---------------------------------------------------------------------------

/// Arguments handed to every participant in the reload veto chain.
#[derive(Debug, Clone)]
pub struct ReloadParams {
    /// Why the reload was requested (caller-defined).
    pub reason: String,
    /// The instance's current saved state, decoded from the bookmark blob.
    /// `None` when no state has ever been captured.
    pub state: Option<serde_json::Value>,
}

impl ReloadParams {
    /// Params with a reason and no state payload.
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            state: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Participant traits
// ---------------------------------------------------------------------------

/// The lifecycle hooks shared by hosts and extensions.
///
/// All hooks are defaulted to succeed-and-do-nothing. `on_reload` is the one
/// boolean hook: returning `Ok(false)` vetoes the reload; an `Err` is a
/// fault, which the dispatcher logs and treats as a non-veto.
pub trait LifecycleParticipant {
    /// Name used in diagnostics and fault reports.
    fn participant_name(&self) -> &str;

    fn on_initialize(&mut self, _cx: &mut InstanceCx) -> HookResult {
        Ok(())
    }

    fn on_post_initialize(&mut self, _cx: &mut InstanceCx) -> HookResult {
        Ok(())
    }

    fn on_update(&mut self, _cx: &mut InstanceCx) -> HookResult {
        Ok(())
    }

    fn on_post_update(&mut self, _cx: &mut InstanceCx) -> HookResult {
        Ok(())
    }

    /// Read or write this participant's fields via the sync document.
    fn on_synchronize(&mut self, _sync: &mut SyncContext) -> HookResult {
        Ok(())
    }

    fn on_release(&mut self, _cx: &mut InstanceCx) -> HookResult {
        Ok(())
    }

    /// Approve (`Ok(true)`) or veto (`Ok(false)`) a pending reload.
    fn on_reload(&mut self, _params: &ReloadParams) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Observe the reload outcome. Cannot affect it.
    fn on_post_reload(&mut self, _accepted: bool) {}
}

/// The constructed host object occupying a pool slot.
pub trait HostObject: LifecycleParticipant {
    /// The registered class this host was constructed from.
    fn class_name(&self) -> &str;

    /// Downcast support for callers that know the concrete class.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A composable behavior unit bound to exactly one live instance.
pub trait Extension: LifecycleParticipant {
    /// Downcast support for capability queries.
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
