//! The pool registry: bookmarked-vs-live membership and the per-instance
//! state machine.
//!
//! Per stable identifier the states cycle
//! `Unbookmarked -> Bookmarked -> Live -> Returning -> Bookmarked`, with a
//! terminal `Removed` reachable from anywhere. Every transition is validated
//! before any side effect begins: a rejected operation leaves the machine
//! exactly as it found it.
//!
//! All operations run on the single thread driving the frame loop. The only
//! deferred work is `prepare(.., immediate: false)`, whose construction is
//! queued and drained FIFO by [`PoolRegistry::begin_tick`] — a same-thread
//! scheduling delay, not a background thread.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bookmark::{BookmarkEntry, BookmarkStore, SpawnParams};
use crate::class::ClassRegistry;
use crate::dispatch::{DispatchReport, Dispatcher, ReloadListener, ReloadOutcome};
use crate::handle::InstanceHandle;
use crate::identity::{IdentityManager, StableId};
use crate::instance::LiveInstance;
use crate::lifecycle::{Extension, LifecyclePoint, ReloadParams, SyncContext};
use crate::PoolError;

// ---------------------------------------------------------------------------
// PoolState
// ---------------------------------------------------------------------------

/// Where a stable identifier sits in the pooling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    /// Never bookmarked (or identifier unknown to this pool).
    Unbookmarked,
    /// Virtual: a bookmark entry exists, no live instance.
    Bookmarked,
    /// Prepare accepted; construction queued for the next tick.
    Preparing,
    /// Materialized and occupying a pool slot.
    Live,
    /// Mid-return: synchronize/release callbacks are running.
    Returning,
    /// Permanently removed. Terminal.
    Removed,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unbookmarked => "Unbookmarked",
            Self::Bookmarked => "Bookmarked",
            Self::Preparing => "Preparing",
            Self::Live => "Live",
            Self::Returning => "Returning",
            Self::Removed => "Removed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// PoolRegistry
// ---------------------------------------------------------------------------

/// The orchestrator: owns the bookmark store, identity manager, dispatcher,
/// live instances, and the per-identifier state machine.
pub struct PoolRegistry {
    classes: ClassRegistry,
    identity: IdentityManager,
    bookmarks: BookmarkStore,
    /// State per identifier. Absence means `Unbookmarked`.
    states: BTreeMap<StableId, PoolState>,
    /// Live instances in ascending stable-id order (bulk operations are
    /// deterministic by construction).
    live: BTreeMap<StableId, LiveInstance>,
    /// Queued deferred preparations, drained FIFO at the next tick boundary.
    deferred: VecDeque<(StableId, InstanceHandle)>,
    dispatcher: Dispatcher,
    enabled: bool,
}

impl PoolRegistry {
    /// Registry with a fresh identity manager and the default tracing sink.
    pub fn new(classes: ClassRegistry) -> Self {
        Self::with_parts(classes, IdentityManager::new(), Dispatcher::new())
    }

    /// Registry assembled from explicit parts — a seeded identity manager
    /// (persisted counter) and/or a dispatcher with a custom diagnostic sink.
    pub fn with_parts(
        classes: ClassRegistry,
        identity: IdentityManager,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            classes,
            identity,
            bookmarks: BookmarkStore::new(),
            states: BTreeMap::new(),
            live: BTreeMap::new(),
            deferred: VecDeque::new(),
            dispatcher,
            enabled: true,
        }
    }

    // -- identity -----------------------------------------------------------

    /// Mint a stable identifier for a new logical instance.
    pub fn new_stable_id(&mut self) -> Result<StableId, PoolError> {
        self.identity.new_stable_id()
    }

    /// The stable-id counter to persist at clean shutdown.
    pub fn persisted_counter(&self) -> u64 {
        self.identity.persisted_counter()
    }

    /// Resolve a live handle to its stable identifier.
    pub fn resolve(&self, handle: InstanceHandle) -> Result<StableId, PoolError> {
        self.identity.resolve(handle)
    }

    // -- state machine ------------------------------------------------------

    /// Register a virtual instance: `Unbookmarked -> Bookmarked`.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlreadyBookmarked`] unless the identifier is
    /// `Unbookmarked`; [`PoolError::WrongState`] if it was permanently
    /// removed; [`PoolError::NoSuchClass`] if `class_name` has no
    /// registered constructor (checked here so deferred construction can
    /// never fail on an unknown class).
    pub fn bookmark(
        &mut self,
        stable_id: StableId,
        class_name: &str,
        spawn_params: SpawnParams,
    ) -> Result<(), PoolError> {
        if self.state_of(stable_id) == PoolState::Removed {
            return Err(PoolError::WrongState {
                operation: "Bookmark",
                stable_id,
                state: PoolState::Removed,
            });
        }
        if self.states.contains_key(&stable_id) || self.bookmarks.is_bookmarked(stable_id) {
            return Err(PoolError::AlreadyBookmarked { stable_id });
        }
        if !self.classes.is_registered(class_name) {
            return Err(PoolError::NoSuchClass {
                class_name: class_name.to_owned(),
            });
        }
        self.bookmarks.create(stable_id, class_name, spawn_params)?;
        self.states.insert(stable_id, PoolState::Bookmarked);
        debug!(%stable_id, class = class_name, "bookmarked");
        Ok(())
    }

    /// Materialize a bookmarked instance: `Bookmarked -> Live` (or
    /// `-> Preparing` when `immediate` is false, with construction queued
    /// for [`begin_tick`](Self::begin_tick)).
    ///
    /// The returned handle is allocated and bound in both modes.
    ///
    /// While pooling is disabled the instance is constructed directly from
    /// class defaults, bypassing the state machine entirely.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlreadyPreparing`] if a prepare is already queued;
    /// [`PoolError::WrongState`] if the identifier is not `Bookmarked`.
    pub fn prepare(
        &mut self,
        stable_id: StableId,
        immediate: bool,
    ) -> Result<InstanceHandle, PoolError> {
        if !self.enabled {
            return self.prepare_direct(stable_id);
        }

        match self.state_of(stable_id) {
            PoolState::Bookmarked => {}
            PoolState::Preparing => return Err(PoolError::AlreadyPreparing { stable_id }),
            state => {
                return Err(PoolError::WrongState {
                    operation: "Prepare",
                    stable_id,
                    state,
                })
            }
        }

        let handle = self.identity.allocate()?;
        self.identity.bind(handle, stable_id)?;

        if immediate {
            self.construct_live(stable_id, handle, true);
            self.states.insert(stable_id, PoolState::Live);
        } else {
            self.states.insert(stable_id, PoolState::Preparing);
            self.deferred.push_back((stable_id, handle));
            debug!(%stable_id, %handle, "prepare deferred to next tick");
        }
        Ok(handle)
    }

    /// Drain the deferred-prepare queue, constructing each queued instance
    /// in FIFO order. Called once at the start of every processing tick.
    /// Returns the number of instances constructed.
    pub fn begin_tick(&mut self) -> usize {
        let mut constructed = 0;
        while let Some((stable_id, handle)) = self.deferred.pop_front() {
            if self.state_of(stable_id) != PoolState::Preparing {
                // Removed (or otherwise transitioned) while queued.
                warn!(%stable_id, "queued prepare skipped: no longer Preparing");
                if let Err(error) = self.identity.free(handle) {
                    debug!(%handle, %error, "handle already released");
                }
                continue;
            }
            self.construct_live(stable_id, handle, true);
            self.states.insert(stable_id, PoolState::Live);
            constructed += 1;
        }
        constructed
    }

    /// Return a live instance to the virtual population:
    /// `Live -> Returning -> Bookmarked`.
    ///
    /// With `save_state`, the Synchronize pass captures the composite's
    /// state into the bookmark blob first; otherwise the previous blob is
    /// left untouched. Returns `false`, with no state change, if the
    /// identifier is not currently `Live` (a direct-constructed instance is
    /// torn down regardless of pool state).
    pub fn return_instance(&mut self, stable_id: StableId, save_state: bool) -> bool {
        let direct = self
            .live
            .get(&stable_id)
            .map(|inst| inst.direct)
            .unwrap_or(false);
        if direct {
            return self.return_direct(stable_id);
        }

        if self.state_of(stable_id) != PoolState::Live {
            warn!(%stable_id, state = %self.state_of(stable_id), "return ignored: not live");
            return false;
        }
        let Some(mut instance) = self.live.remove(&stable_id) else {
            // State map and live map always agree for pooled ids.
            warn!(%stable_id, "return ignored: live instance missing");
            return false;
        };

        self.states.insert(stable_id, PoolState::Returning);

        if save_state {
            let mut sync = SyncContext::saving();
            self.dispatcher.synchronize(&mut instance, &mut sync);
            match sync.into_blob() {
                Ok(blob) => {
                    // First return of an adopted instance creates the entry.
                    if !self.bookmarks.is_bookmarked(stable_id) {
                        let entry = BookmarkEntry::new(
                            instance.class_name().to_owned(),
                            instance.spawn_params().clone(),
                        );
                        self.insert_entry(stable_id, entry);
                    }
                    if let Err(error) = self.bookmarks.write_state(stable_id, blob) {
                        warn!(%stable_id, %error, "state blob write failed");
                    }
                }
                Err(error) => warn!(%stable_id, %error, "state capture failed; blob unchanged"),
            }
        }

        self.dispatcher
            .dispatch(LifecyclePoint::Release, &mut instance, 0.0);
        if let Err(error) = self.identity.free(instance.handle()) {
            warn!(%stable_id, %error, "handle free failed during return");
        }
        self.states.insert(stable_id, PoolState::Bookmarked);
        debug!(%stable_id, saved = save_state, "returned to pool");
        true
    }

    /// Clear the saved state blob so the next Prepare starts from class
    /// defaults. A no-op (reported, not fatal) while the instance is live or
    /// preparing.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownBookmark`] if the identifier was never bookmarked.
    pub fn reset_bookmark(&mut self, stable_id: StableId) -> Result<(), PoolError> {
        match self.state_of(stable_id) {
            PoolState::Bookmarked => self.bookmarks.clear_state(stable_id),
            PoolState::Live | PoolState::Returning | PoolState::Preparing => {
                warn!(%stable_id, "reset_bookmark ignored: instance is not virtual");
                Ok(())
            }
            PoolState::Unbookmarked | PoolState::Removed => {
                Err(PoolError::UnknownBookmark { stable_id })
            }
        }
    }

    /// Force every live instance through Return, in ascending stable-id
    /// order. Returns the number of instances returned.
    pub fn reset_all(&mut self, save_state: bool) -> usize {
        let ids: Vec<StableId> = self.live.keys().copied().collect();
        let mut returned = 0;
        for stable_id in ids {
            if self.return_instance(stable_id, save_state) {
                returned += 1;
            }
        }
        returned
    }

    /// Permanently remove an instance: terminal from any state. A live
    /// instance is torn down (Release fan-out, handle freed) without a state
    /// capture; the bookmark entry is deleted.
    ///
    /// # Errors
    ///
    /// [`PoolError::UnknownBookmark`] if the identifier was never known to
    /// this pool.
    pub fn remove(&mut self, stable_id: StableId) -> Result<(), PoolError> {
        match self.state_of(stable_id) {
            PoolState::Unbookmarked => return Err(PoolError::UnknownBookmark { stable_id }),
            PoolState::Removed => {
                debug!(%stable_id, "remove: already removed");
                return Ok(());
            }
            PoolState::Preparing => {
                // Cancel the queued construction and release its handle.
                if let Some(pos) = self.deferred.iter().position(|(id, _)| *id == stable_id) {
                    if let Some((_, handle)) = self.deferred.remove(pos) {
                        if let Err(error) = self.identity.free(handle) {
                            warn!(%stable_id, %error, "handle free failed during remove");
                        }
                    }
                }
            }
            PoolState::Live | PoolState::Returning => {
                if let Some(mut instance) = self.live.remove(&stable_id) {
                    self.dispatcher
                        .dispatch(LifecyclePoint::Release, &mut instance, 0.0);
                    if let Err(error) = self.identity.free(instance.handle()) {
                        warn!(%stable_id, %error, "handle free failed during remove");
                    }
                }
            }
            PoolState::Bookmarked => {}
        }
        self.bookmarks.remove(stable_id);
        self.states.insert(stable_id, PoolState::Removed);
        debug!(%stable_id, "permanently removed");
        Ok(())
    }

    // -- pooling switch -----------------------------------------------------

    /// Turn pooling on (the default).
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Turn pooling off: subsequent prepares construct directly and returns
    /// destroy directly, bypassing the state machine.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // -- frame work ---------------------------------------------------------

    /// Fan Update, then PostUpdate, out across every live instance in
    /// ascending stable-id order. Participant faults are isolated per
    /// callback; the aggregate report counts them.
    pub fn update(&mut self, dt: f32) -> DispatchReport {
        let mut total = DispatchReport::default();
        for point in [LifecyclePoint::Update, LifecyclePoint::PostUpdate] {
            let Self {
                live, dispatcher, ..
            } = self;
            for instance in live.values_mut() {
                let report = dispatcher.dispatch(point, instance, dt);
                total.participants += report.participants;
                total.faults += report.faults;
            }
        }
        total
    }

    /// Run the reload veto chain for a live instance, then fire PostReload.
    /// The instance's saved blob (if any) is decoded into the reload params.
    ///
    /// # Errors
    ///
    /// [`PoolError::WrongState`] if the identifier is not `Live`.
    pub fn reload(
        &mut self,
        stable_id: StableId,
        reason: &str,
    ) -> Result<ReloadOutcome, PoolError> {
        let current = self.state_of(stable_id);
        if current != PoolState::Live {
            return Err(PoolError::WrongState {
                operation: "Reload",
                stable_id,
                state: current,
            });
        }
        let state = self
            .bookmarks
            .get(stable_id)
            .and_then(|entry| entry.state_blob.as_deref())
            .and_then(|blob| match serde_json::from_slice(blob) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%stable_id, %error, "saved blob unreadable; reload params carry no state");
                    None
                }
            });
        let params = ReloadParams {
            reason: reason.to_owned(),
            state,
        };
        let Self {
            live, dispatcher, ..
        } = self;
        let instance = live.get_mut(&stable_id).ok_or(PoolError::WrongState {
            operation: "Reload",
            stable_id,
            state: current,
        })?;
        Ok(dispatcher.reload(instance, &params))
    }

    /// Register an external reload veto listener (registration order is
    /// invocation order).
    pub fn add_reload_listener(&mut self, listener: Box<dyn ReloadListener>) {
        self.dispatcher.add_reload_listener(listener);
    }

    // -- extensions ---------------------------------------------------------

    /// Attach an extension to a live instance (end of the callback order).
    ///
    /// # Errors
    ///
    /// [`PoolError::WrongState`] if the identifier has no live instance.
    pub fn add_extension(
        &mut self,
        stable_id: StableId,
        extension: Box<dyn Extension>,
    ) -> Result<(), PoolError> {
        let instance = self.live.get_mut(&stable_id).ok_or(PoolError::WrongState {
            operation: "AddExtension",
            stable_id,
            state: self.states.get(&stable_id).copied().unwrap_or(PoolState::Unbookmarked),
        })?;
        instance.add_extension(extension);
        Ok(())
    }

    /// Detach the first extension of type `T` from a live instance. Returns
    /// whether one was removed.
    ///
    /// # Errors
    ///
    /// [`PoolError::WrongState`] if the identifier has no live instance.
    pub fn remove_extension<T: Extension + 'static>(
        &mut self,
        stable_id: StableId,
    ) -> Result<bool, PoolError> {
        let instance = self.live.get_mut(&stable_id).ok_or(PoolError::WrongState {
            operation: "RemoveExtension",
            stable_id,
            state: self.states.get(&stable_id).copied().unwrap_or(PoolState::Unbookmarked),
        })?;
        Ok(instance.remove_extension::<T>().is_some())
    }

    // -- introspection ------------------------------------------------------

    /// Current state of an identifier (`Unbookmarked` if unknown).
    pub fn state_of(&self, stable_id: StableId) -> PoolState {
        self.states
            .get(&stable_id)
            .copied()
            .unwrap_or(PoolState::Unbookmarked)
    }

    /// The live handle for an identifier, if materialized.
    pub fn handle_of(&self, stable_id: StableId) -> Option<InstanceHandle> {
        self.live.get(&stable_id).map(|inst| inst.handle())
    }

    /// The bookmark entry for an identifier, if any.
    pub fn bookmark_of(&self, stable_id: StableId) -> Option<&BookmarkEntry> {
        self.bookmarks.get(stable_id)
    }

    /// Mutable access to a bookmark entry's tooling metadata document.
    pub fn bookmark_metadata_mut(&mut self, stable_id: StableId) -> Option<&mut serde_json::Value> {
        self.bookmarks.get_mut(stable_id).map(|entry| &mut entry.metadata)
    }

    /// Read access to a live instance.
    pub fn instance(&self, stable_id: StableId) -> Option<&LiveInstance> {
        self.live.get(&stable_id)
    }

    /// Mutable access to a live instance.
    pub fn instance_mut(&mut self, stable_id: StableId) -> Option<&mut LiveInstance> {
        self.live.get_mut(&stable_id)
    }

    /// Number of live instances.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of queued deferred preparations.
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// The host-class registry.
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    // -- internals ----------------------------------------------------------

    /// Construct the host, restore saved state when asked, and run the
    /// Initialize/PostInitialize fan-out. The entry for `stable_id` must
    /// exist and its class must be registered (both validated upstream).
    fn construct_live(&mut self, stable_id: StableId, handle: InstanceHandle, load_state: bool) {
        let Some(entry) = self.bookmarks.get(stable_id) else {
            warn!(%stable_id, "construction skipped: bookmark entry vanished");
            return;
        };
        let class_name = entry.class_name.clone();
        let spawn_params = entry.spawn_params.clone();
        let blob = if load_state {
            entry.state_blob.clone()
        } else {
            None
        };

        let host = match self
            .classes
            .construct(&class_name, handle, stable_id, &spawn_params)
        {
            Ok(host) => host,
            Err(error) => {
                // Unreachable for bookmarked classes; guard anyway.
                warn!(%stable_id, %error, "construction failed");
                return;
            }
        };
        let mut instance =
            LiveInstance::new(handle, stable_id, class_name, spawn_params, host);

        if let Some(blob) = blob {
            match SyncContext::loading(&blob) {
                Ok(mut sync) => {
                    self.dispatcher.synchronize(&mut instance, &mut sync);
                }
                Err(error) => {
                    warn!(%stable_id, %error, "saved blob unreadable; constructing from defaults");
                }
            }
        }

        self.dispatcher
            .dispatch(LifecyclePoint::Initialize, &mut instance, 0.0);
        self.dispatcher
            .dispatch(LifecyclePoint::PostInitialize, &mut instance, 0.0);
        self.live.insert(stable_id, instance);
    }

    /// Pooling-off path: construct from class defaults, bypassing the state
    /// machine. The bookmark entry still supplies class and spawn params.
    fn prepare_direct(&mut self, stable_id: StableId) -> Result<InstanceHandle, PoolError> {
        // An instance (pooled or direct) may already be live under this id;
        // overwriting it would skip its Release pass and leak its handle.
        if self.live.contains_key(&stable_id) {
            return Err(PoolError::WrongState {
                operation: "Prepare",
                stable_id,
                state: self.state_of(stable_id),
            });
        }
        let entry = self
            .bookmarks
            .get(stable_id)
            .ok_or(PoolError::UnknownBookmark { stable_id })?;
        let class_name = entry.class_name.clone();
        let spawn_params = entry.spawn_params.clone();

        let handle = self.identity.allocate()?;
        self.identity.bind(handle, stable_id)?;
        let host = match self
            .classes
            .construct(&class_name, handle, stable_id, &spawn_params)
        {
            Ok(host) => host,
            Err(error) => {
                // Roll the allocation back; nothing else changed yet.
                let _ = self.identity.free(handle);
                return Err(error);
            }
        };
        let mut instance =
            LiveInstance::new(handle, stable_id, class_name, spawn_params, host);
        instance.direct = true;

        self.dispatcher
            .dispatch(LifecyclePoint::Initialize, &mut instance, 0.0);
        self.dispatcher
            .dispatch(LifecyclePoint::PostInitialize, &mut instance, 0.0);
        self.live.insert(stable_id, instance);
        debug!(%stable_id, %handle, "constructed directly (pooling disabled)");
        Ok(handle)
    }

    /// Teardown for a direct-constructed instance: no synchronize, no blob,
    /// no state-machine transition.
    fn return_direct(&mut self, stable_id: StableId) -> bool {
        let Some(mut instance) = self.live.remove(&stable_id) else {
            return false;
        };
        self.dispatcher
            .dispatch(LifecyclePoint::Release, &mut instance, 0.0);
        if let Err(error) = self.identity.free(instance.handle()) {
            warn!(%stable_id, %error, "handle free failed during direct destroy");
        }
        debug!(%stable_id, "destroyed directly (pooling disabled)");
        true
    }

    fn insert_entry(&mut self, stable_id: StableId, entry: BookmarkEntry) {
        match self
            .bookmarks
            .create(stable_id, entry.class_name.clone(), entry.spawn_params.clone())
        {
            Ok(slot) => {
                slot.metadata = entry.metadata;
            }
            Err(error) => warn!(%stable_id, %error, "lazy bookmark creation failed"),
        }
        self.states.entry(stable_id).or_insert(PoolState::Bookmarked);
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("bookmarked", &self.bookmarks.len())
            .field("live", &self.live.len())
            .field("deferred", &self.deferred.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
