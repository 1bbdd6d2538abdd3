//! Live instances: a host object plus its ordered extensions.
//!
//! The extension list is ordered — insertion order is callback order, always
//! — and a secondary `TypeId -> indices` index answers capability queries
//! ("the first extension of type X") without scanning or disturbing that
//! order.

use std::any::TypeId;
use std::collections::HashMap;

use tracing::debug;

use crate::bookmark::SpawnParams;
use crate::handle::InstanceHandle;
use crate::identity::StableId;
use crate::lifecycle::{Extension, ExtensionOp, HostObject};

// ---------------------------------------------------------------------------
// LiveInstance
// ---------------------------------------------------------------------------

/// A materialized pool instance: host, extensions, and its transient handle.
pub struct LiveInstance {
    handle: InstanceHandle,
    stable_id: StableId,
    class_name: String,
    /// Copy of the spawn snapshot, kept so a bookmark entry can be created
    /// lazily on first return.
    spawn_params: SpawnParams,
    host: Box<dyn HostObject>,
    extensions: Vec<Box<dyn Extension>>,
    /// Capability index: extension type -> positions in `extensions`, in
    /// list order.
    by_type: HashMap<TypeId, Vec<usize>>,
    /// Constructed outside the pooling state machine (pooling disabled).
    pub(crate) direct: bool,
}

impl LiveInstance {
    pub(crate) fn new(
        handle: InstanceHandle,
        stable_id: StableId,
        class_name: String,
        spawn_params: SpawnParams,
        host: Box<dyn HostObject>,
    ) -> Self {
        Self {
            handle,
            stable_id,
            class_name,
            spawn_params,
            host,
            extensions: Vec::new(),
            by_type: HashMap::new(),
            direct: false,
        }
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn stable_id(&self) -> StableId {
        self.stable_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn spawn_params(&self) -> &SpawnParams {
        &self.spawn_params
    }

    /// The host object.
    pub fn host(&self) -> &dyn HostObject {
        self.host.as_ref()
    }

    /// Mutable host access.
    pub fn host_mut(&mut self) -> &mut dyn HostObject {
        self.host.as_mut()
    }

    /// Typed host access for callers that know the concrete class.
    pub fn host_as<T: HostObject + 'static>(&self) -> Option<&T> {
        self.host.as_any().downcast_ref::<T>()
    }

    /// Mutable typed host access.
    pub fn host_as_mut<T: HostObject + 'static>(&mut self) -> Option<&mut T> {
        self.host.as_any_mut().downcast_mut::<T>()
    }

    /// Split borrow for the dispatcher: host and extension list at once.
    pub(crate) fn parts_mut(&mut self) -> (&mut dyn HostObject, &mut [Box<dyn Extension>]) {
        (self.host.as_mut(), self.extensions.as_mut_slice())
    }

    // -- extension management ----------------------------------------------

    /// Attach an extension at the end of the list.
    ///
    /// Never call this from inside a lifecycle hook — hooks must queue
    /// through [`InstanceCx`](crate::lifecycle::InstanceCx) instead, and the
    /// borrow rules make the direct call impossible there anyway.
    pub fn add_extension(&mut self, extension: Box<dyn Extension>) {
        let type_id = extension.as_any().type_id();
        let index = self.extensions.len();
        self.extensions.push(extension);
        self.by_type.entry(type_id).or_default().push(index);
    }

    /// Detach and return the first extension of type `T`, preserving the
    /// relative order of the rest.
    pub fn remove_extension<T: Extension + 'static>(&mut self) -> Option<Box<dyn Extension>> {
        let index = *self.by_type.get(&TypeId::of::<T>())?.first()?;
        let removed = self.extensions.remove(index);
        self.rebuild_index();
        Some(removed)
    }

    /// First extension of type `T`, if attached.
    pub fn extension<T: Extension + 'static>(&self) -> Option<&T> {
        let index = *self.by_type.get(&TypeId::of::<T>())?.first()?;
        self.extensions[index].as_any().downcast_ref::<T>()
    }

    /// Mutable access to the first extension of type `T`.
    pub fn extension_mut<T: Extension + 'static>(&mut self) -> Option<&mut T> {
        let index = *self.by_type.get(&TypeId::of::<T>())?.first()?;
        self.extensions[index].as_any_mut().downcast_mut::<T>()
    }

    /// Number of attached extensions.
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Names of attached extensions, in callback order.
    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions
            .iter()
            .map(|e| e.participant_name())
            .collect()
    }

    /// Apply extension ops queued during a fan-out.
    pub(crate) fn apply_ops(&mut self, ops: Vec<ExtensionOp>) {
        for op in ops {
            match op {
                ExtensionOp::Add(ext) => {
                    debug!(
                        instance = %self.stable_id,
                        extension = ext.participant_name(),
                        "applying deferred extension add"
                    );
                    self.add_extension(ext);
                }
                ExtensionOp::Remove { type_id, type_name } => {
                    let Some(&index) =
                        self.by_type.get(&type_id).and_then(|v| v.first())
                    else {
                        debug!(
                            instance = %self.stable_id,
                            extension = type_name,
                            "deferred extension remove targeted an absent type"
                        );
                        continue;
                    };
                    self.extensions.remove(index);
                    self.rebuild_index();
                }
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.by_type.clear();
        for (index, ext) in self.extensions.iter().enumerate() {
            self.by_type
                .entry(ext.as_any().type_id())
                .or_default()
                .push(index);
        }
    }
}

impl std::fmt::Debug for LiveInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveInstance")
            .field("handle", &self.handle)
            .field("stable_id", &self.stable_id)
            .field("class_name", &self.class_name)
            .field("extensions", &self.extension_count())
            .field("direct", &self.direct)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleParticipant;
    use std::any::Any;

    struct DummyHost;

    impl LifecycleParticipant for DummyHost {
        fn participant_name(&self) -> &str {
            "dummy"
        }
    }

    impl HostObject for DummyHost {
        fn class_name(&self) -> &str {
            "Dummy"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Armor(u32);
    struct Sensor;

    impl LifecycleParticipant for Armor {
        fn participant_name(&self) -> &str {
            "armor"
        }
    }

    impl Extension for Armor {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    impl LifecycleParticipant for Sensor {
        fn participant_name(&self) -> &str {
            "sensor"
        }
    }

    impl Extension for Sensor {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn instance() -> LiveInstance {
        LiveInstance::new(
            InstanceHandle::from_raw(0),
            StableId::from_raw(1),
            "Dummy".to_owned(),
            SpawnParams::named("d"),
            Box::new(DummyHost),
        )
    }

    #[test]
    fn typed_lookup_finds_first_of_type() {
        let mut inst = instance();
        inst.add_extension(Box::new(Armor(10)));
        inst.add_extension(Box::new(Sensor));
        inst.add_extension(Box::new(Armor(99)));

        assert_eq!(inst.extension::<Armor>().unwrap().0, 10);
        assert!(inst.extension::<Sensor>().is_some());
        assert_eq!(inst.extension_count(), 3);
    }

    #[test]
    fn remove_preserves_order_of_rest() {
        let mut inst = instance();
        inst.add_extension(Box::new(Armor(1)));
        inst.add_extension(Box::new(Sensor));
        inst.add_extension(Box::new(Armor(2)));

        let removed = inst.remove_extension::<Armor>().unwrap();
        assert_eq!(removed.as_any().downcast_ref::<Armor>().unwrap().0, 1);
        assert_eq!(inst.extension_names(), vec!["sensor", "armor"]);
        // Index rebuilt: next Armor lookup hits the remaining one.
        assert_eq!(inst.extension::<Armor>().unwrap().0, 2);
    }

    #[test]
    fn extension_mut_mutates_in_place() {
        let mut inst = instance();
        inst.add_extension(Box::new(Armor(5)));
        inst.extension_mut::<Armor>().unwrap().0 = 7;
        assert_eq!(inst.extension::<Armor>().unwrap().0, 7);
    }

    #[test]
    fn apply_ops_add_and_remove() {
        let mut inst = instance();
        inst.add_extension(Box::new(Sensor));
        inst.apply_ops(vec![
            ExtensionOp::Add(Box::new(Armor(3))),
            ExtensionOp::Remove {
                type_id: TypeId::of::<Sensor>(),
                type_name: "Sensor",
            },
        ]);
        assert_eq!(inst.extension_names(), vec!["armor"]);
    }

    #[test]
    fn remove_absent_type_is_harmless() {
        let mut inst = instance();
        assert!(inst.remove_extension::<Armor>().is_none());
        inst.apply_ops(vec![ExtensionOp::Remove {
            type_id: TypeId::of::<Armor>(),
            type_name: "Armor",
        }]);
        assert_eq!(inst.extension_count(), 0);
    }
}
