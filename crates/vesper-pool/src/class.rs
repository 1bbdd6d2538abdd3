//! The host-class registry: class name to constructor.
//!
//! Constructed explicitly by the embedding application and handed to the
//! [`PoolRegistry`](crate::registry::PoolRegistry) — never a process-wide
//! singleton, so tests and tools can build isolated registries.

use std::collections::HashMap;

use crate::bookmark::SpawnParams;
use crate::handle::InstanceHandle;
use crate::identity::StableId;
use crate::lifecycle::HostObject;
use crate::PoolError;

/// Constructor for a registered host class.
pub type HostCtor =
    Box<dyn Fn(InstanceHandle, StableId, &SpawnParams) -> Box<dyn HostObject>>;

// ---------------------------------------------------------------------------
// ClassRegistry
// ---------------------------------------------------------------------------

/// Maps class names to host constructors, populated at startup.
#[derive(Default)]
pub struct ClassRegistry {
    ctors: HashMap<String, HostCtor>,
}

impl ClassRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Register a constructor under `class_name`. Re-registration replaces
    /// the previous constructor.
    pub fn register<F>(&mut self, class_name: impl Into<String>, ctor: F)
    where
        F: Fn(InstanceHandle, StableId, &SpawnParams) -> Box<dyn HostObject> + 'static,
    {
        self.ctors.insert(class_name.into(), Box::new(ctor));
    }

    /// Construct a host of the named class.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NoSuchClass`] if the class is not registered.
    pub fn construct(
        &self,
        class_name: &str,
        handle: InstanceHandle,
        stable_id: StableId,
        params: &SpawnParams,
    ) -> Result<Box<dyn HostObject>, PoolError> {
        let ctor = self.ctors.get(class_name).ok_or_else(|| PoolError::NoSuchClass {
            class_name: class_name.to_owned(),
        })?;
        Ok(ctor(handle, stable_id, params))
    }

    /// Whether `class_name` has a constructor.
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.ctors.contains_key(class_name)
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    /// Whether no class is registered.
    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.ctors.len())
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

    struct CrateHost;

    impl LifecycleParticipant for CrateHost {
        fn participant_name(&self) -> &str {
            "crate"
        }
    }

    impl HostObject for CrateHost {
        fn class_name(&self) -> &str {
            "Crate"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn construct_registered_class() {
        let mut classes = ClassRegistry::new();
        classes.register("Crate", |_h, _sid, _params| Box::new(CrateHost));
        assert!(classes.is_registered("Crate"));

        let host = classes
            .construct(
                "Crate",
                InstanceHandle::from_raw(0),
                StableId::from_raw(1),
                &SpawnParams::named("c"),
            )
            .unwrap();
        assert_eq!(host.class_name(), "Crate");
    }

    #[test]
    fn unregistered_class_fails() {
        let classes = ClassRegistry::new();
        assert!(matches!(
            classes.construct(
                "Ghost",
                InstanceHandle::from_raw(0),
                StableId::from_raw(1),
                &SpawnParams::named("g"),
            ),
            Err(PoolError::NoSuchClass { .. })
        ));
    }

    #[test]
    fn registries_are_isolated() {
        let mut a = ClassRegistry::new();
        a.register("Crate", |_h, _s, _p| Box::new(CrateHost));
        let b = ClassRegistry::new();
        assert!(a.is_registered("Crate"));
        assert!(!b.is_registered("Crate"));
    }
}
