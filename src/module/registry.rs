//! Registered modules, in dispatch order.

use super::contract::WebModule;
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

struct Registered {
    type_id: TypeId,
    module: Arc<dyn WebModule>,
}

/// Holds at most one module per concrete type.
///
/// Dispatch iterates a [`snapshot`](Self::snapshot), so registering or
/// unregistering while requests are in flight never blocks a handler.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Registered>>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|module| module.name().to_string())
            .collect();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}

impl ModuleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. A second module of the same type is refused with
    /// a warning and `false`.
    pub fn register<M: WebModule>(&self, module: M) -> bool {
        let type_id = TypeId::of::<M>();
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);

        if modules.iter().any(|entry| entry.type_id == type_id) {
            warn!(module = module.name(), "Module already registered");
            return false;
        }

        debug!(
            module = module.name(),
            handlers = module.handlers().len(),
            "Module registered"
        );
        modules.push(Registered {
            type_id,
            module: Arc::new(module),
        });
        true
    }

    /// Remove the module of type `M`. Logs a warning and returns `false` if
    /// none is registered.
    pub fn unregister<M: WebModule>(&self) -> bool {
        let type_id = TypeId::of::<M>();
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);

        match modules.iter().position(|entry| entry.type_id == type_id) {
            Some(index) => {
                let removed = modules.remove(index);
                debug!(module = removed.module.name(), "Module unregistered");
                true
            },
            None => {
                warn!(
                    module = std::any::type_name::<M>(),
                    "Module is not registered"
                );
                false
            },
        }
    }

    /// Whether a module of type `M` is registered.
    #[must_use]
    pub fn contains<M: WebModule>(&self) -> bool {
        let type_id = TypeId::of::<M>();
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry.type_id == type_id)
    }

    /// Number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Modules in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn WebModule>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|entry| Arc::clone(&entry.module))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::HandlerMap;

    struct First(HandlerMap);
    struct Second(HandlerMap);

    impl WebModule for First {
        fn name(&self) -> &str {
            "first"
        }

        fn handlers(&self) -> &HandlerMap {
            &self.0
        }
    }

    impl WebModule for Second {
        fn name(&self) -> &str {
            "second"
        }

        fn handlers(&self) -> &HandlerMap {
            &self.0
        }
    }

    #[test]
    fn test_register_once_per_type() {
        let registry = ModuleRegistry::new();
        assert!(registry.register(First(HandlerMap::new())));
        assert!(!registry.register(First(HandlerMap::new())));
        assert!(registry.register(Second(HandlerMap::new())));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains::<First>());
    }

    #[test]
    fn test_snapshot_in_registration_order() {
        let registry = ModuleRegistry::new();
        registry.register(Second(HandlerMap::new()));
        registry.register(First(HandlerMap::new()));

        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|module| module.name().to_string())
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_unregister() {
        let registry = ModuleRegistry::new();
        registry.register(First(HandlerMap::new()));

        assert!(!registry.unregister::<Second>());
        assert!(registry.unregister::<First>());
        assert!(!registry.unregister::<First>());
        assert!(registry.is_empty());
    }
}
