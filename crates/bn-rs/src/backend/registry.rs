//! Runtime backend registry for dynamic backend selection.
//!
//! This module enables registering and selecting backends by name at runtime, avoiding hardcoded
//! backend types in callers. Backends can be registered from any crate (including external ones)
//! using the global registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use super::spec::ComputeBackend;
use crate::env;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn ComputeBackend> + Send + Sync>;

/// Name used when `BNRS_BACKEND` is unset or names an unknown backend.
pub const DEFAULT_BACKEND: &str = "cpu";

/// Global backend registry mapping backend names to constructors.
struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        let mut backends = self
            .backends
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if backends.insert(name.clone(), constructor).is_some() {
            log::debug!("replaced backend constructor for {name:?}");
        }
    }

    fn create(&self, name: &str) -> Option<Arc<dyn ComputeBackend>> {
        let registry = self
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let registry = self
            .backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names = registry.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register a backend by name with a constructor function.
///
/// The constructor will be called each time the backend is requested via `create_backend()`.
/// Registering an existing name replaces the previous constructor.
///
/// # Example
/// ```ignore
/// use bn_rs::backend::registry::register_backend;
///
/// pub fn register() {
///     register_backend("my_backend", || MyBackend::create());
/// }
/// ```
pub fn register_backend<B, F>(name: impl Into<String>, constructor: F)
where
    B: ComputeBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    global_registry().register(
        name.into(),
        Box::new(move || Arc::new(constructor()) as Arc<dyn ComputeBackend>),
    );
}

/// Create a backend instance by name.
///
/// Returns `None` if no backend with the given name has been registered.
pub fn create_backend(name: &str) -> Option<Arc<dyn ComputeBackend>> {
    global_registry().create(name)
}

/// List all registered backend names, sorted.
pub fn list_backends() -> Vec<String> {
    global_registry().list_backends()
}

/// Check if a backend with the given name is registered.
pub fn has_backend(name: &str) -> bool {
    global_registry().has_backend(name)
}

/// Creates the backend selected by `BNRS_BACKEND`, falling back to [`DEFAULT_BACKEND`].
pub fn default_backend() -> Option<Arc<dyn ComputeBackend>> {
    if let Some(name) = env::backend_override() {
        if let Some(backend) = create_backend(name) {
            return Some(backend);
        }
        log::warn!("BNRS_BACKEND={name:?} is not registered, falling back to {DEFAULT_BACKEND:?}");
    }
    create_backend(DEFAULT_BACKEND)
}
