//! Extension component registry.
//!
//! The runtime only carries the registry through to script runs; the engine
//! is the one that consults it.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::{debug, info};

/// Metadata for one registered extension component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredComponent {
    /// Unique component name.
    pub name: String,
    /// Local directory the component's assets are served from.
    pub path: Option<PathBuf>,
    /// Development server URL, when the component is served externally.
    pub url: Option<String>,
}

impl RegisteredComponent {
    /// A component served from a local directory.
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            url: None,
        }
    }

    /// A component served from an external URL.
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            url: Some(url.into()),
        }
    }
}

/// Supplies metadata for registered extension components.
pub trait ComponentRegistry: Send + Sync {
    /// Register a component, replacing any previous one with the same name.
    fn register_component(&self, component: RegisteredComponent);

    /// Look up a component by name.
    fn get_component(&self, name: &str) -> Option<RegisteredComponent>;

    /// Local asset directory of a component, if it has one.
    fn get_component_path(&self, name: &str) -> Option<PathBuf> {
        self.get_component(name).and_then(|c| c.path)
    }

    /// All registered components.
    fn components(&self) -> Vec<RegisteredComponent>;
}

/// In-process component registry.
#[derive(Default)]
pub struct LocalComponentRegistry {
    components: RwLock<HashMap<String, RegisteredComponent>>,
}

impl LocalComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComponentRegistry for LocalComponentRegistry {
    fn register_component(&self, component: RegisteredComponent) {
        let name = component.name.clone();
        let previous = self.components.write().insert(name.clone(), component);
        if previous.is_some() {
            info!(component = %name, "component re-registered");
        } else {
            debug!(component = %name, "component registered");
        }
    }

    fn get_component(&self, name: &str) -> Option<RegisteredComponent> {
        self.components.read().get(name).cloned()
    }

    fn components(&self) -> Vec<RegisteredComponent> {
        self.components.read().values().cloned().collect()
    }
}
