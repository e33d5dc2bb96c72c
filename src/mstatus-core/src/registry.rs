//! Name → plugin lookup table, populated once at startup.
//!
//! Each entry is a [`PluginDescriptor`] whose capabilities are fixed when it
//! is registered, so resolving a Source or Handler never inspects types at
//! runtime.

use crate::plugin::{Handler, Named, Source};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("plugin name must not be empty")]
    EmptyName,
    #[error("plugin {name:?} declares no capabilities")]
    NoCapabilities { name: String },
    #[error("plugin {name:?} is already registered")]
    Duplicate { name: String },
    #[error("registry is frozen; cannot register {name:?}")]
    Frozen { name: String },
}

/// Whether two plugin names refer to the same plugin.
///
/// Names compare case-insensitively, including non-ASCII letters.
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.chars().flat_map(char::to_lowercase).eq(b.chars().flat_map(char::to_lowercase))
}

/// A registered plugin and the capabilities it provides.
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    source: Option<Arc<dyn Source>>,
    handler: Option<Arc<dyn Handler>>,
}

impl PluginDescriptor {
    /// A descriptor with no capabilities yet; add them with
    /// [`with_source`](Self::with_source) / [`with_handler`](Self::with_handler).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            handler: None,
        }
    }

    pub fn source<S: Source + 'static>(plugin: S) -> Self {
        let name = plugin.name().to_owned();
        Self::new(name).with_source(Arc::new(plugin))
    }

    pub fn handler<H: Handler + 'static>(plugin: H) -> Self {
        let name = plugin.name().to_owned();
        Self::new(name).with_handler(Arc::new(plugin))
    }

    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_source(&self) -> Option<Arc<dyn Source>> {
        self.source.clone()
    }

    pub fn as_handler(&self) -> Option<Arc<dyn Handler>> {
        self.handler.clone()
    }

    pub fn is_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_handler(&self) -> bool {
        self.handler.is_some()
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("source", &self.source.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    plugins: Vec<PluginDescriptor>,
    frozen: bool,
}

/// Registry of available plugins.
///
/// Writes are expected only during startup; lookups may happen from any
/// task at any time.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor is unusable (empty name, no capabilities),
    /// the name is already taken, or the registry is frozen. Registration
    /// happens from startup code, so any of these is a programming error.
    pub fn register(&self, plugin: PluginDescriptor) {
        if let Err(err) = self.try_register(plugin) {
            panic!("plugin registration failed: {err}");
        }
    }

    pub fn try_register(&self, plugin: PluginDescriptor) -> Result<(), RegistryError> {
        if plugin.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if !plugin.is_source() && !plugin.is_handler() {
            return Err(RegistryError::NoCapabilities { name: plugin.name });
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.frozen {
            return Err(RegistryError::Frozen { name: plugin.name });
        }
        if inner
            .plugins
            .iter()
            .any(|p| names_match(&p.name, &plugin.name))
        {
            return Err(RegistryError::Duplicate { name: plugin.name });
        }
        tracing::debug!(plugin = %plugin.name, "registered plugin");
        inner.plugins.push(plugin);
        Ok(())
    }

    /// Reject any further registrations.
    pub fn freeze(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .frozen = true;
    }

    /// Registered names, in registration order.
    pub fn list(&self) -> Vec<String> {
        self.read(|inner| inner.plugins.iter().map(|p| p.name.clone()).collect())
    }

    /// Every descriptor, in registration order.
    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.read(|inner| inner.plugins.clone())
    }

    pub fn lookup(&self, name: &str) -> Option<PluginDescriptor> {
        self.read(|inner| {
            inner
                .plugins
                .iter()
                .find(|p| names_match(&p.name, name))
                .cloned()
        })
    }

    pub fn lookup_source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.lookup(name).and_then(|p| p.as_source())
    }

    pub fn lookup_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.lookup(name).and_then(|p| p.as_handler())
    }

    pub fn len(&self) -> usize {
        self.read(|inner| inner.plugins.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read(|inner| {
            f.debug_struct("Registry")
                .field("plugins", &inner.plugins)
                .field("frozen", &inner.frozen)
                .finish()
        })
    }
}
