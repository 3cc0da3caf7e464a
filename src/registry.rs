//! Named-variant registries for pluggable handlers and executors.
//!
//! A [`PluginRegistry`] maps a string name to a constructor for one namespace
//! (event handlers, executors). The namespace's capability is the instance
//! type `I`: only constructors producing `I` can be registered, so a variant
//! that does not implement the capability is rejected at compile time.
//!
//! Registries are plain values. Build one per namespace at start-up, register
//! variants explicitly, and share it by `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

type Constructor<A, I> = Arc<dyn Fn(A) -> I + Send + Sync>;

/// A table of named constructors producing instances of `I` from `A`.
pub struct PluginRegistry<A, I> {
    namespace: &'static str,
    variants: HashMap<String, Constructor<A, I>>,
}

impl<A, I> PluginRegistry<A, I> {
    /// Creates an empty registry for `namespace` (used in log messages).
    pub fn new(namespace: &'static str) -> Self {
        PluginRegistry {
            namespace,
            variants: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Registers `constructor` under `name`.
    ///
    /// Returns `false` (and logs) without changing the registry if `name` is
    /// empty or already registered.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> bool
    where
        F: Fn(A) -> I + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            warn!(namespace = self.namespace, "Cannot register variant with empty name");
            return false;
        }
        if self.variants.contains_key(&name) {
            warn!(
                namespace = self.namespace,
                name = %name,
                "Cannot register variant, name already registered"
            );
            return false;
        }

        info!(namespace = self.namespace, name = %name, "Registered variant");
        self.variants.insert(name, Arc::new(constructor));
        true
    }

    /// Registers `constructor` under `name`, builder style.
    pub fn with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(A) -> I + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.variants.contains_key(name)
    }

    /// Constructs a new instance of the variant registered as `name`.
    ///
    /// Returns `None` if `name` is empty or unregistered.
    pub fn create(&self, name: &str, args: A) -> Option<I> {
        if name.is_empty() {
            return None;
        }
        match self.variants.get(name) {
            Some(constructor) => Some(constructor(args)),
            None => {
                error!(
                    namespace = self.namespace,
                    name = %name,
                    "Cannot create instance, unknown variant"
                );
                None
            }
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.variants.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl<A, I> fmt::Debug for PluginRegistry<A, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("namespace", &self.namespace)
            .field("variants", &self.names())
            .finish()
    }
}
