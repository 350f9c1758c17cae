//! Runtime-reloadable settings.
//!
//! Holders read the current value per use instead of copying it at
//! construction, so a SIGHUP reload reaches components that are already
//! running.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Shared settings cell. Clones observe the same value.
pub struct ConfigStore<T> {
    current: Arc<ArcSwap<T>>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// The value in effect right now.
    pub fn load(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Replace the value for every holder.
    pub fn update(&self, value: T) {
        self.current.store(Arc::new(value));
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}
