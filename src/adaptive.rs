//! Swappable shared values.
//!
//! Holds process-lifetime state that is read on every call but replaced only
//! rarely, such as a compiled script digest after the store loses it.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// `DynamicConfig<T>` gives lock-free reads and atomic replacement for shared values.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely. Clones observe the new value.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}
