//! A small object pool for per-request allocations.
//!
//! The dispatch path builds a parameter bag for every request; reusing
//! them keeps the maps' capacity warm. The pool is bounded, anything
//! returned beyond the cap is simply dropped.

use std::sync::Mutex;

pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    cap: usize,
}

impl<T> Pool<T> {
    pub fn new(cap: usize) -> Self {
        Self { items: Mutex::new(Vec::new()), cap }
    }

    /// Take a pooled item, or build a fresh one.
    pub fn take(&self, factory: impl FnOnce() -> T) -> T {
        self.items.lock().map(|mut items| items.pop()).ok().flatten().unwrap_or_else(factory)
    }

    /// Return an item. The caller resets it first; the pool does not know
    /// how.
    pub fn put(&self, item: T) {
        if let Ok(mut items) = self.items.lock() {
            if items.len() < self.cap {
                items.push(item);
            }
        }
    }

    pub fn available(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}
