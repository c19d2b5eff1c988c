//! Passive shared state guarded by one lock per resource.
//!
//! A resource's procedures run in the caller's context. [`Resource::call`]
//! takes the lock on entry and the guard releases it on every exit path, so a
//! procedure that returns early or propagates an error with `?` cannot leave
//! the resource held.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::ComponentId;
use crate::sync::{Arc, Mutex};

pub(crate) struct ResourceCell<T> {
    id: ComponentId,
    name: String,
    state: Mutex<T>,
    calls: AtomicU64,
}

/// Handle to a lock-guarded resource. Clones share the same state.
pub struct Resource<T> {
    cell: Arc<ResourceCell<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Send + 'static> Resource<T> {
    /// Creates a standalone resource. Systems normally declare resources via
    /// [`SystemBuilder::resource`](crate::SystemBuilder::resource).
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        Self::with_id(ComponentId(u16::MAX), name.into(), initial)
    }

    pub(crate) fn with_id(id: ComponentId, name: String, initial: T) -> Self {
        Self {
            cell: Arc::new(ResourceCell {
                id,
                name,
                state: Mutex::new(initial),
                calls: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_cell(cell: Arc<ResourceCell<T>>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> Arc<ResourceCell<T>> {
        Arc::clone(&self.cell)
    }
}

impl<T> Resource<T> {
    /// Runs `procedure` with exclusive access to the resource state.
    pub fn call<R>(&self, procedure: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.cell.state.lock();
        self.cell.calls.fetch_add(1, Ordering::Relaxed);
        procedure(&mut state)
    }

    /// Runs `procedure` only if the resource is free right now.
    pub fn try_call<R>(&self, procedure: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.cell.state.try_lock()?;
        self.cell.calls.fetch_add(1, Ordering::Relaxed);
        Some(procedure(&mut state))
    }

    pub fn id(&self) -> ComponentId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Number of procedure calls served so far.
    pub fn calls(&self) -> u64 {
        self.cell.calls.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("calls", &self.calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u32,
    }

    impl Counter {
        fn bump_unless(&mut self, limit: u32) -> Result<u32, u32> {
            if self.value >= limit {
                return Err(self.value);
            }
            self.value += 1;
            Ok(self.value)
        }
    }

    #[test]
    fn early_return_releases_the_lock() {
        let counter = Resource::new("counter", Counter { value: 1 });

        assert_eq!(counter.call(|c| c.bump_unless(1)), Err(1));
        // A leaked guard would make this fail.
        assert!(counter.try_call(|c| c.value).is_some());
        assert_eq!(counter.calls(), 2);
    }

    #[test]
    fn try_call_refuses_while_held() {
        let counter = Resource::new("counter", Counter::default());
        let inner = counter.clone();
        let nested = counter.call(|_| inner.try_call(|c| c.value));
        assert_eq!(nested, None);
    }
}
