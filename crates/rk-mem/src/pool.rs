use core::cell::RefCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use critical_section::Mutex;
use thiserror::Error;

use crate::PoolStats;

/// Errors reported when a block is handed back.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The slot is already free, or was re-issued since the handle was made.
    #[error("block {index} returned twice")]
    DoubleFree { index: u32 },
    /// The handle belongs to a different pool.
    #[error("block does not belong to this pool")]
    ForeignBlock,
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

struct PoolState<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    stats: PoolStats,
}

struct PoolInner<T> {
    name: String,
    state: Mutex<RefCell<PoolState<T>>>,
}

/// Fixed-capacity pool of blocks of type `T`.
///
/// Cloning a `Pool` clones the handle; all clones share the same blocks.
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> Pool<T> {
    /// Preallocates `capacity` blocks, each initialized by `init`.
    pub fn new(name: impl Into<String>, capacity: usize, mut init: impl FnMut() -> T) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let slots = (0..capacity)
            .map(|_| Slot {
                value: Some(init()),
                generation: 0,
            })
            .collect();
        // Reversed so the first allocation hands out slot 0.
        let free = (0..capacity as u32).rev().collect();

        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                state: Mutex::new(RefCell::new(PoolState {
                    slots,
                    free,
                    stats: PoolStats::new(capacity),
                })),
            }),
        }
    }

    /// Takes a free block, or `None` if all blocks are outstanding.
    pub fn alloc(&self) -> Option<PoolBox<T>> {
        self.inner.take()
    }

    /// Returns a block to the pool, consuming the handle.
    pub fn free(&self, mut block: PoolBox<T>) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&self.inner, &block.pool) {
            return Err(PoolError::ForeignBlock);
        }
        block.release()
    }
}

impl<T: Default + Send> Pool<T> {
    pub fn with_default(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(name, capacity, T::default)
    }
}

impl<T> Pool<T> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capacity(&self) -> usize {
        self.stats().capacity
    }

    /// Number of blocks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.stats().in_use
    }

    pub fn stats(&self) -> PoolStats {
        critical_section::with(|cs| self.inner.state.borrow_ref(cs).stats)
    }

    /// True if both handles refer to the same pool.
    pub fn same_pool(&self, other: &Pool<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> PoolInner<T> {
    fn take(self: &Arc<Self>) -> Option<PoolBox<T>> {
        let taken = critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(index) = state.free.pop() else {
                state.stats.on_exhausted();
                return None;
            };
            let slot = &mut state.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            let generation = slot.generation;
            let value = slot.value.take();
            state.stats.on_alloc();
            value.map(|value| (index, generation, value))
        })?;

        let (index, generation, value) = taken;
        Some(PoolBox {
            value: Some(value),
            index,
            generation,
            pool: Arc::clone(self),
        })
    }

    fn put_back(&self, index: u32, generation: u32, value: T) -> Result<(), PoolError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let slot = state
                .slots
                .get_mut(index as usize)
                .ok_or(PoolError::ForeignBlock)?;
            if slot.value.is_some() || slot.generation != generation {
                return Err(PoolError::DoubleFree { index });
            }
            slot.value = Some(value);
            state.free.push(index);
            state.stats.on_dealloc();
            Ok(())
        })
    }
}

/// Exclusive handle to one pooled block.
///
/// The handle is move-only: sending it through a queue or freeing it makes the
/// previous binding unusable at compile time. Dropping a handle returns its
/// block to the pool.
///
/// ```
/// use rk_mem::Pool;
///
/// let pool: Pool<u32> = Pool::with_default("frames", 1);
/// let mut block = pool.alloc().unwrap();
/// *block = 7;
/// pool.free(block).unwrap();
/// assert!(pool.alloc().is_some());
/// ```
///
/// Touching a block after handing it back does not compile:
///
/// ```compile_fail,E0382
/// use rk_mem::Pool;
///
/// let pool: Pool<u32> = Pool::with_default("frames", 1);
/// let block = pool.alloc().unwrap();
/// pool.free(block).unwrap();
/// let value = *block;
/// ```
pub struct PoolBox<T> {
    value: Option<T>,
    index: u32,
    generation: u32,
    pool: Arc<PoolInner<T>>,
}

impl<T> PoolBox<T> {
    /// Slot index of this block inside its pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Name of the owning pool.
    pub fn pool_name(&self) -> &str {
        &self.pool.name
    }

    fn release(&mut self) -> Result<(), PoolError> {
        match self.value.take() {
            Some(value) => self.pool.put_back(self.index, self.generation, value),
            None => Err(PoolError::DoubleFree { index: self.index }),
        }
    }
}

impl<T> Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("pool block used after release"),
        }
    }
}

impl<T> DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("pool block used after release"),
        }
    }
}

impl<T> Drop for PoolBox<T> {
    fn drop(&mut self) {
        if self.value.is_some() {
            let _ = self.release();
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBox")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_generation_is_rejected() {
        let pool: Pool<u32> = Pool::with_default("p", 1);
        let block = pool.alloc().unwrap();
        let (index, generation) = (block.index, block.generation);
        drop(block);

        assert_eq!(
            pool.inner.put_back(index, generation, 7),
            Err(PoolError::DoubleFree { index })
        );
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn reissued_slot_rejects_old_generation() {
        let pool: Pool<u32> = Pool::with_default("p", 1);
        let first = pool.alloc().unwrap();
        let (index, old_generation) = (first.index, first.generation);
        pool.free(first).unwrap();

        let second = pool.alloc().unwrap();
        assert_eq!(second.index, index);
        assert_ne!(second.generation, old_generation);
        // Slot is occupied by `second`, so the stale return is refused.
        assert_eq!(
            pool.inner.put_back(index, old_generation, 1),
            Err(PoolError::DoubleFree { index })
        );
        drop(second);
        assert_eq!(pool.stats().free, 1);
    }

    #[test]
    fn pool_stats_track_usage() {
        let mut stats = PoolStats::new(10);

        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.free, 10);
        assert!(stats.is_idle());
        assert!(!stats.is_exhausted());

        stats.on_alloc();
        stats.on_alloc();
        assert_eq!(stats.free, 8);
        assert_eq!(stats.min_free, 8);
        assert_eq!(stats.utilization(), 20);

        stats.on_dealloc();
        assert_eq!(stats.free, 9);
        assert_eq!(stats.min_free, 8);
    }
}
