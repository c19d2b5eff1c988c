//! Pool access ports.
//!
//! Components never own a pool; they get a [`PoolPort`] bound to one of the
//! pools declared on the system. Allocation and release go straight to the
//! underlying [`rk_mem::Pool`] and are mirrored into the trace stream.

use core::fmt;
use std::any::Any;

use rk_mem::{Pool, PoolBox, PoolError, PoolStats};
use rk_spy::records;

use crate::event::PoolId;
use crate::sync::Arc;
use crate::trace::Spy;

/// Handle to a declared memory pool.
pub struct PoolPort<T> {
    id: PoolId,
    pool: Pool<T>,
    spy: Spy,
}

impl<T> Clone for PoolPort<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pool: self.pool.clone(),
            spy: self.spy.clone(),
        }
    }
}

impl<T: Send + 'static> PoolPort<T> {
    pub(crate) fn new(id: PoolId, pool: Pool<T>, spy: Spy) -> Self {
        Self { id, pool, spy }
    }

    /// Takes one block, or `None` when every block is outstanding.
    pub fn alloc(&self) -> Option<PoolBox<T>> {
        match self.pool.alloc() {
            Some(block) => {
                let stats = self.pool.stats();
                self.spy.emit(records::pool::GET, |p| {
                    p.push_u16(self.id.0)
                        .push_u16(stats.free as u16)
                        .push_u16(stats.min_free as u16);
                });
                Some(block)
            }
            None => {
                log::warn!(
                    "pool '{}' exhausted ({} blocks outstanding)",
                    self.pool.name(),
                    self.pool.capacity()
                );
                self.spy.emit(records::pool::EXHAUSTED, |p| {
                    p.push_u16(self.id.0);
                });
                None
            }
        }
    }

    /// Returns a block. Dropping the [`PoolBox`] does the same without the
    /// foreign-block check.
    pub fn free(&self, block: PoolBox<T>) -> Result<(), PoolError> {
        self.pool.free(block)?;
        let free = self.pool.stats().free;
        self.spy.emit(records::pool::PUT, |p| {
            p.push_u16(self.id.0).push_u16(free as u16);
        });
        Ok(())
    }
}

impl<T> PoolPort<T> {
    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Blocks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl<T> fmt::Debug for PoolPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolPort")
            .field("id", &self.id)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Type-erased view of a pool for wiring and diagnostics.
pub(crate) trait PoolControl: Send + Sync {
    fn stats(&self) -> PoolStats;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn item_type(&self) -> &'static str;
}

impl<T: Send + 'static> PoolControl for PoolPort<T> {
    fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn item_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}
