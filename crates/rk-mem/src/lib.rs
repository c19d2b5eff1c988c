//! # rk-mem
//!
//! Fixed-capacity block pools with deterministic, O(1) allocation.
//!
//! A [`Pool`] owns `N` preallocated blocks of a single element type. Taking a
//! block out yields a move-only [`PoolBox`]; giving it back (explicitly with
//! [`Pool::free`] or implicitly on drop) returns the block to the free set.
//! Nothing is heap-allocated after [`Pool::new`] returns.

mod pool;

pub use pool::{Pool, PoolBox, PoolError};

/// Memory pool statistics for debugging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of blocks in the pool
    pub capacity: usize,
    /// Number of free blocks currently available
    pub free: usize,
    /// Number of blocks currently handed out
    pub in_use: usize,
    /// Minimum number of free blocks ever reached
    pub min_free: usize,
    /// Number of allocation requests refused because the pool was empty
    pub exhausted: usize,
}

impl PoolStats {
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: capacity,
            in_use: 0,
            min_free: capacity,
            exhausted: 0,
        }
    }

    /// Update statistics after allocation
    pub fn on_alloc(&mut self) {
        self.in_use += 1;
        self.free -= 1;
        if self.free < self.min_free {
            self.min_free = self.free;
        }
    }

    /// Update statistics after deallocation
    pub fn on_dealloc(&mut self) {
        if self.in_use > 0 {
            self.in_use -= 1;
            self.free += 1;
        }
    }

    pub fn on_exhausted(&mut self) {
        self.exhausted += 1;
    }

    /// True when every block is handed out.
    pub const fn is_exhausted(&self) -> bool {
        self.free == 0
    }

    /// True when every block is back in the pool.
    pub const fn is_idle(&self) -> bool {
        self.in_use == 0
    }

    /// Get utilization as a percentage (0-100)
    pub fn utilization(&self) -> u8 {
        if self.capacity == 0 {
            0
        } else {
            ((self.in_use * 100) / self.capacity) as u8
        }
    }
}
