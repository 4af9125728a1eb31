//! Bounded identifier pool.
//!
//! Issues the smallest unused id below a fixed capacity and takes ids back on
//! release. The room engine is the only caller, from its serialized event
//! loop, so there is no internal locking.
//!
//! # Invariants
//!
//! - Every id in `released` is below `high_water`
//! - An id is in use iff it is below `high_water` and not in `released`
//! - `high_water` never exceeds `capacity`

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors from [`IdAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Every id below the capacity is in use.
    #[error("identifier pool exhausted ({capacity} ids in use)")]
    Exhausted {
        /// Pool capacity.
        capacity: u32,
    },
}

/// Smallest-first identifier allocator.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    capacity: u32,
    /// One past the largest id ever handed out and not yet compacted away.
    high_water: u32,
    /// Freed ids below `high_water`, kept sorted so the smallest comes first.
    released: BTreeSet<u32>,
}

impl IdAllocator {
    /// Create an allocator issuing ids in `0..capacity`.
    pub fn new(capacity: u32) -> Self {
        Self { capacity, high_water: 0, released: BTreeSet::new() }
    }

    /// Pool capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of ids currently handed out.
    pub fn in_use(&self) -> usize {
        self.high_water as usize - self.released.len()
    }

    /// Whether `id` is currently handed out.
    pub fn is_allocated(&self, id: u32) -> bool {
        id < self.high_water && !self.released.contains(&id)
    }

    /// Take the smallest unused id.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::Exhausted`] when every id is in use.
    pub fn allocate(&mut self) -> Result<u32, AllocError> {
        if let Some(id) = self.released.pop_first() {
            return Ok(id);
        }
        if self.high_water < self.capacity {
            let id = self.high_water;
            self.high_water += 1;
            return Ok(id);
        }
        Err(AllocError::Exhausted { capacity: self.capacity })
    }

    /// Return `id` to the pool. Freeing an id that is not allocated is a no-op.
    pub fn free(&mut self, id: u32) {
        if !self.is_allocated(id) {
            return;
        }
        self.released.insert(id);

        // Shrink the high-water mark so `released` stays small.
        while self.high_water > 0 && self.released.remove(&(self.high_water - 1)) {
            self.high_water -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_smallest_first() {
        let mut ids = IdAllocator::new(8);
        assert_eq!(ids.allocate(), Ok(0));
        assert_eq!(ids.allocate(), Ok(1));
        assert_eq!(ids.allocate(), Ok(2));

        ids.free(1);
        assert_eq!(ids.allocate(), Ok(1));
        assert_eq!(ids.allocate(), Ok(3));
    }

    #[test]
    fn exhaustion_is_reported() {
        let mut ids = IdAllocator::new(2);
        ids.allocate().unwrap();
        ids.allocate().unwrap();

        assert_eq!(ids.allocate(), Err(AllocError::Exhausted { capacity: 2 }));

        ids.free(0);
        assert_eq!(ids.allocate(), Ok(0));
    }

    #[test]
    fn zero_capacity_is_always_exhausted() {
        let mut ids = IdAllocator::new(0);
        assert!(ids.allocate().is_err());
    }

    #[test]
    fn double_free_is_noop() {
        let mut ids = IdAllocator::new(4);
        let a = ids.allocate().unwrap();
        let b = ids.allocate().unwrap();

        ids.free(a);
        ids.free(a);
        assert_eq!(ids.in_use(), 1);

        // The freed id is handed out exactly once.
        assert_eq!(ids.allocate(), Ok(a));
        assert_eq!(ids.allocate(), Ok(2));
        assert!(ids.is_allocated(b));
    }

    #[test]
    fn freeing_unknown_ids_is_noop() {
        let mut ids = IdAllocator::new(4);
        ids.free(3);
        ids.free(100);
        assert_eq!(ids.in_use(), 0);
        assert_eq!(ids.allocate(), Ok(0));
    }

    #[test]
    fn high_water_compacts_after_release() {
        let mut ids = IdAllocator::new(4);
        for _ in 0..4 {
            ids.allocate().unwrap();
        }
        for id in (0..4).rev() {
            ids.free(id);
        }

        assert_eq!(ids.in_use(), 0);
        assert_eq!(ids.allocate(), Ok(0));
    }
}
