//! Freelist-based fixed-capacity object allocator.
//!
//! This is the allocator the size-class tables in [`crate::pbuf_alloc`] and
//! [`crate::pvbuf_alloc`] are built from: a flat `Vec<T>` of storage plus a
//! freelist of indices, guarded by a single mutex. Allocated indices are
//! offset by [`BASE_INDEX`] so that index `0` is never handed out and can
//! double as a null marker in the paddr encoding.
//!
//! With the `obj-alloc-debug` feature enabled, `free` walks the freelist
//! looking for the index being freed (an O(n) double-free check) before
//! pushing it back on.

use std::sync::Mutex;

/// Sanity value stored alongside each allocator and checked on every
/// operation; a mismatch means the allocator's memory has been corrupted or
/// a caller is holding a stale reference into a different allocator.
pub const MAGIC_NUM: u64 = 0x43b3_c9ef_64bb_a98c;

/// Indices below this are never allocated, so `0` can serve as a null index.
pub const BASE_INDEX: u32 = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct AllocStats {
    pub num_free: usize,
    pub allocs: u64,
    pub frees: u64,
    pub alloc_fails: u64,
}

struct Inner<T> {
    storage: Vec<T>,
    free_list: Vec<u32>,
    stats: AllocStats,
}

/// A fixed-capacity pool of `T`, indexed by `u32` handles starting at
/// [`BASE_INDEX`].
pub struct ObjAllocator<T> {
    magic_num: u64,
    name: &'static str,
    max_objs: usize,
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> ObjAllocator<T> {
    /// Build a pool of `max_objs` objects, each initialized from `make`.
    pub fn new(name: &'static str, max_objs: usize, make: impl Fn(u32) -> T) -> Self {
        let storage: Vec<T> = (0..max_objs)
            .map(|i| make(BASE_INDEX + i as u32))
            .collect();
        let free_list: Vec<u32> = (0..max_objs as u32).map(|i| BASE_INDEX + i).collect();
        Self {
            magic_num: MAGIC_NUM,
            name,
            max_objs,
            inner: Mutex::new(Inner {
                storage,
                free_list,
                stats: AllocStats {
                    num_free: max_objs,
                    ..AllocStats::default()
                },
            }),
        }
    }

    fn check_magic(&self) {
        assert_eq!(
            self.magic_num, MAGIC_NUM,
            "object allocator {:?} has a corrupted magic number",
            self.name
        );
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn max_objs(&self) -> usize {
        self.max_objs
    }

    #[must_use]
    pub fn stats(&self) -> AllocStats {
        self.check_magic();
        self.inner.lock().unwrap().stats
    }

    fn index_to_slot(&self, index: u32) -> usize {
        assert!(index >= BASE_INDEX, "object index below base index");
        let slot = (index - BASE_INDEX) as usize;
        assert!(slot < self.max_objs, "object index out of range for {:?}", self.name);
        slot
    }

    /// Allocate one object, returning its index and giving the caller a
    /// chance to initialize it in place. Returns `None` when the pool is
    /// exhausted.
    pub fn alloc(&self, init: impl FnOnce(&mut T)) -> Option<u32> {
        self.check_magic();
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.free_list.pop() else {
            inner.stats.alloc_fails += 1;
            return None;
        };
        inner.stats.num_free -= 1;
        inner.stats.allocs += 1;
        let slot = (index - BASE_INDEX) as usize;
        init(&mut inner.storage[slot]);
        Some(index)
    }

    /// Return an object to the pool.
    ///
    /// # Panics
    /// Panics (a contract violation, not a recoverable error) if `index` is
    /// out of range, or — under `obj-alloc-debug` — already present on the
    /// freelist.
    pub fn free(&self, index: u32) {
        self.check_magic();
        let _slot = self.index_to_slot(index);
        let mut inner = self.inner.lock().unwrap();

        #[cfg(feature = "obj-alloc-debug")]
        assert!(
            !inner.free_list.contains(&index),
            "double free of object index {index} in allocator {:?}",
            self.name
        );

        inner.free_list.push(index);
        inner.stats.num_free += 1;
        inner.stats.frees += 1;
    }

    pub fn with_object<R>(&self, index: u32, f: impl FnOnce(&T) -> R) -> R {
        self.check_magic();
        let slot = self.index_to_slot(index);
        let inner = self.inner.lock().unwrap();
        f(&inner.storage[slot])
    }

    pub fn with_object_mut<R>(&self, index: u32, f: impl FnOnce(&mut T) -> R) -> R {
        self.check_magic();
        let slot = self.index_to_slot(index);
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.storage[slot])
    }

    #[cfg(feature = "obj-alloc-debug")]
    pub fn validate(&self) {
        self.check_magic();
        let inner = self.inner.lock().unwrap();
        let mut seen = std::collections::HashSet::new();
        for &index in &inner.free_list {
            assert!(
                seen.insert(index),
                "corrupted freelist: index {index} appears twice in {:?}",
                self.name
            );
        }
        assert_eq!(inner.free_list.len(), inner.stats.num_free);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let pool: ObjAllocator<u32> = ObjAllocator::new("test", 4, |_| 0);
        let a = pool.alloc(|v| *v = 1).unwrap();
        let b = pool.alloc(|v| *v = 2).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.stats().num_free, 2);
        pool.with_object(a, |v| assert_eq!(*v, 1));
        pool.free(a);
        assert_eq!(pool.stats().num_free, 3);
        let c = pool.alloc(|v| *v = 3).unwrap();
        assert_eq!(c, a, "freed index should be reused");
    }

    #[test]
    fn exhaustion_reports_failure() {
        let pool: ObjAllocator<u32> = ObjAllocator::new("tiny", 1, |_| 0);
        assert!(pool.alloc(|_| {}).is_some());
        assert!(pool.alloc(|_| {}).is_none());
        assert_eq!(pool.stats().alloc_fails, 1);
    }

    #[test]
    fn indices_start_at_base_index() {
        let pool: ObjAllocator<u32> = ObjAllocator::new("based", 2, |_| 0);
        let a = pool.alloc(|_| {}).unwrap();
        assert!(a >= BASE_INDEX);
    }
}
