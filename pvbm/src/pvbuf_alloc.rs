//! Pvbuf tree-node pools.
//!
//! A pvbuf is an array of [`Iovec`] slots sized in whole cache lines, one
//! size class per line count from 1 to [`PVBUF_NUM_SIZES`]. Each slot holds
//! either a pbuf paddr, a short/long external address, or a nested pvbuf
//! paddr, so a pvbuf of `n` cache lines can fan out to
//! `n * (CACHELINE_SIZE / size_of::<Iovec>())` children.
//!
//! When the ideal size class for a request is exhausted, allocation can
//! fall back to the next larger class — but doing that unconditionally
//! would let a burst of oversized allocations starve the larger classes
//! that genuinely need the capacity. `fract` throttles the fallback: it's
//! a threshold out of 65536 checked against a rotating counter, so only
//! that fraction of overflow requests are allowed to borrow from a larger
//! class before allocation gives up and reports exhaustion.

use crate::error::{Error, Result};
use crate::obj_alloc::ObjAllocator;
use pvbm_sys::{Iovec, Paddr, CACHELINE_SIZE, PVBUF_NUM_SIZES};
use std::sync::atomic::{AtomicU32, Ordering};

/// Default fallback throttle: roughly half of overflow requests may borrow
/// from the next larger size class.
pub const DEFAULT_FRACT: u32 = 32768;

const FRACT_DENOMINATOR: u32 = 65536;

/// Number of [`Iovec`] slots held by one cache line.
pub const SLOTS_PER_CACHELINE: usize = CACHELINE_SIZE / std::mem::size_of::<u64>();

struct PvbufClass {
    num_lines: u32,
    alloc: ObjAllocator<Vec<Iovec>>,
}

impl PvbufClass {
    fn new(num_lines: u32, objs_per_class: usize) -> Self {
        let slots = num_lines as usize * SLOTS_PER_CACHELINE;
        let alloc = ObjAllocator::new("pvbuf", objs_per_class, move |_| vec![Iovec::ZERO; slots]);
        Self { num_lines, alloc }
    }

    fn slots(&self) -> usize {
        self.num_lines as usize * SLOTS_PER_CACHELINE
    }
}

/// Table of all 16 pvbuf size-class pools, with a throttled fallback policy
/// between adjacent classes.
pub struct PvbufAllocTable {
    classes: Vec<PvbufClass>,
    fract: u32,
    overflow_counter: AtomicU32,
}

impl PvbufAllocTable {
    #[must_use]
    pub fn new(objs_per_class: usize) -> Self {
        Self::with_fract(objs_per_class, DEFAULT_FRACT)
    }

    #[must_use]
    pub fn with_fract(objs_per_class: usize, fract: u32) -> Self {
        let classes = (1..=PVBUF_NUM_SIZES)
            .map(|lines| PvbufClass::new(lines, objs_per_class))
            .collect();
        Self {
            classes,
            fract,
            overflow_counter: AtomicU32::new(0),
        }
    }

    /// Allocator stats for every size class, in ascending cache-line order.
    #[must_use]
    pub fn class_stats(&self) -> Vec<(u32, crate::obj_alloc::AllocStats)> {
        self.classes
            .iter()
            .map(|class| (class.num_lines, class.alloc.stats()))
            .collect()
    }

    fn class_index_for_slots(&self, slots_needed: usize) -> Result<usize> {
        for (i, class) in self.classes.iter().enumerate() {
            if class.slots() >= slots_needed {
                return Ok(i);
            }
        }
        Err(Error::PvbufPoolExhausted {
            size_class: (self.classes.len() - 1) as u8,
        })
    }

    fn may_overflow(&self) -> bool {
        let n = self.overflow_counter.fetch_add(1, Ordering::Relaxed) % FRACT_DENOMINATOR;
        n < self.fract
    }

    /// Allocate a pvbuf with at least `min_slots` iovec slots, zero-filled.
    /// Falls back to the next larger class, throttled by `fract`, when the
    /// ideal class is exhausted.
    pub fn alloc_empty(&self, min_slots: usize) -> Result<Paddr> {
        let ideal = self.class_index_for_slots(min_slots)?;
        let mut idx = ideal;
        loop {
            let class = &self.classes[idx];
            if let Some(index) = class.alloc.alloc(|slots| slots.fill(Iovec::ZERO)) {
                return Ok(Paddr::make_pvbuf((idx) as u8, index - crate::obj_alloc::BASE_INDEX));
            }
            if idx + 1 >= self.classes.len() || (idx > ideal && !self.may_overflow()) {
                return Err(Error::PvbufPoolExhausted {
                    size_class: idx as u8,
                });
            }
            if idx == ideal && !self.may_overflow() {
                return Err(Error::PvbufPoolExhausted {
                    size_class: idx as u8,
                });
            }
            idx += 1;
        }
    }

    pub fn release(&self, paddr: Paddr) {
        let class = &self.classes[paddr.pvbuf_size_class() as usize];
        class.alloc.free(paddr.pvbuf_index() + crate::obj_alloc::BASE_INDEX);
    }

    #[must_use]
    pub fn num_slots(&self, paddr: Paddr) -> usize {
        self.classes[paddr.pvbuf_size_class() as usize].slots()
    }

    pub fn with_slots<R>(&self, paddr: Paddr, f: impl FnOnce(&[Iovec]) -> R) -> R {
        let class = &self.classes[paddr.pvbuf_size_class() as usize];
        class
            .alloc
            .with_object(paddr.pvbuf_index() + crate::obj_alloc::BASE_INDEX, |slots| f(slots))
    }

    pub fn with_slots_mut<R>(&self, paddr: Paddr, f: impl FnOnce(&mut [Iovec]) -> R) -> R {
        let class = &self.classes[paddr.pvbuf_size_class() as usize];
        class
            .alloc
            .with_object_mut(paddr.pvbuf_index() + crate::obj_alloc::BASE_INDEX, |slots| f(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_empty_picks_smallest_fitting_class() {
        let table = PvbufAllocTable::new(4);
        let p = table.alloc_empty(3).unwrap();
        assert!(p.is_pvbuf());
        assert_eq!(p.pvbuf_size_class(), 0);
        assert!(table.num_slots(p) >= 3);
    }

    #[test]
    fn larger_request_uses_larger_class() {
        let table = PvbufAllocTable::new(4);
        let p = table.alloc_empty(SLOTS_PER_CACHELINE + 1).unwrap();
        assert_eq!(p.pvbuf_size_class(), 1);
    }

    #[test]
    fn exhaustion_without_overflow_allowance_errors() {
        let table = PvbufAllocTable::with_fract(1, 0);
        let _first = table.alloc_empty(1).unwrap();
        let err = table.alloc_empty(1).unwrap_err();
        assert!(matches!(err, Error::PvbufPoolExhausted { .. }));
    }

    #[test]
    fn release_returns_slot_to_pool() {
        let table = PvbufAllocTable::new(1);
        let p = table.alloc_empty(1).unwrap();
        table.release(p);
        let p2 = table.alloc_empty(1).unwrap();
        assert_eq!(p2.pvbuf_index(), p.pvbuf_index());
    }
}
