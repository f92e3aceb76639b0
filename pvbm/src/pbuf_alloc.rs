//! Fixed-size packet buffer ("pbuf") pools.
//!
//! Pbufs come in 15 size classes, shift 6 through 20 (64 bytes to 1 MiB).
//! Each class is its own [`ObjAllocator`] of byte buffers; reference counts
//! live in a parallel array next to the allocator rather than inside the
//! buffer storage itself, so that touching a refcount never requires a
//! mutable borrow of buffer contents. A pbuf allocated through
//! [`PbufAllocTable::alloc_single_ref`] carries tag `0b0011` and never
//! initializes or touches its refcount slot at all — that's the fast path
//! for buffers a caller knows will only ever have one owner.
//!
//! A pbuf's `offset` field is a byte offset from the size class's pool
//! base, exactly as if the pool were one contiguous region: `slot_index *
//! buffer_size + intra_buffer_offset`. Decoding a paddr recovers the slot
//! with a divide/modulo against the class's buffer size.

use crate::error::{Error, Result};
use crate::obj_alloc::{ObjAllocator, BASE_INDEX};
use pvbm_sys::{Paddr, PBUF_BASE_SIZE_SHIFT, PBUF_MAX_SIZE_SHIFT, PBUF_NUM_SIZE_SHIFTS};
use std::sync::atomic::{AtomicU32, Ordering};

struct PbufClass {
    buf_size: u64,
    alloc: ObjAllocator<Vec<u8>>,
    refcounts: Vec<AtomicU32>,
}

impl PbufClass {
    fn new(size_shift: u32, objs_per_class: usize) -> Self {
        let buf_size = 1u64 << size_shift;
        let alloc = ObjAllocator::new("pbuf", objs_per_class, {
            let buf_size = buf_size as usize;
            move |_| vec![0u8; buf_size]
        });
        let refcounts = (0..objs_per_class).map(|_| AtomicU32::new(0)).collect();
        Self {
            buf_size,
            alloc,
            refcounts,
        }
    }

    fn slot_of(&self, object_index: u32) -> usize {
        (object_index - BASE_INDEX) as usize
    }

    fn refcount_slot(&self, object_index: u32) -> &AtomicU32 {
        &self.refcounts[self.slot_of(object_index)]
    }

    /// Decode the (object index, intra-buffer offset) a pbuf paddr's offset
    /// field refers to.
    fn decode_offset(&self, offset: u64) -> (u32, u64) {
        let slot = offset / self.buf_size;
        let intra = offset % self.buf_size;
        (slot as u32 + BASE_INDEX, intra)
    }

    fn encode_offset(&self, slot_index: usize, intra: u64) -> u64 {
        slot_index as u64 * self.buf_size + intra
    }
}

/// Table of all 15 pbuf size-class pools.
///
/// Allocation picks the smallest class whose buffer fits the request and
/// walks up to the next larger class when that pool is exhausted, so a
/// burst of small allocations doesn't fail outright while headroom exists
/// in a neighboring class.
pub struct PbufAllocTable {
    classes: Vec<PbufClass>,
}

impl PbufAllocTable {
    /// `objs_per_class` sizes every size class uniformly; production
    /// deployments with skewed size distributions would pass a per-class
    /// table instead, but a flat count is enough for the manager's needs.
    #[must_use]
    pub fn new(objs_per_class: usize) -> Self {
        let classes = (0..PBUF_NUM_SIZE_SHIFTS)
            .map(|i| PbufClass::new(PBUF_BASE_SIZE_SHIFT + i, objs_per_class))
            .collect();
        Self { classes }
    }

    fn class_for_shift(&self, size_shift: u32) -> &PbufClass {
        &self.classes[(size_shift - PBUF_BASE_SIZE_SHIFT) as usize]
    }

    /// Allocator stats for every size class, in ascending shift order.
    #[must_use]
    pub fn class_stats(&self) -> Vec<(u32, crate::obj_alloc::AllocStats)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, class)| (PBUF_BASE_SIZE_SHIFT + i as u32, class.alloc.stats()))
            .collect()
    }

    fn smallest_shift_for(&self, length: usize) -> Result<u32> {
        for shift in PBUF_BASE_SIZE_SHIFT..=PBUF_MAX_SIZE_SHIFT {
            if length <= 1usize << shift {
                return Ok(shift);
            }
        }
        Err(Error::RequestTooLarge {
            requested: length,
            max: 1usize << PBUF_MAX_SIZE_SHIFT,
        })
    }

    /// Try `start_shift`, then walk up to larger classes until one has a
    /// free slot. Returns the class's shift and the object index that was
    /// allocated within it.
    fn alloc_at_or_above(&self, start_shift: u32) -> Result<(u32, u32)> {
        for shift in start_shift..=PBUF_MAX_SIZE_SHIFT {
            let class = self.class_for_shift(shift);
            if let Some(index) = class.alloc.alloc(|buf| buf.fill(0)) {
                return Ok((shift, index));
            }
        }
        Err(Error::PbufPoolExhausted { size_shift: start_shift })
    }

    /// Allocate a pbuf with a normal, refcounted lifetime. `headroom` and
    /// `tailroom` reserve space at the front/back of the buffer without
    /// being part of the visible data length, so a later `prepend` or
    /// `append` can grow into them without a fresh allocation.
    pub fn alloc(&self, length: usize, headroom: usize, tailroom: usize) -> Result<Paddr> {
        let total = headroom + length + tailroom;
        let start_shift = self.smallest_shift_for(total)?;
        let (actual_shift, object_index) = self.alloc_at_or_above(start_shift)?;
        let class = self.class_for_shift(actual_shift);
        class.refcount_slot(object_index).store(1, Ordering::SeqCst);
        let offset = class.encode_offset(class.slot_of(object_index), headroom as u64);
        Ok(Paddr::make_pbuf(false, actual_shift, offset, length as u32))
    }

    /// Allocate a single-reference pbuf (tag `0b0011`). No refcount slot is
    /// touched; the caller is the sole owner for the buffer's lifetime.
    pub fn alloc_single_ref(&self, length: usize) -> Result<Paddr> {
        let start_shift = self.smallest_shift_for(length)?;
        let (actual_shift, object_index) = self.alloc_at_or_above(start_shift)?;
        let class = self.class_for_shift(actual_shift);
        let offset = class.encode_offset(class.slot_of(object_index), 0);
        Ok(Paddr::make_pbuf(true, actual_shift, offset, length as u32))
    }

    /// Increment the reference count of an already-allocated, non-single-ref
    /// pbuf. Disallowed for single-ref pbufs, which never carry a refcount
    /// to begin with.
    pub fn bump_refcnt(&self, paddr: Paddr) {
        assert!(!paddr.is_single_ref(), "cannot bump refcount of a single-ref pbuf");
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (object_index, _intra) = class.decode_offset(paddr.pbuf_offset());
        let prev = class.refcount_slot(object_index).fetch_add(1, Ordering::SeqCst);
        assert!(prev > 0, "bumped refcount of a freed pbuf");
    }

    /// Decrement the reference count, freeing the underlying buffer back to
    /// its size class when it reaches zero. Single-ref pbufs free
    /// unconditionally, since they were never refcounted.
    pub fn release(&self, paddr: Paddr) {
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (object_index, _intra) = class.decode_offset(paddr.pbuf_offset());
        if paddr.is_single_ref() {
            class.alloc.free(object_index);
            return;
        }
        let prev = class.refcount_slot(object_index).fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "double free of pbuf (refcount underflow)");
        if prev == 1 {
            class.alloc.free(object_index);
        }
    }

    #[must_use]
    pub fn refcount(&self, paddr: Paddr) -> u32 {
        if paddr.is_single_ref() {
            return 1;
        }
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (object_index, _intra) = class.decode_offset(paddr.pbuf_offset());
        class.refcount_slot(object_index).load(Ordering::SeqCst)
    }

    /// Borrow the backing bytes for the full allocated buffer (headroom and
    /// tailroom included), for use by copy/prepend/append operations that
    /// need to see beyond the paddr's visible data window.
    pub fn with_buffer<R>(&self, paddr: Paddr, f: impl FnOnce(&[u8]) -> R) -> R {
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (object_index, _intra) = class.decode_offset(paddr.pbuf_offset());
        class.alloc.with_object(object_index, |buf| f(buf))
    }

    pub fn with_buffer_mut<R>(&self, paddr: Paddr, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (object_index, _intra) = class.decode_offset(paddr.pbuf_offset());
        class.alloc.with_object_mut(object_index, |buf| f(buf))
    }

    /// The visible payload's offset within the backing buffer returned by
    /// [`Self::with_buffer`] / [`Self::with_buffer_mut`].
    #[must_use]
    pub fn intra_buffer_offset(&self, paddr: Paddr) -> usize {
        let class = self.class_for_shift(paddr.pbuf_size_shift());
        let (_object_index, intra) = class.decode_offset(paddr.pbuf_offset());
        intra as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_release_round_trip() {
        let table = PbufAllocTable::new(4);
        let p = table.alloc(100, 0, 0).unwrap();
        assert!(p.is_pbuf());
        assert_eq!(table.refcount(p), 1);
        table.release(p);
    }

    #[test]
    fn single_ref_never_refcounted() {
        let table = PbufAllocTable::new(4);
        let p = table.alloc_single_ref(50).unwrap();
        assert!(p.is_single_ref());
        assert_eq!(table.refcount(p), 1);
        table.release(p);
    }

    #[test]
    fn bump_and_release_tracks_refcount() {
        let table = PbufAllocTable::new(4);
        let p = table.alloc(64, 0, 0).unwrap();
        table.bump_refcnt(p);
        assert_eq!(table.refcount(p), 2);
        table.release(p);
        assert_eq!(table.refcount(p), 1);
        table.release(p);
    }

    #[test]
    fn request_too_large_is_an_error() {
        let table = PbufAllocTable::new(1);
        let err = table.alloc(2_000_000, 0, 0).unwrap_err();
        assert!(matches!(err, Error::RequestTooLarge { .. }));
    }

    #[test]
    fn headroom_and_tailroom_reserve_space() {
        let table = PbufAllocTable::new(4);
        let p = table.alloc(100, 20, 10).unwrap();
        assert_eq!(p.pbuf_data_length(), 100);
        assert_eq!(table.intra_buffer_offset(p), 20);
    }

    #[test]
    fn distinct_allocations_get_distinct_offsets() {
        let table = PbufAllocTable::new(4);
        let a = table.alloc(10, 0, 0).unwrap();
        let b = table.alloc(10, 0, 0).unwrap();
        assert_ne!(a.pbuf_offset(), b.pbuf_offset());
    }
}
