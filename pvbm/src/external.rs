//! Bridge to caller-owned external memory.
//!
//! Short and long addresses don't point into a pool this crate manages —
//! they point into memory a caller registered (an mbuf, a DPDK mempool, a
//! DMA ring). [`ExternalRegionOps`] is the callback vtable the owner
//! implements; this module just holds a registry of them, mirroring the
//! flat linear-scan device registry pattern the port-I/O hub uses.

use crate::error::{Error, Result};
use pvbm_sys::{Paddr, ShortRegion};
use std::sync::{Arc, RwLock};

/// Operations an external memory owner exposes so pvbuf code can release
/// and share references into memory it doesn't own.
pub trait ExternalRegionOps: Send + Sync {
    /// Release one reference to the span `[offset, offset + length)`.
    fn free(&self, offset: u64, length: u64);

    /// Record one more outstanding reference to the span.
    fn bump_refcnt(&self, offset: u64, length: u64);
}

/// Registry of the three short-address regions and up to 64 long-address
/// memory regions, each backed by an [`ExternalRegionOps`] implementation.
#[derive(Default)]
pub struct ExternalRegionTable {
    short: RwLock<[Option<Arc<dyn ExternalRegionOps>>; 3]>,
    long: RwLock<Vec<Option<Arc<dyn ExternalRegionOps>>>>,
}

impl ExternalRegionTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            short: RwLock::new([None, None, None]),
            long: RwLock::new((0..64).map(|_| None).collect()),
        }
    }

    pub fn register_short(&self, region: ShortRegion, ops: Arc<dyn ExternalRegionOps>) {
        self.short.write().unwrap()[region.index()] = Some(ops);
    }

    pub fn register_long(&self, memory_region: u8, ops: Arc<dyn ExternalRegionOps>) {
        assert!(memory_region < 64, "long address memory region out of range");
        self.long.write().unwrap()[memory_region as usize] = Some(ops);
    }

    fn short_ops(&self, region: ShortRegion) -> Result<Arc<dyn ExternalRegionOps>> {
        self.short.read().unwrap()[region.index()]
            .clone()
            .ok_or(Error::UnknownShortRegion(region))
    }

    fn long_ops(&self, memory_region: u8) -> Result<Arc<dyn ExternalRegionOps>> {
        self.long
            .read()
            .unwrap()
            .get(memory_region as usize)
            .and_then(Option::clone)
            .ok_or(Error::UnknownExternalRegion(memory_region))
    }

    /// Release the external reference a short-address paddr represents.
    pub fn free_short(&self, paddr: Paddr) -> Result<()> {
        let ops = self.short_ops(paddr.short_region())?;
        ops.free(paddr.short_offset(), paddr.short_data_length());
        Ok(())
    }

    pub fn bump_refcnt_short(&self, paddr: Paddr) -> Result<()> {
        let ops = self.short_ops(paddr.short_region())?;
        ops.bump_refcnt(paddr.short_offset(), paddr.short_data_length());
        Ok(())
    }

    /// Release the external reference a long-address paddr pair represents.
    pub fn free_long(&self, w1: Paddr, w2: Paddr) -> Result<()> {
        let region = Paddr::long_memory_region(w1, w2);
        let ops = self.long_ops(region)?;
        ops.free(Paddr::long_offset(w1, w2), u64::from(Paddr::long_data_length(w1, w2)));
        Ok(())
    }

    pub fn bump_refcnt_long(&self, w1: Paddr, w2: Paddr) -> Result<()> {
        let region = Paddr::long_memory_region(w1, w2);
        let ops = self.long_ops(region)?;
        ops.bump_refcnt(Paddr::long_offset(w1, w2), u64::from(Paddr::long_data_length(w1, w2)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingRegion {
        freed_bytes: AtomicU64,
        bumps: AtomicU64,
    }

    impl ExternalRegionOps for CountingRegion {
        fn free(&self, _offset: u64, length: u64) {
            self.freed_bytes.fetch_add(length, Ordering::SeqCst);
        }

        fn bump_refcnt(&self, _offset: u64, _length: u64) {
            self.bumps.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unregistered_short_region_errors() {
        let table = ExternalRegionTable::new();
        let p = Paddr::make_short(ShortRegion::Region1, 0, 10);
        assert!(matches!(table.free_short(p), Err(Error::UnknownShortRegion(_))));
    }

    #[test]
    fn registered_short_region_dispatches() {
        let table = ExternalRegionTable::new();
        let region = Arc::new(CountingRegion::default());
        table.register_short(ShortRegion::Region2, region.clone());
        let p = Paddr::make_short(ShortRegion::Region2, 5, 20);
        table.free_short(p).unwrap();
        assert_eq!(region.freed_bytes.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn registered_long_region_dispatches() {
        let table = ExternalRegionTable::new();
        let region = Arc::new(CountingRegion::default());
        table.register_long(3, region.clone());
        let (w1, w2) = Paddr::make_long(3, 1000, 256);
        table.bump_refcnt_long(w1, w2).unwrap();
        assert_eq!(region.bumps.load(Ordering::SeqCst), 1);
    }
}
