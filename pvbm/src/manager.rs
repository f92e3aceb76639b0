//! Top-level buffer manager: owns every pool and the external-region
//! registry, and is the entry point a caller constructs once at startup.

use crate::error::{Error, Result};
use crate::external::{ExternalRegionOps, ExternalRegionTable};
use crate::ops::PvbufOps;
use crate::pbuf_alloc::PbufAllocTable;
use crate::pvbuf_alloc::PvbufAllocTable;
use pvbm_sys::{Paddr, ShortRegion};
use std::sync::Arc;

/// Sizing knobs for a [`BufferManager`]. Every pbuf size class and every
/// pvbuf size class is allocated uniformly at these counts; a deployment
/// with a skewed size distribution would want per-class counts instead,
/// but this covers the common case and is what the CLI's `--pbufs` /
/// `--pvbufs` flags configure.
#[derive(Debug, Clone, Copy)]
pub struct BufferManagerConfig {
    pub pbufs_per_class: usize,
    pub pvbufs_per_class: usize,
    pub pvbuf_overflow_fract: u32,
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self {
            pbufs_per_class: 1024,
            pvbufs_per_class: 1024,
            pvbuf_overflow_fract: crate::pvbuf_alloc::DEFAULT_FRACT,
        }
    }
}

/// Owns the pbuf pools, the pvbuf pools, and the external-region registry.
/// Tree mutation is done through a borrowed [`PvbufOps`] built on demand
/// from [`Self::ops`], since `PvbufOps` only needs shared references to
/// the two pools and there's no benefit to storing it alongside them.
pub struct BufferManager {
    pbufs: PbufAllocTable,
    pvbufs: PvbufAllocTable,
    external: ExternalRegionTable,
}

impl BufferManager {
    #[must_use]
    pub fn new(config: BufferManagerConfig) -> Self {
        log::info!(
            "initializing buffer manager: {} pbufs/class, {} pvbufs/class, overflow fract {}",
            config.pbufs_per_class,
            config.pvbufs_per_class,
            config.pvbuf_overflow_fract
        );
        Self {
            pbufs: PbufAllocTable::new(config.pbufs_per_class),
            pvbufs: PvbufAllocTable::with_fract(config.pvbufs_per_class, config.pvbuf_overflow_fract),
            external: ExternalRegionTable::new(),
        }
    }

    #[must_use]
    pub fn pbufs(&self) -> &PbufAllocTable {
        &self.pbufs
    }

    #[must_use]
    pub fn pvbufs(&self) -> &PvbufAllocTable {
        &self.pvbufs
    }

    #[must_use]
    pub fn external(&self) -> &ExternalRegionTable {
        &self.external
    }

    #[must_use]
    pub fn ops(&self) -> PvbufOps<'_> {
        PvbufOps::new(&self.pbufs, &self.pvbufs, &self.external)
    }

    pub fn register_short_region(&self, region: ShortRegion, ops: Arc<dyn ExternalRegionOps>) {
        self.external.register_short(region, ops);
    }

    pub fn register_long_region(&self, memory_region: u8, ops: Arc<dyn ExternalRegionOps>) {
        self.external.register_long(memory_region, ops);
    }

    /// Allocate a plain refcounted pbuf and copy `data` into it.
    pub fn alloc_pbuf(&self, data: &[u8]) -> Result<Paddr> {
        let p = self.pbufs.alloc(data.len(), 0, 0)?;
        self.pbufs.with_buffer_mut(p, |buf| {
            let start = self.pbufs.intra_buffer_offset(p);
            buf[start..start + data.len()].copy_from_slice(data);
        });
        Ok(p)
    }

    /// Release a leaf paddr of any kind, routing short/long addresses
    /// through the external-region registry.
    ///
    /// A standalone long address can't be released through this entry
    /// point: a long address needs both of its two words, but this method
    /// only takes one `Paddr`. Call this on the pvbuf that holds the long
    /// address as a child instead — [`Self::release_children`] handles the
    /// two-slot grouping internally.
    pub fn release(&self, paddr: Paddr) -> Result<()> {
        use pvbm_sys::PaddrTag;
        match paddr.tag() {
            PaddrTag::Pbuf | PaddrTag::PbufOneRef => {
                self.pbufs.release(paddr);
                Ok(())
            }
            PaddrTag::Pvbuf => {
                let node = crate::pvbuf::PvbufNode::new(paddr, &self.pvbufs);
                self.release_children(&node.children())?;
                self.pvbufs.release(paddr);
                Ok(())
            }
            PaddrTag::ShortAddr(_) => self.external.free_short(paddr),
            PaddrTag::LongAddr => Err(Error::InvariantViolation(
                "a standalone long address cannot be released; release its owning pvbuf instead",
            )),
        }
    }

    /// Release every child in a pvbuf's occupied slot range, grouping a
    /// long address's two words into a single [`ExternalRegionTable::free_long`]
    /// call instead of recursing into [`Self::release`] slot by slot.
    fn release_children(&self, children: &[pvbm_sys::Iovec]) -> Result<()> {
        use pvbm_sys::PaddrTag;
        let mut i = 0;
        while i < children.len() {
            let child = children[i];
            if matches!(child.0.tag(), PaddrTag::LongAddr) {
                let w2 = children[i + 1];
                self.external.free_long(child.0, w2.0)?;
                i += 2;
            } else {
                self.release(child.0)?;
                i += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_manager() {
        let manager = BufferManager::new(BufferManagerConfig::default());
        let p = manager.alloc_pbuf(b"hello").unwrap();
        assert_eq!(p.pbuf_data_length(), 5);
        manager.release(p).unwrap();
    }

    #[test]
    fn release_recurses_into_pvbuf_children() {
        let manager = BufferManager::new(BufferManagerConfig {
            pbufs_per_class: 4,
            pvbufs_per_class: 4,
            pvbuf_overflow_fract: crate::pvbuf_alloc::DEFAULT_FRACT,
        });
        let a = manager.alloc_pbuf(b"a").unwrap();
        let root = manager.ops().prepend_bytes(a, b"b").unwrap();
        manager.release(root).unwrap();
    }
}
