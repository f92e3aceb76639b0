//! Human-readable diagnostics over a [`BufferManager`] and individual
//! pvbuf trees, used by `pvbmctl` and handy in ad hoc debugging.

use crate::manager::BufferManager;
use crate::traverse::{self, Leaf};
use pvbm_sys::Paddr;
use std::fmt::Write as _;

/// One line per pbuf size class and per pvbuf size class, showing live
/// allocator stats (`num_free`/`allocs`/`frees`/`alloc_fails`).
#[must_use]
pub fn show_buffer_manager(manager: &BufferManager) -> String {
    let mut out = String::new();
    writeln!(out, "buffer manager:").unwrap();
    writeln!(out, "  pbuf pools (size shift: num_free/allocs/frees/alloc_fails):").unwrap();
    for (shift, stats) in manager.pbufs().class_stats() {
        writeln!(
            out,
            "    2^{shift}: {}/{}/{}/{}",
            stats.num_free, stats.allocs, stats.frees, stats.alloc_fails
        )
        .unwrap();
    }
    writeln!(out, "  pvbuf pools (cache lines: num_free/allocs/frees/alloc_fails):").unwrap();
    for (lines, stats) in manager.pvbufs().class_stats() {
        writeln!(
            out,
            "    {lines}: {}/{}/{}/{}",
            stats.num_free, stats.allocs, stats.frees, stats.alloc_fails
        )
        .unwrap();
    }
    out
}

/// Render one pvbuf tree's shape: total length plus one line per leaf.
#[must_use]
pub fn pvbuf_print(root: Paddr, manager: &BufferManager) -> String {
    let mut out = String::new();
    writeln!(out, "pvbuf {:?}: length={}", root, traverse::calc_length_deep(root, manager.pvbufs())).unwrap();
    let mut index = 0;
    traverse::iterate(root, manager.pvbufs(), |leaf| {
        match leaf {
            Leaf::Pbuf(p) => writeln!(out, "  [{index}] pbuf len={}", p.pbuf_data_length()).unwrap(),
            Leaf::Short(p) => writeln!(out, "  [{index}] short region={:?} len={}", p.short_region(), p.short_data_length()).unwrap(),
            Leaf::Long(w1, w2) => writeln!(
                out,
                "  [{index}] long region={} len={}",
                Paddr::long_memory_region(w1, w2),
                Paddr::long_data_length(w1, w2)
            )
            .unwrap(),
        }
        index += 1;
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::BufferManagerConfig;

    #[test]
    fn show_buffer_manager_reports_pool_stats() {
        let manager = BufferManager::new(BufferManagerConfig {
            pbufs_per_class: 4,
            pvbufs_per_class: 4,
            pvbuf_overflow_fract: crate::pvbuf_alloc::DEFAULT_FRACT,
        });
        let _ = manager.alloc_pbuf(b"x").unwrap();
        let rendered = show_buffer_manager(&manager);
        assert!(rendered.contains("pbuf pools"));
        assert!(rendered.contains("pvbuf pools"));
    }

    #[test]
    fn pvbuf_print_reports_leaves() {
        let manager = BufferManager::new(BufferManagerConfig {
            pbufs_per_class: 4,
            pvbufs_per_class: 4,
            pvbuf_overflow_fract: crate::pvbuf_alloc::DEFAULT_FRACT,
        });
        let p = manager.alloc_pbuf(b"hi").unwrap();
        let root = manager.ops().append_bytes(p, b"!").unwrap();
        let rendered = pvbuf_print(root, &manager);
        assert!(rendered.contains("length=3"));
        assert!(rendered.contains("pbuf len=2"));
        assert!(rendered.contains("pbuf len=1"));
    }
}
