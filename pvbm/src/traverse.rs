//! Whole-chain traversal: length, checksum, and iovec export.
//!
//! A pvbuf tree is walked depth-first: every non-empty slot is either a
//! leaf (pbuf, short address, or long address — the latter spanning two
//! adjacent slots) or a nested pvbuf to recurse into. `calc_length` trusts
//! the cached length a pvbuf carries in its own paddr; `calc_length_deep`
//! recomputes it from the leaves, which is slower but catches a stale
//! cache after a bug in one of the tree-mutating operations in
//! [`crate::ops`].

use crate::error::{Error, Result};
use crate::pbuf_alloc::PbufAllocTable;
use crate::pvbuf::PvbufNode;
use crate::pvbuf_alloc::PvbufAllocTable;
use pvbm_sys::{Iovec, Paddr, PaddrTag};

/// One leaf address reached while walking a pvbuf tree. A long address is
/// reported once, carrying both of its constituent words.
#[derive(Debug, Clone, Copy)]
pub enum Leaf {
    Pbuf(Paddr),
    Short(Paddr),
    Long(Paddr, Paddr),
}

impl Leaf {
    #[must_use]
    pub fn data_length(self) -> u64 {
        match self {
            Leaf::Pbuf(p) => u64::from(p.pbuf_data_length()),
            Leaf::Short(p) => p.short_data_length(),
            Leaf::Long(w1, w2) => u64::from(Paddr::long_data_length(w1, w2)),
        }
    }
}

/// Depth-first walk of every leaf reachable from `root`, in order.
///
/// `root` may itself be a bare leaf (a pvbuf containing exactly one leaf
/// is not required; a caller may pass a single pbuf/short/long paddr
/// directly as the whole "chain").
pub fn iterate(root: Paddr, pvbuf_table: &PvbufAllocTable, mut visit: impl FnMut(Leaf)) {
    fn walk(slots: &[Iovec], pvbuf_table: &PvbufAllocTable, visit: &mut impl FnMut(Leaf)) {
        let mut i = 0;
        while i < slots.len() {
            let paddr = slots[i].0;
            if paddr.is_null() {
                break;
            }
            match paddr.tag() {
                PaddrTag::Pvbuf => {
                    let node = PvbufNode::new(paddr, pvbuf_table);
                    let children = node.children();
                    walk(&children, pvbuf_table, visit);
                    i += 1;
                }
                PaddrTag::Pbuf | PaddrTag::PbufOneRef => {
                    visit(Leaf::Pbuf(paddr));
                    i += 1;
                }
                PaddrTag::ShortAddr(_) => {
                    visit(Leaf::Short(paddr));
                    i += 1;
                }
                PaddrTag::LongAddr => {
                    let w2 = slots.get(i + 1).map_or(Paddr::NULL, |s| s.0);
                    visit(Leaf::Long(paddr, w2));
                    i += 2;
                }
            }
        }
    }

    match root.tag() {
        PaddrTag::Pvbuf => {
            let node = PvbufNode::new(root, pvbuf_table);
            let children = node.children();
            walk(&children, pvbuf_table, &mut visit);
        }
        PaddrTag::Pbuf | PaddrTag::PbufOneRef => visit(Leaf::Pbuf(root)),
        PaddrTag::ShortAddr(_) => visit(Leaf::Short(root)),
        PaddrTag::LongAddr => visit(Leaf::Long(root, Paddr::NULL)),
    }
}

/// Cached total length: a pvbuf root returns its own `pvbuf_data_length`
/// field without touching its children; a bare leaf returns its own
/// length directly.
#[must_use]
pub fn calc_length(root: Paddr) -> u64 {
    match root.tag() {
        PaddrTag::Pvbuf => root.pvbuf_data_length(),
        PaddrTag::Pbuf | PaddrTag::PbufOneRef => u64::from(root.pbuf_data_length()),
        PaddrTag::ShortAddr(_) => root.short_data_length(),
        PaddrTag::LongAddr => 0,
    }
}

/// Recomputed total length: walks every leaf and sums its length, ignoring
/// any cached aggregate a pvbuf carries.
#[must_use]
pub fn calc_length_deep(root: Paddr, pvbuf_table: &PvbufAllocTable) -> u64 {
    let mut total = 0u64;
    iterate(root, pvbuf_table, |leaf| total += leaf.data_length());
    total
}

/// RFC 1071 Internet checksum over the visible bytes of every pbuf leaf
/// reachable from `root`.
///
/// External (short/long address) leaves have no accessible byte view in
/// this crate — only `free`/`bump_refcnt` are exposed for them — so a
/// chain containing one returns [`Error::InvariantViolation`].
pub fn checksum(root: Paddr, pvbuf_table: &PvbufAllocTable, pbuf_table: &PbufAllocTable) -> Result<u16> {
    let mut sum: u32 = 0;
    let mut carry_byte: Option<u8> = None;
    let mut err = None;

    iterate(root, pvbuf_table, |leaf| {
        if err.is_some() {
            return;
        }
        let Leaf::Pbuf(paddr) = leaf else {
            err = Some(Error::InvariantViolation("checksum over external (short/long) leaf is not supported"));
            return;
        };
        pbuf_table.with_buffer(paddr, |buf| {
            let start = pbuf_table.intra_buffer_offset(paddr);
            let len = paddr.pbuf_data_length() as usize;
            let mut bytes = buf[start..start + len].iter().copied();
            if let Some(hi) = carry_byte.take() {
                if let Some(lo) = bytes.next() {
                    sum += u32::from(u16::from_be_bytes([hi, lo]));
                } else {
                    carry_byte = Some(hi);
                    return;
                }
            }
            loop {
                let Some(hi) = bytes.next() else { break };
                match bytes.next() {
                    Some(lo) => sum += u32::from(u16::from_be_bytes([hi, lo])),
                    None => carry_byte = Some(hi),
                }
            }
        });
    });

    if let Some(e) = err {
        return Err(e);
    }
    if let Some(hi) = carry_byte {
        sum += u32::from(u16::from_be_bytes([hi, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    Ok(!(sum as u16))
}

/// Copy every pbuf leaf's visible bytes into one contiguous buffer.
pub fn copy_to(root: Paddr, pvbuf_table: &PvbufAllocTable, pbuf_table: &PbufAllocTable) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(calc_length_deep(root, pvbuf_table) as usize);
    let mut err = None;
    iterate(root, pvbuf_table, |leaf| {
        if err.is_some() {
            return;
        }
        let Leaf::Pbuf(paddr) = leaf else {
            err = Some(Error::InvariantViolation("copy_to over external (short/long) leaf is not supported"));
            return;
        };
        pbuf_table.with_buffer(paddr, |buf| {
            let start = pbuf_table.intra_buffer_offset(paddr);
            let len = paddr.pbuf_data_length() as usize;
            out.extend_from_slice(&buf[start..start + len]);
        });
    });
    err.map_or(Ok(out), Err)
}

/// Export each pbuf leaf's visible bytes as one scatter/gather entry,
/// suitable for handing to a vectored write syscall.
///
/// This returns owned buffers rather than borrowed [`std::io::IoSlice`]s:
/// pbuf storage sits behind the allocator's mutex, and handing out a
/// borrow that outlives the lock would require unsafe aliasing this crate
/// chooses not to take on. Callers that need a true zero-copy `writev`
/// path should build their `IoSlice`s directly against
/// [`PbufAllocTable::with_buffer`] instead of going through this helper.
pub fn make_iovecs(root: Paddr, pvbuf_table: &PvbufAllocTable, pbuf_table: &PbufAllocTable) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    let mut err = None;
    iterate(root, pvbuf_table, |leaf| {
        if err.is_some() {
            return;
        }
        let Leaf::Pbuf(paddr) = leaf else {
            err = Some(Error::InvariantViolation("make_iovecs over external (short/long) leaf is not supported"));
            return;
        };
        pbuf_table.with_buffer(paddr, |buf| {
            let start = pbuf_table.intra_buffer_offset(paddr);
            let len = paddr.pbuf_data_length() as usize;
            out.push(buf[start..start + len].to_vec());
        });
    });
    err.map_or(Ok(out), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pvbuf::PvbufNode;

    #[test]
    fn calc_length_bare_pbuf() {
        let pbufs = PbufAllocTable::new(2);
        let p = pbufs.alloc(42, 0, 0).unwrap();
        assert_eq!(calc_length(p), 42);
    }

    #[test]
    fn calc_length_deep_walks_pvbuf_chain() {
        let pbufs = PbufAllocTable::new(4);
        let pvbufs = PvbufAllocTable::new(2);
        let root = pvbufs.alloc_empty(4).unwrap();
        let node = PvbufNode::new(root, &pvbufs);
        let a = pbufs.alloc(10, 0, 0).unwrap();
        let b = pbufs.alloc(20, 0, 0).unwrap();
        node.push(Iovec(a)).unwrap();
        node.push(Iovec(b)).unwrap();
        assert_eq!(calc_length_deep(root, &pvbufs), 30);
    }

    #[test]
    fn checksum_matches_manual_computation() {
        let pbufs = PbufAllocTable::new(2);
        let pvbufs = PvbufAllocTable::new(2);
        let p = pbufs.alloc(4, 0, 0).unwrap();
        pbufs.with_buffer_mut(p, |buf| {
            let start = pbufs.intra_buffer_offset(p);
            buf[start..start + 4].copy_from_slice(&[0x45, 0x00, 0x00, 0x3c]);
        });
        let sum = checksum(p, &pvbufs, &pbufs).unwrap();
        let expected = {
            let mut s: u32 = u32::from(u16::from_be_bytes([0x45, 0x00])) + u32::from(u16::from_be_bytes([0x00, 0x3c]));
            while s >> 16 != 0 {
                s = (s & 0xFFFF) + (s >> 16);
            }
            !(s as u16)
        };
        assert_eq!(sum, expected);
    }

    #[test]
    fn copy_to_concatenates_leaves() {
        let pbufs = PbufAllocTable::new(4);
        let pvbufs = PvbufAllocTable::new(2);
        let root = pvbufs.alloc_empty(4).unwrap();
        let node = PvbufNode::new(root, &pvbufs);
        let a = pbufs.alloc(3, 0, 0).unwrap();
        pbufs.with_buffer_mut(a, |buf| buf[..3].copy_from_slice(b"abc"));
        node.push(Iovec(a)).unwrap();
        let bytes = copy_to(root, &pvbufs, &pbufs).unwrap();
        assert_eq!(bytes, b"abc");
    }
}
