//! Operations that grow, shrink, clone, or split a pvbuf tree.
//!
//! Every operation here takes the current root paddr and returns the new
//! root paddr to use in its place. A pvbuf's cached data length lives in
//! the handle value itself (`Paddr::pvbuf_data_length`), not in the pool
//! storage, so mutating a tree's contents always produces a new root
//! value — callers must overwrite whatever slot held the old root (a
//! variable, or a parent's iovec entry) with the value these functions
//! return.

use crate::error::{Error, Result};
use crate::external::ExternalRegionTable;
use crate::pbuf_alloc::PbufAllocTable;
use crate::pvbuf::PvbufNode;
use crate::pvbuf_alloc::PvbufAllocTable;
use crate::traverse::{self, Leaf};
use pvbm_sys::{Iovec, Paddr, PaddrTag};

/// An existing paddr handed to [`PvbufOps::prepend`]/[`PvbufOps::append`]
/// as a new child. A long address needs both of its words, so it can't be
/// carried as a bare [`Paddr`] the way the other three variants can.
#[derive(Debug, Clone, Copy)]
pub enum Payload {
    Pbuf(Paddr),
    Short(Paddr),
    Long(Paddr, Paddr),
    Pvbuf(Paddr),
}

impl Payload {
    fn slot_count(self) -> usize {
        if matches!(self, Payload::Long(..)) {
            2
        } else {
            1
        }
    }

    fn length(self) -> u64 {
        match self {
            Payload::Pbuf(p) => u64::from(p.pbuf_data_length()),
            Payload::Short(p) => p.short_data_length(),
            Payload::Long(w1, w2) => u64::from(Paddr::long_data_length(w1, w2)),
            Payload::Pvbuf(p) => p.pvbuf_data_length(),
        }
    }

    fn into_iovecs(self) -> (Iovec, Option<Iovec>) {
        match self {
            Payload::Pbuf(p) | Payload::Short(p) | Payload::Pvbuf(p) => (Iovec(p), None),
            Payload::Long(w1, w2) => (Iovec(w1), Some(Iovec(w2))),
        }
    }

    fn from_single_slot(iovec: Iovec) -> Self {
        match iovec.0.tag() {
            PaddrTag::Pbuf | PaddrTag::PbufOneRef => Payload::Pbuf(iovec.0),
            PaddrTag::ShortAddr(_) => Payload::Short(iovec.0),
            PaddrTag::Pvbuf => Payload::Pvbuf(iovec.0),
            PaddrTag::LongAddr => unreachable!("a long address never occupies a single slot"),
        }
    }
}

/// Bundles the three pools a tree mutation needs: pbuf storage, pvbuf node
/// storage, and the external-region registry, so `prepend`/`append`/pop can
/// bump or release an externally-owned short/long payload directly instead
/// of leaving that step to the caller.
pub struct PvbufOps<'a> {
    pub pbufs: &'a PbufAllocTable,
    pub pvbufs: &'a PvbufAllocTable,
    pub external: &'a ExternalRegionTable,
}

impl<'a> PvbufOps<'a> {
    #[must_use]
    pub fn new(pbufs: &'a PbufAllocTable, pvbufs: &'a PvbufAllocTable, external: &'a ExternalRegionTable) -> Self {
        Self { pbufs, pvbufs, external }
    }

    fn node(&self, paddr: Paddr) -> PvbufNode<'a> {
        PvbufNode::new(paddr, self.pvbufs)
    }

    fn set_cached_length(&self, pvbuf: Paddr, length: u64) -> Paddr {
        pvbuf.with_pvbuf_data_length(length)
    }

    /// Wrap `root` in a single-child pvbuf if it isn't one already, so
    /// prepend/append always have a node to grow.
    fn ensure_pvbuf_root(&self, root: Paddr, spare_slots: usize) -> Result<Paddr> {
        if root.is_pvbuf() && self.node(root).capacity() - self.node(root).len() >= spare_slots {
            return Ok(root);
        }
        if root.is_pvbuf() {
            return self.grow(root, spare_slots);
        }
        let len = traverse::calc_length(root);
        let pv = self.pvbufs.alloc_empty(1 + spare_slots)?;
        self.node(pv).push(Iovec(root))?;
        Ok(self.set_cached_length(pv, len))
    }

    /// Reallocate `pvbuf` into a larger size class, preserving its
    /// children, and release the old node.
    fn grow(&self, pvbuf: Paddr, extra_slots_needed: usize) -> Result<Paddr> {
        let old = self.node(pvbuf);
        let children = old.children();
        let new_pv = self.pvbufs.alloc_empty(children.len() + extra_slots_needed)?;
        let new_node = self.node(new_pv);
        for child in children {
            new_node.push(child)?;
        }
        self.pvbufs.release(pvbuf);
        Ok(self.set_cached_length(new_pv, pvbuf.pvbuf_data_length()))
    }

    /// The single logical leaf a node holds, if it holds exactly one —
    /// either one slot (pbuf/short/pvbuf) or the two slots of a long
    /// address.
    fn single_leaf(&self, node: &PvbufNode<'a>) -> Option<Payload> {
        let children = node.children();
        match children.as_slice() {
            [only] => Some(Payload::from_single_slot(*only)),
            [w1, w2] if matches!(w1.0.tag(), PaddrTag::LongAddr) => Some(Payload::Long(w1.0, w2.0)),
            _ => None,
        }
    }

    /// When `compress` is set, repeatedly unwrap a single-leaf pvbuf
    /// payload down to the leaf it wraps, releasing the now-empty wrapper
    /// pvbufs along the way.
    fn admit_payload(&self, mut payload: Payload, compress: bool) -> Payload {
        if !compress {
            return payload;
        }
        while let Payload::Pvbuf(p) = payload {
            let node = self.node(p);
            let Some(inner) = self.single_leaf(&node) else { break };
            self.pvbufs.release(p);
            payload = inner;
        }
        payload
    }

    /// Record the tree's new ownership of `payload`. A pbuf's refcount is
    /// bumped through the pbuf pool; a short/long address is bumped through
    /// the external-region registry. Pvbufs carry no refcount of their own
    /// — attaching one transfers the caller's existing ownership rather
    /// than sharing it.
    fn bump_payload(&self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Pbuf(p) => {
                self.pbufs.bump_refcnt(p);
                Ok(())
            }
            Payload::Short(p) => self.external.bump_refcnt_short(p),
            Payload::Long(w1, w2) => self.external.bump_refcnt_long(w1, w2),
            Payload::Pvbuf(_) => Ok(()),
        }
    }

    /// Attach `payload` as the new leading child of `root`, bumping its
    /// refcount (the caller keeps its own handle and must still release it
    /// independently). `compress` unwraps a single-leaf pvbuf payload
    /// before attaching it.
    pub fn prepend(&self, root: Paddr, payload: Payload, compress: bool) -> Result<Paddr> {
        let payload = self.admit_payload(payload, compress);
        self.bump_payload(payload)?;
        let len = payload.length();
        let pv = self.ensure_pvbuf_root(root, payload.slot_count())?;
        let node = self.node(pv);
        let (first, second) = payload.into_iovecs();
        if let Some(second) = second {
            node.push_front(second)?;
            node.push_front(first)?;
        } else {
            node.push_front(first)?;
        }
        let new_len = pv.pvbuf_data_length() + len;
        Ok(self.set_cached_length(pv, new_len))
    }

    /// Attach `payload` as the new trailing child of `root`. See
    /// [`Self::prepend`] for the refcount/compress semantics.
    pub fn append(&self, root: Paddr, payload: Payload, compress: bool) -> Result<Paddr> {
        let payload = self.admit_payload(payload, compress);
        self.bump_payload(payload)?;
        let len = payload.length();
        let pv = self.ensure_pvbuf_root(root, payload.slot_count())?;
        let node = self.node(pv);
        let (first, second) = payload.into_iovecs();
        node.push(first)?;
        if let Some(second) = second {
            node.push(second)?;
        }
        let new_len = pv.pvbuf_data_length() + len;
        Ok(self.set_cached_length(pv, new_len))
    }

    /// Convenience wrapper over [`Self::prepend`]: copy `data` into a fresh
    /// pbuf and prepend it. The new pbuf is solely owned by the tree, so
    /// unlike [`Self::prepend`]'s `payload` form this never bumps a
    /// refcount.
    pub fn prepend_bytes(&self, root: Paddr, data: &[u8]) -> Result<Paddr> {
        let new_pbuf = self.pbufs.alloc(data.len(), 0, 0)?;
        self.pbufs.with_buffer_mut(new_pbuf, |buf| {
            let start = self.pbufs.intra_buffer_offset(new_pbuf);
            buf[start..start + data.len()].copy_from_slice(data);
        });
        let pv = self.ensure_pvbuf_root(root, 1)?;
        let node = self.node(pv);
        if let Err(e) = node.push_front(Iovec(new_pbuf)) {
            self.pbufs.release(new_pbuf);
            return Err(e);
        }
        let new_len = pv.pvbuf_data_length() + data.len() as u64;
        Ok(self.set_cached_length(pv, new_len))
    }

    /// Convenience wrapper over [`Self::append`]; see [`Self::prepend_bytes`].
    pub fn append_bytes(&self, root: Paddr, data: &[u8]) -> Result<Paddr> {
        let new_pbuf = self.pbufs.alloc(data.len(), 0, 0)?;
        self.pbufs.with_buffer_mut(new_pbuf, |buf| {
            let start = self.pbufs.intra_buffer_offset(new_pbuf);
            buf[start..start + data.len()].copy_from_slice(data);
        });
        let pv = self.ensure_pvbuf_root(root, 1)?;
        let node = self.node(pv);
        if let Err(e) = node.push(Iovec(new_pbuf)) {
            self.pbufs.release(new_pbuf);
            return Err(e);
        }
        let new_len = pv.pvbuf_data_length() + data.len() as u64;
        Ok(self.set_cached_length(pv, new_len))
    }

    /// Remove up to `n` leading bytes. Never fails: popping more than the
    /// chain holds empties it and returns however many bytes were actually
    /// available. A leaf straddling the `n` boundary is sliced in place
    /// (offset/length adjusted on its own paddr) rather than copied.
    /// Returns the (possibly unchanged) root and the number of bytes
    /// actually removed.
    pub fn pop_hdrs(&self, root: Paddr, n: u64) -> (Paddr, u64) {
        if !root.is_pvbuf() {
            return self.pop_leaf(root, n, Direction::Front);
        }
        let node = self.node(root);
        let mut remaining = n;
        let mut removed = 0u64;
        while remaining > 0 {
            let Some(first) = node.children().first().copied() else { break };
            match first.0.tag() {
                PaddrTag::Pvbuf => {
                    let (new_child, took) = self.pop_hdrs(first.0, remaining);
                    removed += took;
                    remaining -= took;
                    if self.node(new_child).is_empty() {
                        self.pvbufs.release(new_child);
                        node.pop_front(1).expect("front slot occupied");
                    } else {
                        node.replace_at(0, Iovec(new_child)).expect("front slot occupied");
                    }
                    if took == 0 {
                        break;
                    }
                }
                PaddrTag::LongAddr => {
                    let w2 = node.children().get(1).copied().unwrap_or(Iovec(Paddr::NULL));
                    let len = u64::from(Paddr::long_data_length(first.0, w2.0));
                    if remaining >= len {
                        node.pop_front(2).expect("two occupied slots for long address");
                        let _ = self.external.free_long(first.0, w2.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let region = Paddr::long_memory_region(first.0, w2.0);
                        let offset = Paddr::long_offset(first.0, w2.0) + remaining;
                        let new_len = (len - remaining) as u32;
                        let (nw1, nw2) = Paddr::make_long(region, offset, new_len);
                        node.replace_at(0, Iovec(nw1)).expect("front slot occupied");
                        node.replace_at(1, Iovec(nw2)).expect("second slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
                PaddrTag::ShortAddr(_) => {
                    let len = first.0.short_data_length();
                    if remaining >= len {
                        node.pop_front(1).expect("front slot occupied");
                        let _ = self.external.free_short(first.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let new_offset = first.0.short_offset() + remaining;
                        let new_len = len - remaining;
                        let sliced = first.0.with_short_offset_and_length(new_offset, new_len);
                        node.replace_at(0, Iovec(sliced)).expect("front slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
                PaddrTag::Pbuf | PaddrTag::PbufOneRef => {
                    let len = u64::from(first.0.pbuf_data_length());
                    if remaining >= len {
                        node.pop_front(1).expect("front slot occupied");
                        self.pbufs.release(first.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let new_offset = first.0.pbuf_offset() + remaining;
                        let new_len = (len - remaining) as u32;
                        let sliced = first.0.with_pbuf_offset_and_length(new_offset, new_len);
                        node.replace_at(0, Iovec(sliced)).expect("front slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
            }
        }
        let new_len = root.pvbuf_data_length().saturating_sub(removed);
        (self.set_cached_length(root, new_len), removed)
    }

    /// Remove up to `n` trailing bytes. See [`Self::pop_hdrs`] for the
    /// never-fails/partial-leaf-slicing semantics, mirrored from the tail.
    pub fn pop_trailers(&self, root: Paddr, n: u64) -> (Paddr, u64) {
        if !root.is_pvbuf() {
            return self.pop_leaf(root, n, Direction::Back);
        }
        let node = self.node(root);
        let mut remaining = n;
        let mut removed = 0u64;
        while remaining > 0 {
            let Some(last) = node.children().last().copied() else { break };
            let last_idx = node.len() - 1;
            match last.0.tag() {
                PaddrTag::Pvbuf => {
                    let (new_child, took) = self.pop_trailers(last.0, remaining);
                    removed += took;
                    remaining -= took;
                    if self.node(new_child).is_empty() {
                        self.pvbufs.release(new_child);
                        node.pop_back(1).expect("back slot occupied");
                    } else {
                        node.replace_at(last_idx, Iovec(new_child)).expect("back slot occupied");
                    }
                    if took == 0 {
                        break;
                    }
                }
                PaddrTag::LongAddr => {
                    // A long address always occupies the two slots ending
                    // at `last_idx`; its first word is the previous slot.
                    let w1 = node.children()[last_idx - 1];
                    let len = u64::from(Paddr::long_data_length(w1.0, last.0));
                    if remaining >= len {
                        node.pop_back(2).expect("two occupied slots for long address");
                        let _ = self.external.free_long(w1.0, last.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let region = Paddr::long_memory_region(w1.0, last.0);
                        let offset = Paddr::long_offset(w1.0, last.0);
                        let new_len = (len - remaining) as u32;
                        let (nw1, nw2) = Paddr::make_long(region, offset, new_len);
                        node.replace_at(last_idx - 1, Iovec(nw1)).expect("slot occupied");
                        node.replace_at(last_idx, Iovec(nw2)).expect("slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
                PaddrTag::ShortAddr(_) => {
                    let len = last.0.short_data_length();
                    if remaining >= len {
                        node.pop_back(1).expect("back slot occupied");
                        let _ = self.external.free_short(last.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let new_len = len - remaining;
                        let sliced = last.0.with_short_offset_and_length(last.0.short_offset(), new_len);
                        node.replace_at(last_idx, Iovec(sliced)).expect("back slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
                PaddrTag::Pbuf | PaddrTag::PbufOneRef => {
                    let len = u64::from(last.0.pbuf_data_length());
                    if remaining >= len {
                        node.pop_back(1).expect("back slot occupied");
                        self.pbufs.release(last.0);
                        removed += len;
                        remaining -= len;
                    } else {
                        let new_len = (len - remaining) as u32;
                        let sliced = last.0.with_pbuf_offset_and_length(last.0.pbuf_offset(), new_len);
                        node.replace_at(last_idx, Iovec(sliced)).expect("back slot occupied");
                        removed += remaining;
                        remaining = 0;
                    }
                }
            }
        }
        let new_len = root.pvbuf_data_length().saturating_sub(removed);
        (self.set_cached_length(root, new_len), removed)
    }

    /// `pop_hdrs`/`pop_trailers` over a bare leaf root (not wrapped in a
    /// pvbuf). A long-address leaf can't be handled this way — releasing
    /// or slicing it needs both of its words, which a single-`Paddr` root
    /// can't carry — so that case returns the root untouched with zero
    /// bytes removed.
    fn pop_leaf(&self, root: Paddr, n: u64, _direction: Direction) -> (Paddr, u64) {
        match root.tag() {
            PaddrTag::Pbuf | PaddrTag::PbufOneRef => {
                let len = u64::from(root.pbuf_data_length());
                if n >= len {
                    self.pbufs.release(root);
                    (Paddr::NULL, len)
                } else {
                    let new_len = (len - n) as u32;
                    (root.with_pbuf_offset_and_length(root.pbuf_offset(), new_len), n)
                }
            }
            PaddrTag::ShortAddr(_) => {
                let len = root.short_data_length();
                if n >= len {
                    let _ = self.external.free_short(root);
                    (Paddr::NULL, len)
                } else {
                    let new_len = len - n;
                    (root.with_short_offset_and_length(root.short_offset(), new_len), n)
                }
            }
            PaddrTag::LongAddr | PaddrTag::Pvbuf => (root, 0),
        }
    }

    /// Ensure the first `len` bytes of the chain are contiguous in a single
    /// pbuf, copying leading leaves together if they currently span more
    /// than one. No-op if the first child already covers `len` bytes.
    pub fn pullup(&self, root: Paddr, len: usize) -> Result<Paddr> {
        assert!(root.is_pvbuf(), "pullup requires a pvbuf root");
        let node = self.node(root);
        let children = node.children();
        if let Some(first) = children.first() {
            if matches!(first.0.tag(), PaddrTag::Pbuf | PaddrTag::PbufOneRef) && first.0.pbuf_data_length() as usize >= len {
                return Ok(root);
            }
        }
        let mut collected = Vec::with_capacity(len);
        let mut consumed = 0usize;
        let mut leftover_tail: Option<Iovec> = None;

        for child in &children {
            if collected.len() >= len {
                break;
            }
            let PaddrTag::Pbuf | PaddrTag::PbufOneRef = child.0.tag() else {
                return Err(Error::InvariantViolation("pullup: not enough contiguous leading pbuf data"));
            };
            let child_len = child.0.pbuf_data_length() as usize;
            let need = len - collected.len();

            if need >= child_len {
                self.pbufs.with_buffer(child.0, |buf| {
                    let start = self.pbufs.intra_buffer_offset(child.0);
                    collected.extend_from_slice(&buf[start..start + child_len]);
                });
                self.pbufs.release(child.0);
                consumed += 1;
            } else {
                // This child straddles the `len` boundary: keep its tail as
                // a fresh standalone child so those bytes aren't lost.
                let tail_len = child_len - need;
                let mut tail = vec![0u8; tail_len];
                self.pbufs.with_buffer(child.0, |buf| {
                    let start = self.pbufs.intra_buffer_offset(child.0);
                    collected.extend_from_slice(&buf[start..start + need]);
                    tail.copy_from_slice(&buf[start + need..start + child_len]);
                });
                let tail_pbuf = self.pbufs.alloc(tail_len, 0, 0)?;
                self.pbufs.with_buffer_mut(tail_pbuf, |buf| {
                    let start = self.pbufs.intra_buffer_offset(tail_pbuf);
                    buf[start..start + tail_len].copy_from_slice(&tail);
                });
                self.pbufs.release(child.0);
                leftover_tail = Some(Iovec(tail_pbuf));
                consumed += 1;
            }
        }

        if collected.len() < len {
            return Err(Error::InvariantViolation("pullup: not enough contiguous leading pbuf data"));
        }

        let new_head = self.pbufs.alloc(len, 0, 0)?;
        self.pbufs.with_buffer_mut(new_head, |buf| {
            let start = self.pbufs.intra_buffer_offset(new_head);
            buf[start..start + len].copy_from_slice(&collected);
        });
        node.pop_front(consumed)?;
        if let Some(tail_iovec) = leftover_tail {
            node.push_front(tail_iovec)?;
        }
        node.push_front(Iovec(new_head))?;
        Ok(root)
    }

    /// Ensure the trailing `len` bytes are contiguous in a single pbuf,
    /// mirroring [`Self::pullup`] from the tail: leaves are consumed back
    /// to front, and a leaf straddling the `len` boundary keeps its head as
    /// a fresh standalone child so those bytes aren't lost.
    pub fn pulltail(&self, root: Paddr, len: usize) -> Result<Paddr> {
        assert!(root.is_pvbuf(), "pulltail requires a pvbuf root");
        let node = self.node(root);
        let children = node.children();
        if let Some(last) = children.last() {
            if matches!(last.0.tag(), PaddrTag::Pbuf | PaddrTag::PbufOneRef) && last.0.pbuf_data_length() as usize >= len {
                return Ok(root);
            }
        }

        let mut collected = Vec::with_capacity(len);
        let mut consumed = 0usize;
        let mut leftover_head: Option<Iovec> = None;

        for child in children.iter().rev() {
            if collected.len() >= len {
                break;
            }
            let PaddrTag::Pbuf | PaddrTag::PbufOneRef = child.0.tag() else {
                return Err(Error::InvariantViolation("pulltail: not enough contiguous trailing pbuf data"));
            };
            let child_len = child.0.pbuf_data_length() as usize;
            let need = len - collected.len();

            if need >= child_len {
                let mut merged = Vec::with_capacity(child_len + collected.len());
                self.pbufs.with_buffer(child.0, |buf| {
                    let start = self.pbufs.intra_buffer_offset(child.0);
                    merged.extend_from_slice(&buf[start..start + child_len]);
                });
                merged.extend_from_slice(&collected);
                collected = merged;
                self.pbufs.release(child.0);
                consumed += 1;
            } else {
                // This child straddles the `len` boundary: keep its head as
                // a fresh standalone child so those bytes aren't lost.
                let head_len = child_len - need;
                let mut head = vec![0u8; head_len];
                let mut merged = Vec::with_capacity(len);
                self.pbufs.with_buffer(child.0, |buf| {
                    let start = self.pbufs.intra_buffer_offset(child.0);
                    head.copy_from_slice(&buf[start..start + head_len]);
                    merged.extend_from_slice(&buf[start + head_len..start + child_len]);
                });
                merged.extend_from_slice(&collected);
                collected = merged;
                let head_pbuf = self.pbufs.alloc(head_len, 0, 0)?;
                self.pbufs.with_buffer_mut(head_pbuf, |buf| {
                    let start = self.pbufs.intra_buffer_offset(head_pbuf);
                    buf[start..start + head_len].copy_from_slice(&head);
                });
                self.pbufs.release(child.0);
                leftover_head = Some(Iovec(head_pbuf));
                consumed += 1;
            }
        }

        if collected.len() < len {
            return Err(Error::InvariantViolation("pulltail: not enough contiguous trailing pbuf data"));
        }

        let new_tail = self.pbufs.alloc(len, 0, 0)?;
        self.pbufs.with_buffer_mut(new_tail, |buf| {
            let start = self.pbufs.intra_buffer_offset(new_tail);
            buf[start..start + len].copy_from_slice(&collected);
        });
        node.pop_back(consumed)?;
        if let Some(head_iovec) = leftover_head {
            node.push(head_iovec)?;
        }
        node.push(Iovec(new_tail))?;
        Ok(root)
    }

    /// Build a new tree referencing the byte range `[offset, offset +
    /// length)` of `root`, bumping refcounts on shared pbufs rather than
    /// copying their bytes. Partial leaves at either boundary are copied
    /// into freshly allocated pbufs sized to the trimmed range, since a
    /// pbuf's offset/length window can't alias a sub-range of another
    /// live pbuf's refcounted storage without its own handle.
    pub fn clone_range(&self, root: Paddr, offset: u64, length: u64) -> Result<Paddr> {
        let mut out_children: Vec<Iovec> = Vec::new();
        let mut pos = 0u64;
        let end = offset + length;
        let mut err: Option<Error> = None;

        traverse::iterate(root, self.pvbufs, |leaf| {
            if err.is_some() || pos >= end {
                return;
            }
            let leaf_len = leaf.data_length();
            let leaf_start = pos;
            let leaf_end = pos + leaf_len;
            pos = leaf_end;
            if leaf_end <= offset || leaf_start >= end {
                return;
            }
            let rel_start = offset.max(leaf_start) - leaf_start;
            let rel_end = end.min(leaf_end) - leaf_start;
            let Leaf::Pbuf(paddr) = leaf else {
                err = Some(Error::InvariantViolation("clone_range over external (short/long) leaf is not supported"));
                return;
            };
            if rel_start == 0 && rel_end == leaf_len {
                self.pbufs.bump_refcnt(paddr);
                out_children.push(Iovec(paddr));
                return;
            }
            let slice_len = (rel_end - rel_start) as usize;
            let new_pbuf = match self.pbufs.alloc(slice_len, 0, 0) {
                Ok(p) => p,
                Err(e) => {
                    err = Some(e);
                    return;
                }
            };
            self.pbufs.with_buffer(paddr, |src| {
                let src_start = self.pbufs.intra_buffer_offset(paddr) + rel_start as usize;
                self.pbufs.with_buffer_mut(new_pbuf, |dst| {
                    let dst_start = self.pbufs.intra_buffer_offset(new_pbuf);
                    dst[dst_start..dst_start + slice_len].copy_from_slice(&src[src_start..src_start + slice_len]);
                });
            });
            out_children.push(Iovec(new_pbuf));
        });

        if let Some(e) = err {
            return Err(e);
        }

        let new_pv = self.pvbufs.alloc_empty(out_children.len().max(1))?;
        let node = self.node(new_pv);
        for child in out_children {
            node.push(child)?;
        }
        Ok(self.set_cached_length(new_pv, length))
    }

    /// Split `root` into independent pvbufs of the given byte sizes, which
    /// must sum to no more than `root`'s total length. Shared leaves are
    /// refcounted, not copied, by delegating to [`Self::clone_range`].
    pub fn segment(&self, root: Paddr, sizes: &[usize]) -> Result<Vec<Paddr>> {
        let total: u64 = sizes.iter().map(|&s| s as u64).sum();
        let available = traverse::calc_length_deep(root, self.pvbufs);
        if total > available {
            return Err(Error::InvariantViolation("segment: requested sizes exceed available data"));
        }
        let mut out = Vec::with_capacity(sizes.len());
        let mut offset = 0u64;
        for &size in sizes {
            out.push(self.clone_range(root, offset, size as u64)?);
            offset += size as u64;
        }
        Ok(out)
    }
}

enum Direction {
    Front,
    Back,
}
