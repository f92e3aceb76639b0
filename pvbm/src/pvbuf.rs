//! The pvbuf tree node: a packed array of child iovec slots.
//!
//! A pvbuf's slots are filled contiguously from the front; the first
//! [`Iovec::is_empty`] slot marks the end of the occupied range, so no
//! separate occupancy bitmap is needed — finding it is one linear scan
//! bounded by the size class's slot count (at most 128 for the largest
//! class). Each occupied slot's own paddr carries its own data length
//! (`pvbuf_data_length` / `pbuf_data_length` / `short_data_length`), so the
//! node itself stores no aggregate length; [`crate::traverse::calc_length`]
//! walks the slots to compute one.

use crate::error::{Error, Result};
use crate::pvbuf_alloc::PvbufAllocTable;
use pvbm_sys::{Iovec, Paddr};

/// A view over one pvbuf's children, backed by a [`PvbufAllocTable`].
pub struct PvbufNode<'a> {
    pub paddr: Paddr,
    table: &'a PvbufAllocTable,
}

impl<'a> PvbufNode<'a> {
    #[must_use]
    pub fn new(paddr: Paddr, table: &'a PvbufAllocTable) -> Self {
        assert!(paddr.is_pvbuf(), "PvbufNode requires a pvbuf paddr");
        Self { paddr, table }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.num_slots(self.paddr)
    }

    /// Number of occupied slots: the first empty slot from the front, or
    /// the full capacity if every slot is occupied.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.with_slots(self.paddr, |slots| {
            slots.iter().position(Iovec::is_empty).unwrap_or(slots.len())
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Copy out the occupied children, in order.
    #[must_use]
    pub fn children(&self) -> Vec<Iovec> {
        self.table.with_slots(self.paddr, |slots| {
            let n = slots.iter().position(Iovec::is_empty).unwrap_or(slots.len());
            slots[..n].to_vec()
        })
    }

    /// Append a child at the first free slot.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if the node has no free slot.
    pub fn push(&self, child: Iovec) -> Result<()> {
        self.table.with_slots_mut(self.paddr, |slots| {
            let slot = slots
                .iter_mut()
                .find(|s| s.is_empty())
                .ok_or(Error::InvariantViolation("pvbuf node has no free slot for push"))?;
            *slot = child;
            Ok(())
        })
    }

    /// Insert a child at the front, shifting the rest right by one.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if the node is already full.
    pub fn push_front(&self, child: Iovec) -> Result<()> {
        self.table.with_slots_mut(self.paddr, |slots| {
            let len = slots.iter().position(Iovec::is_empty).unwrap_or(slots.len());
            if len == slots.len() {
                return Err(Error::InvariantViolation("pvbuf node has no free slot for push_front"));
            }
            slots.copy_within(0..len, 1);
            slots[0] = child;
            Ok(())
        })
    }

    /// Remove and return the first `count` occupied slots, compacting the
    /// remainder forward so occupancy stays contiguous.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if `count` exceeds the number
    /// of occupied slots.
    pub fn pop_front(&self, count: usize) -> Result<Vec<Iovec>> {
        self.table.with_slots_mut(self.paddr, |slots| {
            let len = slots.iter().position(Iovec::is_empty).unwrap_or(slots.len());
            if count > len {
                return Err(Error::InvariantViolation("pop_front count exceeds occupied slots"));
            }
            let popped = slots[..count].to_vec();
            slots.copy_within(count..len, 0);
            for slot in &mut slots[len - count..len] {
                *slot = Iovec::ZERO;
            }
            Ok(popped)
        })
    }

    /// Remove and return the last `count` occupied slots.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if `count` exceeds the number
    /// of occupied slots.
    pub fn pop_back(&self, count: usize) -> Result<Vec<Iovec>> {
        self.table.with_slots_mut(self.paddr, |slots| {
            let len = slots.iter().position(Iovec::is_empty).unwrap_or(slots.len());
            if count > len {
                return Err(Error::InvariantViolation("pop_back count exceeds occupied slots"));
            }
            let popped = slots[len - count..len].to_vec();
            for slot in &mut slots[len - count..len] {
                *slot = Iovec::ZERO;
            }
            Ok(popped)
        })
    }

    /// Overwrite the occupied slot at `index` in place, without shifting
    /// any neighbor. Used to slice a boundary leaf's offset/length in
    /// place (byte-granular pop) rather than popping and re-pushing it.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`] if `index` is not currently
    /// occupied.
    pub fn replace_at(&self, index: usize, child: Iovec) -> Result<()> {
        self.table.with_slots_mut(self.paddr, |slots| {
            let len = slots.iter().position(Iovec::is_empty).unwrap_or(slots.len());
            if index >= len {
                return Err(Error::InvariantViolation("replace_at index is not an occupied slot"));
            }
            slots[index] = child;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pvbuf_alloc::PvbufAllocTable;

    #[test]
    fn push_and_len() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        assert_eq!(node.len(), 0);
        node.push(Iovec(Paddr::make_pbuf(true, 6, 0, 10))).unwrap();
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn push_front_shifts_existing() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        let a = Iovec(Paddr::make_pbuf(true, 6, 0, 1));
        let b = Iovec(Paddr::make_pbuf(true, 6, 0, 2));
        node.push(a).unwrap();
        node.push_front(b).unwrap();
        let children = node.children();
        assert_eq!(children[0], b);
        assert_eq!(children[1], a);
    }

    #[test]
    fn pop_front_compacts() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        for i in 0..3u32 {
            node.push(Iovec(Paddr::make_pbuf(true, 6, 0, i + 1))).unwrap();
        }
        let popped = node.pop_front(1).unwrap();
        assert_eq!(popped.len(), 1);
        assert_eq!(node.len(), 2);
    }

    #[test]
    fn pop_back_exceeding_occupancy_errors() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        assert!(node.pop_back(1).is_err());
    }

    #[test]
    fn replace_at_overwrites_in_place_without_shifting() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        let a = Iovec(Paddr::make_pbuf(true, 6, 0, 1));
        let b = Iovec(Paddr::make_pbuf(true, 6, 0, 2));
        let c = Iovec(Paddr::make_pbuf(true, 6, 0, 3));
        node.push(a).unwrap();
        node.push(b).unwrap();
        node.replace_at(0, c).unwrap();
        let children = node.children();
        assert_eq!(children, vec![c, b]);
    }

    #[test]
    fn replace_at_unoccupied_index_errors() {
        let table = PvbufAllocTable::new(2);
        let paddr = table.alloc_empty(4).unwrap();
        let node = PvbufNode::new(paddr, &table);
        assert!(node.replace_at(0, Iovec(Paddr::make_pbuf(true, 6, 0, 1))).is_err());
    }
}
