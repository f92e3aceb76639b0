//! Wire-level layout of the packet address (`paddr`) handle.
//!
//! A [`Paddr`] is a 64-bit tagged union: the top 4 bits select one of five
//! variants (long address, pvbuf, pbuf, single-reference pbuf, short
//! address), and the remaining bits carry an offset/index plus, when the
//! paddr sits in an [`Iovec`] slot, a data length. This crate only encodes
//! and decodes the bit layout; it does not allocate or own any memory.
//!
//! Decode functions assert the paddr carries the tag the caller expects.
//! A mismatched tag is a contract violation, not a recoverable error, so
//! these assertions panic rather than return `Result` (see the manager
//! crate's error handling notes).

#![allow(clippy::unreadable_literal)]

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Number of bits used for the pvbuf allocator index field.
pub const PVBUF_INDEX_BITS: u32 = 24;
/// Number of bits used for the pvbuf data-length field.
pub const PVBUF_DATA_LEN_BITS: u32 = 64 - 8 - PVBUF_INDEX_BITS;
/// Largest representable pvbuf allocator index (exclusive).
pub const PVBUF_MAX_INDEX: u32 = 1 << PVBUF_INDEX_BITS;
/// Largest representable pvbuf data length (exclusive).
pub const PVBUF_MAX_LEN: u64 = 1 << PVBUF_DATA_LEN_BITS;

/// Number of bits used for the pbuf data-length field.
pub const PBUF_DATA_LEN_BITS: u32 = 20;
/// Number of bits used for the pbuf intra-region offset field.
pub const PBUF_OFFSET_BITS: u32 = 64 - 8 - PBUF_DATA_LEN_BITS;
/// Largest representable pbuf data length that fits directly in the field.
pub const PBUF_MAX_DATA_LEN: u32 = 1 << PBUF_DATA_LEN_BITS;
/// Number of pbuf size classes (size shifts 6..=20 inclusive).
pub const PBUF_NUM_SIZE_SHIFTS: u32 = 15;
/// Smallest pbuf size shift (2^6 = 64 bytes).
pub const PBUF_BASE_SIZE_SHIFT: u32 = 6;
/// Largest pbuf size shift (2^20 = 1 MiB).
pub const PBUF_MAX_SIZE_SHIFT: u32 = PBUF_BASE_SIZE_SHIFT + PBUF_NUM_SIZE_SHIFTS - 1;

/// Number of bits used for a short address's in-region offset field.
pub const SHORT_ADDR_OFFSET_BITS: u32 = 44;
/// Number of bits used for a short address's data-length field.
pub const SHORT_ADDR_DATA_LEN_BITS: u32 = 64 - 2 - SHORT_ADDR_OFFSET_BITS;
/// Largest representable short-address data length (stored value is length - 1).
pub const SHORT_ADDR_MAX_DATA_LEN: u64 = 1 << SHORT_ADDR_DATA_LEN_BITS;
/// Largest representable short-address offset (exclusive).
pub const SHORT_ADDR_MAX_OFFSET: u64 = 1 << SHORT_ADDR_OFFSET_BITS;

/// Number of pvbuf size classes (1..=16 cache lines).
pub const PVBUF_NUM_SIZES: u32 = 16;
/// Cache line size used to size pvbuf size classes, in bytes.
pub const CACHELINE_SIZE: usize = 64;

const TAG_SHIFT: u32 = 60;
const TAG_MASK: u64 = 0xF;

/// Discriminant decoded from a paddr's top 4 bits.
///
/// For a short address the region id (1, 2, or 3) is carried alongside the
/// tag since the bottom two bits of the 4-bit nibble are not a fixed
/// selector: they overlap the top two bits of the 44-bit offset field and
/// vary with the encoded address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddrTag {
    LongAddr,
    Pvbuf,
    Pbuf,
    PbufOneRef,
    ShortAddr(ShortRegion),
}

/// Which of the three short-address memory regions a short paddr refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortRegion {
    Region1,
    Region2,
    Region3,
}

impl ShortRegion {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        match bits {
            0b01 => Self::Region1,
            0b10 => Self::Region2,
            0b11 => Self::Region3,
            _ => panic!("invalid short address region selector"),
        }
    }

    #[must_use]
    pub const fn to_bits(self) -> u64 {
        match self {
            Self::Region1 => 0b01,
            Self::Region2 => 0b10,
            Self::Region3 => 0b11,
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Region1 => 0,
            Self::Region2 => 1,
            Self::Region3 => 2,
        }
    }
}

/// A 64-bit packet address handle.
///
/// The all-zero value is the canonical null paddr (`Paddr::NULL`).
#[derive(Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct Paddr(u64);

impl Paddr {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn tag_nibble(self) -> u64 {
        (self.0 >> TAG_SHIFT) & TAG_MASK
    }

    /// Decode the variant discriminant. All 16 nibble values are covered,
    /// so this never panics.
    #[must_use]
    pub fn tag(self) -> PaddrTag {
        match self.tag_nibble() {
            0b0000 => PaddrTag::LongAddr,
            0b0001 => PaddrTag::Pvbuf,
            0b0010 => PaddrTag::Pbuf,
            0b0011 => PaddrTag::PbufOneRef,
            nibble => {
                let region = ShortRegion::from_bits((nibble >> 2) & 0b11);
                PaddrTag::ShortAddr(region)
            }
        }
    }

    #[must_use]
    pub fn is_pbuf(self) -> bool {
        matches!(self.tag(), PaddrTag::Pbuf | PaddrTag::PbufOneRef)
    }

    #[must_use]
    pub fn is_pvbuf(self) -> bool {
        matches!(self.tag(), PaddrTag::Pvbuf)
    }

    #[must_use]
    pub fn is_short_addr(self) -> bool {
        matches!(self.tag(), PaddrTag::ShortAddr(_))
    }

    #[must_use]
    pub fn is_long_addr(self) -> bool {
        matches!(self.tag(), PaddrTag::LongAddr)
    }

    fn assert_tag(self, expected: PaddrTag, what: &str) {
        let got = self.tag();
        assert!(
            std::mem::discriminant(&got) == std::mem::discriminant(&expected),
            "{what}: expected paddr tag {expected:?}, got {got:?} (raw = {:#018x})",
            self.0
        );
    }

    // ---- pvbuf ----

    #[must_use]
    pub fn make_pvbuf(size_class: u8, index: u32) -> Self {
        assert!(size_class < PVBUF_NUM_SIZES as u8, "pvbuf size class out of range");
        assert!(index < PVBUF_MAX_INDEX, "pvbuf index out of range");
        let raw = (0b0001u64 << TAG_SHIFT)
            | (u64::from(size_class) << (PVBUF_INDEX_BITS + PVBUF_DATA_LEN_BITS))
            | (u64::from(index) << PVBUF_DATA_LEN_BITS);
        Self(raw)
    }

    #[must_use]
    pub fn pvbuf_size_class(self) -> u8 {
        self.assert_tag(PaddrTag::Pvbuf, "pvbuf_size_class");
        ((self.0 >> (PVBUF_INDEX_BITS + PVBUF_DATA_LEN_BITS)) & 0xF) as u8
    }

    #[must_use]
    pub fn pvbuf_index(self) -> u32 {
        self.assert_tag(PaddrTag::Pvbuf, "pvbuf_index");
        ((self.0 >> PVBUF_DATA_LEN_BITS) & ((1u64 << PVBUF_INDEX_BITS) - 1)) as u32
    }

    #[must_use]
    pub fn pvbuf_data_length(self) -> u64 {
        self.assert_tag(PaddrTag::Pvbuf, "pvbuf_data_length");
        self.0 & (PVBUF_MAX_LEN - 1)
    }

    #[must_use]
    pub fn with_pvbuf_data_length(self, length: u64) -> Self {
        self.assert_tag(PaddrTag::Pvbuf, "with_pvbuf_data_length");
        let length = if length >= PVBUF_MAX_LEN { 0 } else { length };
        Self((self.0 & !(PVBUF_MAX_LEN - 1)) | length)
    }

    // ---- pbuf ----

    /// `single_ref` selects tag `0011` (no refcount maintained) vs `0010`.
    /// `size_shift` is the absolute size shift (6..=20); the encoded
    /// `buffer_tag` field is `size_shift - 6`, except that a true length of
    /// `2^20` is represented by promoting buffer tag 14 to 15 (see
    /// [`Paddr::pbuf_buffer_tag_for_length`]).
    #[must_use]
    pub fn make_pbuf(single_ref: bool, size_shift: u32, index_offset: u64, length: u32) -> Self {
        assert!(
            (PBUF_BASE_SIZE_SHIFT..=PBUF_MAX_SIZE_SHIFT).contains(&size_shift),
            "pbuf size shift out of range"
        );
        assert!(index_offset < (1u64 << PBUF_OFFSET_BITS), "pbuf offset out of range");
        let tag = if single_ref { 0b0011u64 } else { 0b0010u64 };
        let buffer_tag = Self::pbuf_buffer_tag_for_length(size_shift, length);
        let stored_len = if size_shift == PBUF_MAX_SIZE_SHIFT && length == PBUF_MAX_DATA_LEN {
            0
        } else {
            length
        };
        let raw = (tag << TAG_SHIFT)
            | (u64::from(buffer_tag) << (PBUF_OFFSET_BITS + PBUF_DATA_LEN_BITS))
            | (index_offset << PBUF_DATA_LEN_BITS)
            | u64::from(stored_len);
        Self(raw)
    }

    /// Compute the encoded 4-bit buffer tag for a pbuf of the given size
    /// shift and true payload length. Tag 15 aliases tag 14's allocator but
    /// signals a stored length of exactly `2^20`, since the 20-bit length
    /// field cannot hold that value directly.
    #[must_use]
    pub fn pbuf_buffer_tag_for_length(size_shift: u32, length: u32) -> u8 {
        let base_tag = (size_shift - PBUF_BASE_SIZE_SHIFT) as u8;
        if size_shift == PBUF_MAX_SIZE_SHIFT && length == PBUF_MAX_DATA_LEN {
            base_tag + 1
        } else {
            base_tag
        }
    }

    fn assert_pbuf(self, what: &str) {
        let got = self.tag();
        assert!(
            matches!(got, PaddrTag::Pbuf | PaddrTag::PbufOneRef),
            "{what}: expected a pbuf paddr, got {got:?}"
        );
    }

    #[must_use]
    pub fn is_single_ref(self) -> bool {
        matches!(self.tag(), PaddrTag::PbufOneRef)
    }

    #[must_use]
    pub fn pbuf_buffer_tag(self) -> u8 {
        self.assert_pbuf("pbuf_buffer_tag");
        ((self.0 >> (PBUF_OFFSET_BITS + PBUF_DATA_LEN_BITS)) & 0xF) as u8
    }

    /// The allocator size shift this paddr was drawn from. Buffer tag 15 is
    /// folded back onto 14, since both are served by the size-14 allocator.
    #[must_use]
    pub fn pbuf_size_shift(self) -> u32 {
        let tag = self.pbuf_buffer_tag().min(14);
        PBUF_BASE_SIZE_SHIFT + u32::from(tag)
    }

    #[must_use]
    pub fn pbuf_offset(self) -> u64 {
        self.assert_pbuf("pbuf_offset");
        (self.0 >> PBUF_DATA_LEN_BITS) & ((1u64 << PBUF_OFFSET_BITS) - 1)
    }

    /// True payload length, resolving the buffer-tag-15 / stored-zero
    /// special case back to `2^20`.
    #[must_use]
    pub fn pbuf_data_length(self) -> u32 {
        self.assert_pbuf("pbuf_data_length");
        let stored = (self.0 & (u64::from(PBUF_MAX_DATA_LEN) - 1)) as u32;
        if self.pbuf_buffer_tag() == 15 && stored == 0 {
            PBUF_MAX_DATA_LEN
        } else {
            stored
        }
    }

    #[must_use]
    pub fn with_pbuf_offset_and_length(self, offset: u64, length: u32) -> Self {
        self.assert_pbuf("with_pbuf_offset_and_length");
        assert!(offset < (1u64 << PBUF_OFFSET_BITS), "pbuf offset out of range");
        let size_shift = self.pbuf_size_shift();
        let buffer_tag = Self::pbuf_buffer_tag_for_length(size_shift, length);
        let stored_len = if size_shift == PBUF_MAX_SIZE_SHIFT && length == PBUF_MAX_DATA_LEN {
            0
        } else {
            length
        };
        let tag_bits = self.0 & (TAG_MASK << TAG_SHIFT);
        Self(
            tag_bits
                | (u64::from(buffer_tag) << (PBUF_OFFSET_BITS + PBUF_DATA_LEN_BITS))
                | (offset << PBUF_DATA_LEN_BITS)
                | u64::from(stored_len),
        )
    }

    // ---- short address ----

    #[must_use]
    pub fn make_short(region: ShortRegion, offset: u64, length: u64) -> Self {
        assert!(offset < SHORT_ADDR_MAX_OFFSET, "short address offset out of range");
        assert!(
            length > 0 && length <= SHORT_ADDR_MAX_DATA_LEN,
            "short address length out of range (zero-length short addresses are not representable)"
        );
        let raw = (region.to_bits() << (SHORT_ADDR_OFFSET_BITS + SHORT_ADDR_DATA_LEN_BITS))
            | (offset << SHORT_ADDR_DATA_LEN_BITS)
            | (length - 1);
        Self(raw)
    }

    fn assert_short(self, what: &str) {
        let got = self.tag();
        assert!(
            matches!(got, PaddrTag::ShortAddr(_)),
            "{what}: expected a short address paddr, got {got:?}"
        );
    }

    #[must_use]
    pub fn short_region(self) -> ShortRegion {
        self.assert_short("short_region");
        match self.tag() {
            PaddrTag::ShortAddr(r) => r,
            _ => unreachable!(),
        }
    }

    #[must_use]
    pub fn short_offset(self) -> u64 {
        self.assert_short("short_offset");
        (self.0 >> SHORT_ADDR_DATA_LEN_BITS) & ((1u64 << SHORT_ADDR_OFFSET_BITS) - 1)
    }

    #[must_use]
    pub fn short_data_length(self) -> u64 {
        self.assert_short("short_data_length");
        (self.0 & (SHORT_ADDR_MAX_DATA_LEN - 1)) + 1
    }

    #[must_use]
    pub fn with_short_offset_and_length(self, offset: u64, length: u64) -> Self {
        let region = self.short_region();
        Self::make_short(region, offset, length)
    }

    // ---- long address (two-word) ----
    //
    // Word 1 (MSB to LSB): 4-bit tag (`0000`, bits 60-63), 32-bit data
    // length (bits 28-59), 16-bit high offset (bits 12-27), 6-bit memory
    // region (bits 6-11), 4 reserved bits (bits 2-5), 1-bit word-num == 0
    // (bit 1), 1-bit one-bit == 1 (bit 0).
    // Word 2: 4-bit tag (bits 60-63), 48-bit low offset (bits 12-59), 10
    // reserved bits (bits 2-11), word-num == 1 (bit 1), one-bit == 1 (bit 0).
    //
    // Every field below the tag sits entirely under bit 60, so the 32-bit
    // length never collides with the tag nibble the way a `<< 32` shift
    // would.

    const LONG_ONE_BIT: u64 = 1 << 0;
    const LONG_WORD_NUM: u64 = 1 << 1;
    const LONG_REGION_SHIFT: u32 = 6;
    const LONG_HIGH_OFFSET_SHIFT: u32 = 12;
    const LONG_LENGTH_SHIFT: u32 = 28;
    const LONG_LOW_OFFSET_SHIFT: u32 = 12;

    /// Build the two paddr words for a long address. Both carry `one_bit =
    /// 1` so the pair is distinguishable from the null paddr even though
    /// word 1 alone has tag `0000`, the same nibble as null.
    #[must_use]
    pub fn make_long(memory_region: u8, offset: u64, length: u32) -> (Self, Self) {
        assert!(memory_region < 64, "long address memory region out of range");
        let high_offset = (offset >> 48) & 0xFFFF;
        let low_offset = offset & 0xFFFF_FFFF_FFFF;
        let word1 = (u64::from(length) << Self::LONG_LENGTH_SHIFT)
            | (high_offset << Self::LONG_HIGH_OFFSET_SHIFT)
            | (u64::from(memory_region) << Self::LONG_REGION_SHIFT)
            | Self::LONG_ONE_BIT;
        let word2 = (low_offset << Self::LONG_LOW_OFFSET_SHIFT) | Self::LONG_WORD_NUM | Self::LONG_ONE_BIT;
        (Self(word1), Self(word2))
    }

    fn assert_long_pair(w1: Self, w2: Self, what: &str) {
        assert!(
            w1.is_long_addr() && w2.is_long_addr(),
            "{what}: expected a long-address pair"
        );
        assert!(
            w1.0 & Self::LONG_ONE_BIT != 0 && w2.0 & Self::LONG_ONE_BIT != 0,
            "{what}: long address one_bit must be set in both words"
        );
        assert!(
            w1.0 & Self::LONG_WORD_NUM == 0,
            "{what}: word 1 of a long address must have word_num = 0"
        );
        assert!(
            w2.0 & Self::LONG_WORD_NUM != 0,
            "{what}: word 2 of a long address must have word_num = 1"
        );
    }

    #[must_use]
    pub fn long_data_length(w1: Self, w2: Self) -> u32 {
        Self::assert_long_pair(w1, w2, "long_data_length");
        ((w1.0 >> Self::LONG_LENGTH_SHIFT) & 0xFFFF_FFFF) as u32
    }

    #[must_use]
    pub fn long_memory_region(w1: Self, w2: Self) -> u8 {
        Self::assert_long_pair(w1, w2, "long_memory_region");
        ((w1.0 >> Self::LONG_REGION_SHIFT) & 0x3F) as u8
    }

    #[must_use]
    pub fn long_offset(w1: Self, w2: Self) -> u64 {
        Self::assert_long_pair(w1, w2, "long_offset");
        let high = (w1.0 >> Self::LONG_HIGH_OFFSET_SHIFT) & 0xFFFF;
        let low = (w2.0 >> Self::LONG_LOW_OFFSET_SHIFT) & 0xFFFF_FFFF_FFFF;
        (high << 48) | low
    }

    #[must_use]
    pub fn with_long_offset_and_length(w1: Self, w2: Self, offset: u64, length: u32) -> (Self, Self) {
        let region = Self::long_memory_region(w1, w2);
        Self::make_long(region, offset, length)
    }
}

impl std::fmt::Debug for Paddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "Paddr(null)");
        }
        match self.tag() {
            PaddrTag::Pvbuf => write!(
                f,
                "Paddr(pvbuf size_class={} index={} len={})",
                self.pvbuf_size_class(),
                self.pvbuf_index(),
                self.pvbuf_data_length()
            ),
            PaddrTag::Pbuf | PaddrTag::PbufOneRef => write!(
                f,
                "Paddr(pbuf{} shift={} offset={} len={})",
                if self.is_single_ref() { "[1ref]" } else { "" },
                self.pbuf_size_shift(),
                self.pbuf_offset(),
                self.pbuf_data_length()
            ),
            PaddrTag::ShortAddr(region) => write!(
                f,
                "Paddr(short region={region:?} offset={} len={})",
                self.short_offset(),
                self.short_data_length()
            ),
            PaddrTag::LongAddr => write!(f, "Paddr(long word={:#018x})", self.0),
        }
    }
}

/// One slot of a pvbuf's iovec array. Holds a single [`Paddr`]; a long
/// address spans two adjacent iovec slots.
#[derive(Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct Iovec(pub Paddr);

impl Iovec {
    pub const ZERO: Self = Self(Paddr::NULL);

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0.is_null()
    }
}

impl std::fmt::Debug for Iovec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Iovec({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_paddr_is_zero() {
        assert!(Paddr::NULL.is_null());
        assert_eq!(Paddr::from_raw(0), Paddr::NULL);
    }

    #[test]
    fn pvbuf_round_trip() {
        let p = Paddr::make_pvbuf(3, 12345);
        assert!(p.is_pvbuf());
        assert_eq!(p.pvbuf_size_class(), 3);
        assert_eq!(p.pvbuf_index(), 12345);
        assert_eq!(p.pvbuf_data_length(), 0);
        let p = p.with_pvbuf_data_length(5000);
        assert_eq!(p.pvbuf_data_length(), 5000);
    }

    #[test]
    fn pbuf_round_trip() {
        let p = Paddr::make_pbuf(false, 8, 777, 100);
        assert!(p.is_pbuf());
        assert!(!p.is_single_ref());
        assert_eq!(p.pbuf_size_shift(), 8);
        assert_eq!(p.pbuf_offset(), 777);
        assert_eq!(p.pbuf_data_length(), 100);
    }

    #[test]
    fn pbuf_single_ref_tag() {
        let p = Paddr::make_pbuf(true, 6, 0, 10);
        assert!(p.is_single_ref());
        assert!(p.is_pbuf());
    }

    #[test]
    fn pbuf_max_size_length_promotion() {
        // A full 1 MiB payload at the top size class promotes buffer tag
        // 14 -> 15 and stores a zero length field.
        let p = Paddr::make_pbuf(false, 20, 0, 1 << 20);
        assert_eq!(p.pbuf_buffer_tag(), 15);
        assert_eq!(p.pbuf_size_shift(), 20);
        assert_eq!(p.pbuf_data_length(), 1 << 20);

        let p2 = Paddr::make_pbuf(false, 20, 0, (1 << 20) - 1);
        assert_eq!(p2.pbuf_buffer_tag(), 14);
        assert_eq!(p2.pbuf_data_length(), (1 << 20) - 1);
    }

    #[test]
    fn short_addr_length_minus_one_encoding() {
        let p = Paddr::make_short(ShortRegion::Region2, 42, 1);
        assert_eq!(p.short_data_length(), 1);
        assert_eq!(p.short_offset(), 42);
        assert_eq!(p.short_region(), ShortRegion::Region2);

        let p = Paddr::make_short(ShortRegion::Region3, 0, SHORT_ADDR_MAX_DATA_LEN);
        assert_eq!(p.short_data_length(), SHORT_ADDR_MAX_DATA_LEN);
    }

    #[test]
    #[should_panic(expected = "zero-length short addresses")]
    fn short_addr_rejects_zero_length() {
        let _ = Paddr::make_short(ShortRegion::Region1, 0, 0);
    }

    #[test]
    fn long_addr_round_trip() {
        let offset: u64 = 0x1234_5678_9abc;
        let (w1, w2) = Paddr::make_long(17, offset, 999);
        assert!(w1.is_long_addr());
        assert!(w2.is_long_addr());
        assert_eq!(Paddr::long_data_length(w1, w2), 999);
        assert_eq!(Paddr::long_memory_region(w1, w2), 17);
        assert_eq!(Paddr::long_offset(w1, w2), offset);
    }

    #[test]
    #[should_panic(expected = "expected paddr tag Pvbuf")]
    fn wrong_tag_access_panics() {
        let p = Paddr::make_pbuf(false, 6, 0, 1);
        let _ = p.pvbuf_index();
    }

    #[test]
    fn tag_dispatch_covers_all_nibbles() {
        for nibble in 0u64..16 {
            let raw = nibble << TAG_SHIFT;
            let p = Paddr::from_raw(raw);
            match nibble {
                0 => assert!(p.is_long_addr()),
                1 => assert!(p.is_pvbuf()),
                2 | 3 => assert!(p.is_pbuf()),
                _ => assert!(p.is_short_addr()),
            }
        }
    }
}
