//! Entity-table entry encoding.
//!
//! Each entry is a single `u64` word, read and written atomically so
//! concurrent-marking threads never observe a half-written tag+pointer
//! pair. The word is exactly one of:
//!
//! - a live entry: address in bits 0..=54, 8-bit type tag in bits 55..=62,
//!   mark bit in bit 63;
//! - a freelist entry: reserved FREE tag, next-free index in bits 0..=31;
//! - a zapped entry: reserved ZAPPED tag, no payload.
//!
//! The encodings are produced by mutually exclusive constructors and
//! decoded explicitly; the mark bit never aliases address or tag bits.

use std::sync::atomic::{AtomicU64, Ordering};

/// Raw address payload stored in the table (out-of-sandbox pointer).
pub type Address = u64;

/// 8-bit type tag distinguishing entity kinds.
///
/// Tags `0xFE` and `0xFF` are reserved for the zapped and freelist
/// encodings and are rejected by [`validate`](crate::table::EntityTable::validate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityTag(pub u8);

impl EntityTag {
    /// Last tag value usable by embedders.
    pub const LAST_USABLE: Self = Self(0xFD);
}

/// Number of address bits in a live payload.
pub const ADDRESS_BITS: u32 = 55;
/// Mask selecting the address bits of a live payload.
pub const ADDRESS_MASK: u64 = (1 << ADDRESS_BITS) - 1;
/// Bit position of the type tag.
pub const TAG_SHIFT: u32 = 55;
/// Mask selecting the tag bits.
pub const TAG_MASK: u64 = 0xFF << TAG_SHIFT;
/// The per-cycle mark bit (top bit; transient metadata).
pub const MARK_BIT: u64 = 1 << 63;
/// Low bit every valid entity address must carry (heap-object tag).
pub const HEAP_OBJECT_TAG: u64 = 0b1;

const FREE_ENTRY_TAG: u8 = 0xFF;
const ZAPPED_ENTRY_TAG: u8 = 0xFE;

// ============================================================================
// Payload
// ============================================================================

/// Decoded view over one entry word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload(u64);

impl Payload {
    /// Encode a live entry. `address` must already be validated.
    #[must_use]
    pub fn for_trusted_pointer_entry(address: Address, tag: EntityTag) -> Self {
        debug_assert_eq!(address & !ADDRESS_MASK, 0);
        debug_assert!(tag.0 < FREE_ENTRY_TAG && tag.0 < ZAPPED_ENTRY_TAG);
        Self(address | (u64::from(tag.0) << TAG_SHIFT))
    }

    /// Encode a freelist entry linking to `next` (0 terminates the list).
    #[must_use]
    pub fn for_freelist_entry(next: u32) -> Self {
        Self(u64::from(next) | (u64::from(FREE_ENTRY_TAG) << TAG_SHIFT))
    }

    /// Encode a zapped (deliberately invalidated) entry.
    #[must_use]
    pub const fn for_zapped_entry() -> Self {
        Self((ZAPPED_ENTRY_TAG as u64) << TAG_SHIFT)
    }

    #[inline]
    fn tag_bits(self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        {
            ((self.0 & TAG_MASK) >> TAG_SHIFT) as u8
        }
    }

    /// Returns `true` for live entries (not free, not zapped).
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        !self.is_free() && !self.is_zapped()
    }

    /// Returns `true` for freelist entries.
    #[inline]
    #[must_use]
    pub fn is_free(self) -> bool {
        self.tag_bits() == FREE_ENTRY_TAG
    }

    /// Returns `true` for zapped entries.
    #[inline]
    #[must_use]
    pub fn is_zapped(self) -> bool {
        self.tag_bits() == ZAPPED_ENTRY_TAG
    }

    /// Returns `true` if the mark bit is set.
    #[inline]
    #[must_use]
    pub const fn is_marked(self) -> bool {
        self.0 & MARK_BIT != 0
    }

    /// The stored address if this is a live entry tagged `tag`, else 0.
    ///
    /// A tag mismatch yields a deliberately unusable null rather than an
    /// error: this is the type-confusion defense on the hot path.
    #[inline]
    #[must_use]
    pub fn untag(self, tag: EntityTag) -> Address {
        if self.is_live() && self.tag_bits() == tag.0 {
            self.0 & ADDRESS_MASK
        } else {
            0
        }
    }

    /// The stored tag of a live entry.
    #[must_use]
    pub fn extract_tag(self) -> Option<EntityTag> {
        if self.is_live() {
            Some(EntityTag(self.tag_bits()))
        } else {
            None
        }
    }

    /// The stored address of a live entry, regardless of tag.
    #[must_use]
    pub fn extract_address(self) -> Option<Address> {
        if self.is_live() {
            Some(self.0 & ADDRESS_MASK)
        } else {
            None
        }
    }

    /// Next-free index of a freelist entry.
    ///
    /// Only meaningful when [`is_free`](Self::is_free) holds; callers on
    /// the allocation path read this speculatively and re-check via CAS.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn extract_freelist_link(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Copy of this payload with the mark bit set.
    #[must_use]
    pub const fn with_mark(self) -> Self {
        Self(self.0 | MARK_BIT)
    }

    /// Copy of this payload with the mark bit cleared.
    #[must_use]
    pub const fn without_mark(self) -> Self {
        Self(self.0 & !MARK_BIT)
    }
}

// ============================================================================
// Entry
// ============================================================================

/// One table slot: an atomically accessed payload word.
#[derive(Debug)]
pub struct Entry {
    payload: AtomicU64,
}

impl Entry {
    /// A fresh entry holding the zapped encoding.
    #[must_use]
    pub const fn zapped() -> Self {
        Self {
            payload: AtomicU64::new(Payload::for_zapped_entry().0),
        }
    }

    /// Atomically read the whole payload.
    #[inline]
    pub fn load(&self) -> Payload {
        Payload(self.payload.load(Ordering::Relaxed))
    }

    /// Atomically replace the whole payload.
    #[inline]
    pub fn store(&self, payload: Payload) {
        self.payload.store(payload.0, Ordering::Relaxed);
    }

    /// Set the mark bit.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not live: marking a free or zapped entry
    /// means the caller holds a stale or forged handle, which is a sandbox
    /// violation, not a recoverable state.
    pub fn mark(&self) {
        let mut current = self.load();
        loop {
            assert!(current.is_live(), "mark() on a non-live table entry");
            match self.payload.compare_exchange_weak(
                current.0,
                current.with_mark().0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = Payload(actual),
            }
        }
    }

    /// Clear the mark bit (sweep epilogue for surviving entries).
    pub fn clear_mark(&self) {
        let current = self.load();
        self.store(current.without_mark());
    }
}
