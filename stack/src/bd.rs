//! Buffer descriptors over a fixed payload arena.
//!
//! Each interface carries one RX and one TX [`DescriptorTable`].  A table
//! is a fixed set of [`BufferDescriptor`] slots whose `[first, last)`
//! ranges partition the interface's 2048-byte payload arena.  Allocation
//! is a linear first-fit scan over free slots; freeing just clears the
//! VALID flag and leaves the range in place.
//!
//! # Reclaiming space
//!
//! When an allocation trims a slot's range down to the requested size, the
//! cut-off tail is handed to the nearest slot on the right, provided that
//! slot is free.  There is no coalescing at free time and no leftward
//! merge, so frees that happen out of allocation order can fragment the
//! arena until the table is reset.  The trade-off buys strictly bounded
//! work per call and no allocator metadata beyond the descriptors
//! themselves.

use bitflags::bitflags;
use femtonet_abi::net::{BUFFER_DESCRIPTOR_COUNT, PAYLOAD_ARENA_SIZE};

use crate::types::{Endpoint, Port};

bitflags! {
    /// Ownership and routing state of one buffer descriptor.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BdFlags: u8 {
        /// The descriptor owns its arena range and carries a datagram.
        const VALID    = 1 << 0;
        /// A transmission is parked here waiting for ARP resolution.
        const PENDING  = 1 << 1;
        /// The descriptor belongs to the transmit path.
        const TRANSMIT = 1 << 2;
    }
}

/// One datagram's worth of arena space plus its addressing metadata.
///
/// `first..last` is the owned arena range; `size <= last - first` is the
/// used prefix.  The endpoint fields are meaningful only while VALID is
/// set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub first: usize,
    pub last: usize,
    pub size: usize,
    pub remote: Endpoint,
    pub port: Port,
    pub ip_protocol: u8,
    pub flags: BdFlags,
}

impl BufferDescriptor {
    const EMPTY: Self = Self {
        first: 0,
        last: 0,
        size: 0,
        remote: Endpoint::UNSPECIFIED,
        port: Port(0),
        ip_protocol: 0,
        flags: BdFlags::empty(),
    };

    /// `true` if the descriptor currently owns its range.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(BdFlags::VALID)
    }

    /// Free capacity of the slot's range.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.last - self.first
    }
}

/// Fixed table of buffer descriptors tiling one payload arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorTable {
    slots: [BufferDescriptor; BUFFER_DESCRIPTOR_COUNT],
}

impl DescriptorTable {
    /// Create a table in the canonical state: slot 0 owns the whole arena,
    /// the remaining slots have empty ranges at the arena end, and nothing
    /// is VALID.
    pub const fn new() -> Self {
        let mut slots = [BufferDescriptor::EMPTY; BUFFER_DESCRIPTOR_COUNT];
        slots[0].last = PAYLOAD_ARENA_SIZE;
        let mut i = 1;
        while i < BUFFER_DESCRIPTOR_COUNT {
            slots[i].first = PAYLOAD_ARENA_SIZE;
            slots[i].last = PAYLOAD_ARENA_SIZE;
            i += 1;
        }
        Self { slots }
    }

    /// Restore the canonical state.  Idempotent.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Clear VALID on every slot without touching the ranges.
    pub fn invalidate_all(&mut self) {
        for d in &mut self.slots {
            d.flags.remove(BdFlags::VALID);
        }
    }

    /// Allocate a descriptor for `size` bytes.
    ///
    /// First-fit scan for a free slot whose range can hold `size`.  On
    /// success the slot becomes VALID with `last` trimmed to the used end,
    /// and the trimmed-off tail is donated to the nearest free slot on the
    /// right.  Returns the slot index, or `None` if no free slot fits.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let idx = self
            .slots
            .iter()
            .position(|d| !d.is_valid() && size <= d.capacity())?;

        let new_last = {
            let d = &mut self.slots[idx];
            d.flags = BdFlags::VALID;
            d.size = size;
            d.last = d.first + size;
            d.last
        };

        // Donate the tail to the closest slot starting at or after the new
        // end.  First slot wins on equal distance, so back-to-back
        // allocations walk the table in index order.
        let mut nearest: Option<usize> = None;
        let mut nearest_gap = usize::MAX;
        for (i, other) in self.slots.iter().enumerate() {
            if i == idx || other.first < new_last {
                continue;
            }
            let gap = other.first - new_last;
            if gap < nearest_gap {
                nearest = Some(i);
                nearest_gap = gap;
            }
        }
        if let Some(n) = nearest
            && !self.slots[n].is_valid()
        {
            self.slots[n].first = new_last;
        }

        Some(idx)
    }

    /// Release a descriptor by clearing its flags.  The range is kept and
    /// becomes reusable by later allocations.
    #[inline]
    pub fn free(&mut self, idx: usize) {
        self.slots[idx].flags = BdFlags::empty();
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &BufferDescriptor {
        &self.slots[idx]
    }

    #[inline]
    pub fn get_mut(&mut self, idx: usize) -> &mut BufferDescriptor {
        &mut self.slots[idx]
    }

    #[inline]
    pub fn slots(&self) -> &[BufferDescriptor] {
        &self.slots
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}
