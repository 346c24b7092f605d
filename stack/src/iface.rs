//! Per-interface state: addresses, payload arenas, descriptor tables and
//! frame scratch buffers.

use femtonet_abi::net::{MAX_ETH_FRAME_SIZE, PAYLOAD_ARENA_SIZE};

use crate::bd::DescriptorTable;
use crate::types::{Ipv4Addr, MacAddr};

/// One physical port of the stack.
///
/// The RX frame scratch is overwritten by every
/// [`step`](crate::Stack::step) that reads a frame; applications must
/// [`receive`](crate::Stack::receive) queued payloads before the next step
/// that could reuse their arena ranges.  The TX frame scratch holds at
/// most one frame between build and write within a single step.
pub struct Interface {
    pub hw_addr: MacAddr,
    pub ip_addr: Ipv4Addr,
    pub rx_arena: [u8; PAYLOAD_ARENA_SIZE],
    pub tx_arena: [u8; PAYLOAD_ARENA_SIZE],
    pub rx_descriptors: DescriptorTable,
    pub tx_descriptors: DescriptorTable,
    pub rx_frame: [u8; MAX_ETH_FRAME_SIZE],
    pub tx_frame: [u8; MAX_ETH_FRAME_SIZE],
    pub rx_frame_len: usize,
    pub tx_frame_len: usize,
}

impl Interface {
    /// Create an unconfigured interface with canonical descriptor tables.
    pub const fn new() -> Self {
        Self {
            hw_addr: MacAddr::ZERO,
            ip_addr: Ipv4Addr::UNSPECIFIED,
            rx_arena: [0; PAYLOAD_ARENA_SIZE],
            tx_arena: [0; PAYLOAD_ARENA_SIZE],
            rx_descriptors: DescriptorTable::new(),
            tx_descriptors: DescriptorTable::new(),
            rx_frame: [0; MAX_ETH_FRAME_SIZE],
            tx_frame: [0; MAX_ETH_FRAME_SIZE],
            rx_frame_len: 0,
            tx_frame_len: 0,
        }
    }

    /// Reset both descriptor tables to the canonical one-slot state and
    /// clear the frame scratch lengths.  Addresses are kept.  Idempotent.
    pub fn reset_buffers(&mut self) {
        self.rx_descriptors.reset();
        self.tx_descriptors.reset();
        self.rx_frame_len = 0;
        self.tx_frame_len = 0;
    }
}

impl Default for Interface {
    fn default() -> Self {
        Self::new()
    }
}
