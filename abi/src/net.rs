//! Compile-time sizing of the network stack.
//!
//! Every table and buffer in `femtonet_stack` is statically sized from the
//! constants below.  Changing a value here changes the memory footprint of
//! [`Stack`](../femtonet_stack/struct.Stack.html) and nothing else; no code
//! depends on the specific numbers.

/// Number of physical interfaces managed by one stack instance.
pub const INTERFACE_COUNT: usize = 1;

/// Capacity of the ARP table (entries, complete and provisional together).
pub const ARP_TABLE_SIZE: usize = 4;

/// Capacity of the UDP port table (simultaneous local port bindings).
pub const UDP_PORT_TABLE_SIZE: usize = 8;

/// Buffer descriptors per direction per interface.
pub const BUFFER_DESCRIPTOR_COUNT: usize = 4;

/// Size of each per-interface payload arena in bytes, one for RX and one
/// for TX.  Descriptor ranges partition this region.
pub const PAYLOAD_ARENA_SIZE: usize = 2048;

/// Depth of each bound port's receive ring (queued datagrams per port).
pub const PORT_RX_RING_DEPTH: usize = 2;

/// Minimum accepted Ethernet frame size, without CRC.
pub const MIN_ETH_FRAME_SIZE: usize = 60;

/// Maximum accepted Ethernet frame size, without CRC.  Also the size of
/// the per-interface frame scratch buffers.
pub const MAX_ETH_FRAME_SIZE: usize = 1518;

/// ARP requests sent for a provisional entry before it is evicted and the
/// datagrams waiting on it are dropped.
pub const ARP_MAX_PROBES: u8 = 4;
