//! UDP endpoint layer: port table, receive demultiplexing and datagram
//! frame construction.
//!
//! [`Stack::bind`](crate::Stack::bind) claims a slot in the port table and
//! returns its index as the endpoint designator.  Received datagrams are
//! copied into an RX buffer descriptor and a reference is queued on the
//! owning port's ring; sends park the payload in a TX descriptor that the
//! step loop turns into a frame once ARP resolution completes.
//!
//! Duplicate binds of the same port are not rejected; demultiplexing
//! delivers to the first match in table order.

use femtonet_abi::net::{PORT_RX_RING_DEPTH, UDP_PORT_TABLE_SIZE};
use log::debug;

use crate::bd::BufferDescriptor;
use crate::checksum::{Checksum, ipv4_header_checksum};
use crate::iface::Interface;
use crate::types::{Endpoint, EndpointId, IfaceId, Ipv4Addr, MacAddr, Port};
use crate::{
    ETH_HEADER_LEN, ETHERTYPE_IPV4, IPPROTO_UDP, IPV4_HEADER_LEN, MAX_UDP_PAYLOAD, UDP_HEADER_LEN,
    next_ip_ident,
};

const UDP_OFFSET: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;
const PAYLOAD_OFFSET: usize = UDP_OFFSET + UDP_HEADER_LEN;

// =============================================================================
// Port table
// =============================================================================

/// One bound local UDP port and its receive ring.
///
/// The ring holds indices into the owning interface's RX descriptor table,
/// oldest first.
pub struct PortDescriptor {
    pub iface: IfaceId,
    pub port: Port,
    pub rx_ring: heapless::Deque<usize, PORT_RX_RING_DEPTH>,
}

/// Fixed table of bound ports.  Slots are never reused; the endpoint
/// designator handed to the application is the slot index.
pub struct PortTable {
    entries: heapless::Vec<PortDescriptor, UDP_PORT_TABLE_SIZE>,
}

impl PortTable {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Claim a slot for `(iface, port)`.  Returns the designator, or
    /// `None` when the table is full.
    pub fn bind(&mut self, iface: IfaceId, port: Port) -> Option<EndpointId> {
        let pd = PortDescriptor {
            iface,
            port,
            rx_ring: heapless::Deque::new(),
        };
        match self.entries.push(pd) {
            Ok(()) => Some(EndpointId(self.entries.len() - 1)),
            Err(_) => None,
        }
    }

    pub fn get(&self, ed: EndpointId) -> Option<&PortDescriptor> {
        self.entries.get(ed.0)
    }

    pub fn get_mut(&mut self, ed: EndpointId) -> Option<&mut PortDescriptor> {
        self.entries.get_mut(ed.0)
    }

    /// First table entry bound to `port`, if any.
    fn find_port(&mut self, port: Port) -> Option<&mut PortDescriptor> {
        self.entries.iter_mut().find(|p| p.port == port)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Ingress
// =============================================================================

/// Demultiplex a UDP datagram sitting in the RX scratch (IPv4 filter
/// already passed).
///
/// The datagram is dropped silently if the UDP length disagrees with the
/// IP total length, no port matches, the port's ring is full, or no RX
/// descriptor can hold the payload.
pub(crate) fn handle_datagram(iface: &mut Interface, ports: &mut PortTable) {
    let frame = &iface.rx_frame[..iface.rx_frame_len];
    if frame.len() < PAYLOAD_OFFSET {
        debug!("udp: datagram too short ({})", frame.len());
        return;
    }

    let total_length = u16::from_be_bytes([frame[16], frame[17]]) as usize;
    let src_ip = Ipv4Addr([frame[26], frame[27], frame[28], frame[29]]);

    let p = &frame[UDP_OFFSET..];
    let src_port = u16::from_be_bytes([p[0], p[1]]);
    let dst_port = u16::from_be_bytes([p[2], p[3]]);
    let udp_length = u16::from_be_bytes([p[4], p[5]]) as usize;

    // The UDP payload length must agree with the IP header's view.
    let Some(payload_len) = total_length.checked_sub(IPV4_HEADER_LEN + UDP_HEADER_LEN) else {
        debug!("udp: total length {total_length} shorter than headers");
        return;
    };
    if udp_length != UDP_HEADER_LEN + payload_len {
        debug!("udp: length mismatch (udp={udp_length}, ip payload={payload_len})");
        return;
    }
    if frame.len() < PAYLOAD_OFFSET + payload_len {
        debug!("udp: truncated datagram");
        return;
    }

    let Some(pd) = ports.find_port(Port(dst_port)) else {
        debug!("udp: drop, no port bound for {dst_port}");
        return;
    };
    if pd.rx_ring.is_full() {
        debug!("udp: drop, receive ring full on port {dst_port}");
        return;
    }
    let Some(bd_idx) = iface.rx_descriptors.allocate(payload_len) else {
        debug!("udp: drop, no receive descriptor for {payload_len} bytes");
        return;
    };

    let first = {
        let d = iface.rx_descriptors.get_mut(bd_idx);
        d.remote = Endpoint::new(src_ip, Port(src_port));
        d.port = Port(dst_port);
        d.ip_protocol = IPPROTO_UDP;
        d.first
    };
    iface.rx_arena[first..first + payload_len]
        .copy_from_slice(&iface.rx_frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload_len]);

    debug!("udp: {payload_len} bytes from {src_ip}:{src_port} queued on port {dst_port}");
    let _ = pd.rx_ring.push_back(bd_idx);
}

// =============================================================================
// Egress
// =============================================================================

/// Build a complete Ethernet + IPv4 + UDP frame from a TX descriptor into
/// the TX scratch.  Returns `false` (and builds nothing) if the frame
/// would exceed the maximum frame size.
pub(crate) fn write_datagram(
    iface: &mut Interface,
    dest_hw: MacAddr,
    bd: &BufferDescriptor,
    ip_ident: &mut u16,
) -> bool {
    if bd.size > MAX_UDP_PAYLOAD {
        debug!("udp: datagram too big ({} bytes)", bd.size);
        return false;
    }
    let frame_len = PAYLOAD_OFFSET + bd.size;
    let total_length = (frame_len - ETH_HEADER_LEN) as u16;
    let udp_length = (UDP_HEADER_LEN + bd.size) as u16;
    let ident = next_ip_ident(ip_ident);
    let our_hw = iface.hw_addr;
    let our_ip = iface.ip_addr;

    let tx = &mut iface.tx_frame;
    tx[0..6].copy_from_slice(&dest_hw.0);
    tx[6..12].copy_from_slice(&our_hw.0);
    tx[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let ip = &mut tx[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN];
    ip[0] = 0x45;
    ip[1] = 0;
    ip[2..4].copy_from_slice(&total_length.to_be_bytes());
    ip[4..6].copy_from_slice(&ident.to_be_bytes());
    // Don't-fragment, offset zero.
    ip[6..8].copy_from_slice(&[0x40, 0x00]);
    ip[8] = 0x80;
    ip[9] = IPPROTO_UDP;
    ip[10..12].copy_from_slice(&[0, 0]);
    ip[12..16].copy_from_slice(&our_ip.0);
    ip[16..20].copy_from_slice(&bd.remote.ip_addr.0);
    let ip_csum = ipv4_header_checksum(ip);
    ip[10..12].copy_from_slice(&ip_csum.to_be_bytes());

    let udp = &mut tx[UDP_OFFSET..PAYLOAD_OFFSET];
    udp[0..2].copy_from_slice(&bd.port.0.to_be_bytes());
    udp[2..4].copy_from_slice(&bd.remote.port.0.to_be_bytes());
    udp[4..6].copy_from_slice(&udp_length.to_be_bytes());
    udp[6..8].copy_from_slice(&[0, 0]);

    tx[PAYLOAD_OFFSET..frame_len].copy_from_slice(&iface.tx_arena[bd.first..bd.first + bd.size]);

    let mut ck = Checksum::new();
    ck.add_pseudo_header(our_ip, bd.remote.ip_addr, IPPROTO_UDP, udp_length as usize);
    ck.add_bytes(&tx[UDP_OFFSET..frame_len]);
    let mut udp_csum = ck.finish();
    // Per RFC 768, a computed checksum of zero is transmitted as 0xffff.
    if udp_csum == 0 {
        udp_csum = 0xffff;
    }
    tx[UDP_OFFSET + 6..UDP_OFFSET + 8].copy_from_slice(&udp_csum.to_be_bytes());

    debug!(
        "udp: {} bytes for {} queued on the wire",
        bd.size, bd.remote
    );
    iface.tx_frame_len = frame_len;
    true
}
