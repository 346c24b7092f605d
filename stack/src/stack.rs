//! The stack value and its step loop.
//!
//! [`Stack`] owns every table the protocol handlers touch: the interface
//! array, the ARP table, the UDP port table and the IPv4 identification
//! counter.  There are no globals; independent instances do not interact.
//!
//! # Scheduling
//!
//! [`Stack::step`] is the sole scheduling point.  Per interface and per
//! call it reads at most one frame from the device, writes any immediate
//! ARP/ICMP reply, and otherwise walks the transmit descriptor table in
//! slot order, emitting every datagram whose ARP resolution is complete.
//! Nothing blocks and no state is held across calls outside the tables.
//!
//! The application API (`bind`, `send`, `receive`, `received_length`) may
//! be interleaved with `step` from the same thread; the `&mut self`
//! receivers make concurrent use unrepresentable.

use femtonet_abi::net::{BUFFER_DESCRIPTOR_COUNT, INTERFACE_COUNT, MIN_ETH_FRAME_SIZE};
use log::debug;

use crate::arp::{self, ArpTable, ResolveOutcome};
use crate::bd::BdFlags;
use crate::iface::Interface;
use crate::ingress;
use crate::types::{Endpoint, EndpointId, IfaceId, Ipv4Addr, MacAddr, Port};
use crate::udp::{self, PortTable};
use crate::IPPROTO_UDP;

// =============================================================================
// Device boundary
// =============================================================================

/// The driver side of the stack: three non-blocking operations supplied by
/// the host environment.
///
/// `step` is generic over this trait, so each driver monomorphizes its own
/// copy of the loop with the calls inlined.
pub trait NetDevice {
    /// `true` if at least one complete frame is buffered for reception.
    fn rx_available(&mut self) -> bool;

    /// Copy the next frame into `buf`.  Returns the number of bytes
    /// written, or 0 on failure.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Transmit `frame`.  Returns the number of bytes accepted.
    fn write(&mut self, frame: &[u8]) -> usize;
}

// =============================================================================
// Stack
// =============================================================================

/// All state of one stack instance.
///
/// The value is large (frame scratches and payload arenas are inline);
/// embedded targets typically place it in a `static`, hosted callers may
/// prefer to box it.
pub struct Stack {
    interfaces: [Interface; INTERFACE_COUNT],
    arp_table: ArpTable,
    udp_ports: PortTable,
    ip_ident: u16,
}

impl Stack {
    /// Create a stack with unconfigured interfaces and empty tables.
    pub const fn new() -> Self {
        Self {
            interfaces: [const { Interface::new() }; INTERFACE_COUNT],
            arp_table: ArpTable::new(),
            udp_ports: PortTable::new(),
            ip_ident: 0,
        }
    }

    /// Reset every interface's descriptor tables to the canonical
    /// one-slot state.  Idempotent; addresses and port bindings survive.
    pub fn reset(&mut self) {
        for iface in &mut self.interfaces {
            iface.reset_buffers();
        }
    }

    /// Configure an interface's MAC and IPv4 address.  Returns `false` if
    /// `id` is out of range.
    pub fn set(&mut self, id: IfaceId, hw_addr: MacAddr, ip_addr: Ipv4Addr) -> bool {
        match self.interfaces.get_mut(id.0) {
            Some(iface) => {
                iface.hw_addr = hw_addr;
                iface.ip_addr = ip_addr;
                true
            }
            None => false,
        }
    }

    /// Read-only view of an interface (diagnostics and tests).
    pub fn interface(&self, id: IfaceId) -> Option<&Interface> {
        self.interfaces.get(id.0)
    }

    /// Read-only view of the ARP table (diagnostics and tests).
    pub fn arp_table(&self) -> &ArpTable {
        &self.arp_table
    }

    // =========================================================================
    // UDP application API
    // =========================================================================

    /// Bind `port` on interface `id`.  Returns the endpoint designator
    /// used by the other UDP calls, or `None` if `id` is out of range or
    /// the port table is full.
    pub fn bind(&mut self, id: IfaceId, port: Port) -> Option<EndpointId> {
        if id.0 >= INTERFACE_COUNT {
            debug!("udp: bind to invalid interface {id}");
            return None;
        }
        debug!("udp: binding port {port} on interface {id}");
        self.udp_ports.bind(id, port)
    }

    /// Size of the datagram at the head of the endpoint's receive ring,
    /// or 0 if nothing is queued.
    pub fn received_length(&self, ed: EndpointId) -> usize {
        let Some(pd) = self.udp_ports.get(ed) else {
            return 0;
        };
        let Some(&bd_idx) = pd.rx_ring.front() else {
            return 0;
        };
        self.interfaces[pd.iface.0].rx_descriptors.get(bd_idx).size
    }

    /// Pop the head of the endpoint's receive ring: copy up to
    /// `buf.len()` payload bytes into `buf`, store the sender in
    /// `remote`, release the descriptor and return the byte count.
    /// Returns 0 if the ring is empty, the designator is out of range, or
    /// the queued descriptor was already released.
    pub fn receive(&mut self, ed: EndpointId, buf: &mut [u8], remote: &mut Endpoint) -> usize {
        let Self {
            interfaces,
            udp_ports,
            ..
        } = self;
        let Some(pd) = udp_ports.get_mut(ed) else {
            return 0;
        };
        let iface = &mut interfaces[pd.iface.0];
        let Some(bd_idx) = pd.rx_ring.pop_front() else {
            return 0;
        };

        let d = *iface.rx_descriptors.get(bd_idx);
        if !d.is_valid() {
            debug!("udp: dropping stale receive descriptor {bd_idx}");
            return 0;
        }

        let n = buf.len().min(d.size);
        buf[..n].copy_from_slice(&iface.rx_arena[d.first..d.first + n]);
        *remote = d.remote;
        iface.rx_descriptors.free(bd_idx);
        n
    }

    /// Queue `data` for transmission to `remote` from the endpoint's
    /// local port.  The frame itself is built and written by a later
    /// [`step`](Self::step) once the destination's MAC is resolved.
    /// Returns `data.len()`, or 0 when no transmit descriptor can hold
    /// the payload.
    pub fn send(&mut self, ed: EndpointId, data: &[u8], remote: Endpoint) -> usize {
        let Self {
            interfaces,
            udp_ports,
            ..
        } = self;
        let Some(pd) = udp_ports.get_mut(ed) else {
            debug!("udp: send on invalid endpoint");
            return 0;
        };
        let iface = &mut interfaces[pd.iface.0];

        let Some(bd_idx) = iface.tx_descriptors.allocate(data.len()) else {
            debug!("udp: send of {} bytes failed, transmit full", data.len());
            return 0;
        };
        let first = {
            let d = iface.tx_descriptors.get_mut(bd_idx);
            d.remote = remote;
            d.port = pd.port;
            d.ip_protocol = IPPROTO_UDP;
            d.flags.insert(BdFlags::TRANSMIT);
            d.first
        };
        iface.tx_arena[first..first + data.len()].copy_from_slice(data);

        debug!("udp: queued {} bytes for {remote}", data.len());
        data.len()
    }

    // =========================================================================
    // Step
    // =========================================================================

    /// Advance the stack by one poll of the device.
    ///
    /// Per interface: read and process at most one received frame; if that
    /// produced an immediate reply (ARP or ICMP echo) write it, otherwise
    /// drain the transmit descriptor table, resolving ARP on the way.
    pub fn step<D: NetDevice>(&mut self, dev: &mut D) {
        let Self {
            interfaces,
            arp_table,
            udp_ports,
            ip_ident,
        } = self;

        for iface in interfaces.iter_mut() {
            iface.tx_frame_len = 0;

            if dev.rx_available() {
                let n = dev.read(&mut iface.rx_frame);
                if n > 0 {
                    iface.rx_frame_len = n;
                    ingress::process_frame(iface, arp_table, udp_ports, ip_ident);
                } else {
                    debug!("stack: frame read failed");
                }
            }

            if iface.tx_frame_len > 0 {
                // ARP and ICMP replies take priority over queued datagrams.
                write_frame(dev, iface);
            } else {
                drain_tx(dev, iface, arp_table, ip_ident);
            }
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the transmit descriptor table in slot order and emit every
/// datagram whose destination MAC is known.  Unknown destinations get a
/// provisional ARP entry and a broadcast request; destinations that stay
/// unresolved past the probe budget are dropped along with their entry.
fn drain_tx<D: NetDevice>(
    dev: &mut D,
    iface: &mut Interface,
    arp_table: &mut ArpTable,
    ip_ident: &mut u16,
) {
    for idx in 0..BUFFER_DESCRIPTOR_COUNT {
        let d = *iface.tx_descriptors.get(idx);
        if !d.is_valid() {
            continue;
        }

        match d.ip_protocol {
            IPPROTO_UDP => match arp_table.resolve(d.remote.ip_addr) {
                ResolveOutcome::Resolved(hw) => {
                    udp::write_datagram(iface, hw, &d, ip_ident);
                    // Freed even when the frame was too big to build.
                    iface.tx_descriptors.free(idx);
                }
                ResolveOutcome::ProbeAgain => {
                    arp::write_request(iface, d.remote.ip_addr);
                }
                ResolveOutcome::Expired => {
                    debug!(
                        "arp: {} unresolved after probe budget, dropping datagram",
                        d.remote.ip_addr
                    );
                    arp_table.evict(d.remote.ip_addr);
                    iface.tx_descriptors.free(idx);
                }
                ResolveOutcome::Unknown => {
                    if arp_table.insert_provisional(d.remote.ip_addr) {
                        arp::write_request(iface, d.remote.ip_addr);
                        iface.tx_descriptors.get_mut(idx).flags.insert(BdFlags::PENDING);
                    } else {
                        debug!(
                            "arp: table full, dropping datagram for {}",
                            d.remote.ip_addr
                        );
                        iface.tx_descriptors.free(idx);
                    }
                }
            },
            other => {
                debug!("stack: dropping descriptor with unhandled protocol {other}");
                iface.tx_descriptors.free(idx);
            }
        }

        if iface.tx_frame_len > 0 {
            write_frame(dev, iface);
            iface.tx_frame_len = 0;
        }
    }
}

fn write_frame<D: NetDevice>(dev: &mut D, iface: &mut Interface) {
    let mut len = iface.tx_frame_len;
    // Runt frames (ARP replies, short datagrams) get the MAC-layer zero
    // padding up to the minimum frame size, so they survive the receive
    // filter of any standards-following peer.
    if len < MIN_ETH_FRAME_SIZE {
        iface.tx_frame[len..MIN_ETH_FRAME_SIZE].fill(0);
        len = MIN_ETH_FRAME_SIZE;
    }
    let written = dev.write(&iface.tx_frame[..len]);
    if written != len {
        debug!("stack: short write ({written} of {len} bytes)");
    }
}
