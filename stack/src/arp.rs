//! ARP table and request/reply processing.
//!
//! The table caches IP to MAC bindings learned from any valid ARP packet
//! addressed to the interface.  Outbound UDP resolution inserts
//! provisional entries (broadcast MAC, `complete == false`) and probes the
//! network once per transmit-drain encounter until either a reply promotes
//! the entry or the probe budget runs out and the entry is evicted.
//!
//! Lookup is a linear scan; the table holds at most
//! [`ARP_TABLE_SIZE`](femtonet_abi::net::ARP_TABLE_SIZE) entries and a
//! full table rejects inserts.

use femtonet_abi::net::{ARP_MAX_PROBES, ARP_TABLE_SIZE};
use log::debug;

use crate::iface::Interface;
use crate::types::{Ipv4Addr, MacAddr};
use crate::{
    ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY, ARP_OPER_REQUEST, ARP_PACKET_LEN,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4, ETH_ADDR_LEN, ETH_HEADER_LEN, ETHERTYPE_ARP,
};

// =============================================================================
// Table
// =============================================================================

/// One cached IP to MAC binding.
///
/// `complete` distinguishes bindings learned from a genuine ARP packet
/// from provisional ones created on behalf of a pending transmit.
/// `probes` counts the requests sent for a provisional entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub hw_addr: MacAddr,
    pub ip_addr: Ipv4Addr,
    pub complete: bool,
    pub probes: u8,
}

/// Outcome of resolving a transmit destination against the table.
pub enum ResolveOutcome {
    /// The binding is complete; transmit to this MAC.
    Resolved(MacAddr),
    /// Provisional entry still waiting; another request was budgeted.
    ProbeAgain,
    /// Probe budget exhausted; caller should evict and drop.
    Expired,
    /// No entry for this address.
    Unknown,
}

/// Fixed-capacity ARP cache with linear lookup.
pub struct ArpTable {
    entries: heapless::Vec<ArpEntry, ARP_TABLE_SIZE>,
}

impl ArpTable {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// First entry matching `ip`, if any.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries.iter().find(|e| e.ip_addr == ip)
    }

    fn lookup_mut(&mut self, ip: Ipv4Addr) -> Option<&mut ArpEntry> {
        self.entries.iter_mut().find(|e| e.ip_addr == ip)
    }

    /// Record a binding learned from a received ARP packet.  An existing
    /// entry (complete or provisional) is updated in place and promoted to
    /// complete; otherwise a new entry is appended.  Returns `false` if
    /// the table is full and nothing was recorded.
    pub fn learn(&mut self, ip: Ipv4Addr, hw: MacAddr) -> bool {
        if let Some(e) = self.lookup_mut(ip) {
            e.hw_addr = hw;
            e.complete = true;
            return true;
        }
        self.entries
            .push(ArpEntry {
                hw_addr: hw,
                ip_addr: ip,
                complete: true,
                probes: 0,
            })
            .is_ok()
    }

    /// Insert a provisional entry for an outbound resolution.  The first
    /// probe is accounted to the insertion; the caller emits the matching
    /// request.  Returns `false` if the table is full.
    pub fn insert_provisional(&mut self, ip: Ipv4Addr) -> bool {
        self.entries
            .push(ArpEntry {
                hw_addr: MacAddr::BROADCAST,
                ip_addr: ip,
                complete: false,
                probes: 1,
            })
            .is_ok()
    }

    /// Resolve a transmit destination, advancing the probe bookkeeping of
    /// provisional entries.
    pub fn resolve(&mut self, ip: Ipv4Addr) -> ResolveOutcome {
        match self.lookup_mut(ip) {
            None => ResolveOutcome::Unknown,
            Some(e) if e.complete => ResolveOutcome::Resolved(e.hw_addr),
            Some(e) if e.probes >= ARP_MAX_PROBES => ResolveOutcome::Expired,
            Some(e) => {
                e.probes += 1;
                ResolveOutcome::ProbeAgain
            }
        }
    }

    /// Remove the entry for `ip`, if present.
    pub fn evict(&mut self, ip: Ipv4Addr) {
        if let Some(pos) = self.entries.iter().position(|e| e.ip_addr == ip) {
            self.entries.swap_remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ArpEntry] {
        &self.entries
    }
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Ingress
// =============================================================================

/// Handle an ARP frame sitting in the interface's RX scratch.
///
/// Accepts only Ethernet/IPv4 ARP whose target protocol address is the
/// interface's own IP.  Any accepted packet teaches the table the sender's
/// binding; a request additionally gets a reply built into the TX scratch.
pub(crate) fn handle_frame(iface: &mut Interface, table: &mut ArpTable) {
    let frame = &iface.rx_frame[..iface.rx_frame_len];
    if frame.len() < ETH_HEADER_LEN + ARP_PACKET_LEN {
        debug!("arp: frame too short ({})", frame.len());
        return;
    }
    let p = &frame[ETH_HEADER_LEN..];

    let htype = u16::from_be_bytes([p[0], p[1]]);
    let ptype = u16::from_be_bytes([p[2], p[3]]);
    let hlen = p[4];
    let plen = p[5];
    let oper = u16::from_be_bytes([p[6], p[7]]);

    if htype != ARP_HTYPE_ETHERNET
        || ptype != ARP_PTYPE_IPV4
        || hlen != ARP_HLEN_ETHERNET
        || plen != ARP_PLEN_IPV4
    {
        debug!(
            "arp: malformed header (htype={htype}, ptype={ptype:#06x}, hlen={hlen}, plen={plen})"
        );
        return;
    }

    let remote_hw = MacAddr([frame[6], frame[7], frame[8], frame[9], frame[10], frame[11]]);
    let sender_hw = MacAddr([p[8], p[9], p[10], p[11], p[12], p[13]]);
    let sender_ip = Ipv4Addr([p[14], p[15], p[16], p[17]]);
    let target_ip = Ipv4Addr([p[24], p[25], p[26], p[27]]);

    if target_ip != iface.ip_addr {
        return;
    }

    if !table.learn(sender_ip, sender_hw) {
        debug!("arp: table full, not recording {sender_ip}");
    }

    match oper {
        ARP_OPER_REQUEST => {
            debug!("arp: request for {target_ip} from {sender_ip} ({sender_hw})");
            write_reply(iface, remote_hw, sender_ip, sender_hw);
        }
        ARP_OPER_REPLY => {
            debug!("arp: reply from {sender_ip} ({sender_hw})");
        }
        _ => {
            debug!("arp: unknown opcode {oper}");
        }
    }
}

// =============================================================================
// Frame builders
// =============================================================================

/// Build a broadcast ARP request for `target_ip` into the TX scratch.
pub(crate) fn write_request(iface: &mut Interface, target_ip: Ipv4Addr) {
    debug!("arp: sending request for {target_ip}");
    write_packet(
        iface,
        ARP_OPER_REQUEST,
        MacAddr::BROADCAST,
        MacAddr::BROADCAST,
        target_ip,
    );
}

/// Build an ARP reply into the TX scratch.  The Ethernet header goes back
/// to the frame's source MAC, the ARP target fields to the sender fields
/// of the request.
fn write_reply(iface: &mut Interface, eth_dst: MacAddr, target_ip: Ipv4Addr, target_hw: MacAddr) {
    debug!("arp: sending reply to {target_ip} ({target_hw})");
    write_packet(iface, ARP_OPER_REPLY, eth_dst, target_hw, target_ip);
}

fn write_packet(
    iface: &mut Interface,
    oper: u16,
    eth_dst: MacAddr,
    target_hw: MacAddr,
    target_ip: Ipv4Addr,
) {
    let our_hw = iface.hw_addr;
    let our_ip = iface.ip_addr;
    let frame = &mut iface.tx_frame;

    frame[0..ETH_ADDR_LEN].copy_from_slice(&eth_dst.0);
    frame[ETH_ADDR_LEN..2 * ETH_ADDR_LEN].copy_from_slice(&our_hw.0);
    frame[12..14].copy_from_slice(&ETHERTYPE_ARP.to_be_bytes());

    let p = &mut frame[ETH_HEADER_LEN..ETH_HEADER_LEN + ARP_PACKET_LEN];
    p[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    p[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    p[4] = ARP_HLEN_ETHERNET;
    p[5] = ARP_PLEN_IPV4;
    p[6..8].copy_from_slice(&oper.to_be_bytes());
    p[8..14].copy_from_slice(&our_hw.0);
    p[14..18].copy_from_slice(&our_ip.0);
    p[18..24].copy_from_slice(&target_hw.0);
    p[24..28].copy_from_slice(&target_ip.0);

    iface.tx_frame_len = ETH_HEADER_LEN + ARP_PACKET_LEN;
}
