//! Ingress pipeline: the single entry point for received frames.
//!
//! Every frame read by [`Stack::step`](crate::Stack::step) passes through
//! [`process_frame`], which enforces the Ethernet size and destination
//! filters, branches on the EtherType, applies the IPv4 acceptance filter
//! and hands the packet to the ARP, ICMP or UDP handler.  Anything that
//! fails a filter is dropped silently (with a debug trace).

use femtonet_abi::net::{MAX_ETH_FRAME_SIZE, MIN_ETH_FRAME_SIZE};
use log::debug;

use crate::arp::ArpTable;
use crate::iface::Interface;
use crate::types::{EtherType, Ipv4Addr, MacAddr};
use crate::udp::PortTable;
use crate::{ETH_HEADER_LEN, IPPROTO_ICMP, IPPROTO_UDP, IPV4_HEADER_LEN, arp, icmp, udp};

/// Decode and dispatch the frame in the interface's RX scratch.
pub(crate) fn process_frame(
    iface: &mut Interface,
    arp_table: &mut ArpTable,
    ports: &mut PortTable,
    ip_ident: &mut u16,
) {
    let len = iface.rx_frame_len;
    if !(MIN_ETH_FRAME_SIZE..=MAX_ETH_FRAME_SIZE).contains(&len) {
        debug!("ingress: frame size {len} out of bounds");
        return;
    }
    let frame = &iface.rx_frame[..len];

    let dst = MacAddr([frame[0], frame[1], frame[2], frame[3], frame[4], frame[5]]);
    if dst != iface.hw_addr && !dst.is_broadcast() {
        return;
    }

    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    match EtherType::from_u16(ethertype) {
        Some(EtherType::Arp) => arp::handle_frame(iface, arp_table),
        Some(EtherType::Ipv4) => process_ipv4(iface, ports, ip_ident),
        None => {
            debug!("ingress: unknown EtherType {ethertype:#06x}");
        }
    }
}

/// IPv4 acceptance filter and protocol dispatch.
///
/// Only plain 20-byte headers are handled: version/IHL `0x45`, DSCP/ECN
/// zero, and a flags/fragment field that is either all-zero or the
/// don't-fragment pattern with offset zero.  Fragmented packets fail the
/// byte comparison and are dropped.
fn process_ipv4(iface: &mut Interface, ports: &mut PortTable, ip_ident: &mut u16) {
    let frame = &iface.rx_frame[..iface.rx_frame_len];
    if frame.len() < ETH_HEADER_LEN + IPV4_HEADER_LEN {
        return;
    }
    let ip = &frame[ETH_HEADER_LEN..];

    let version_length = ip[0];
    let diff_serv = ip[1];
    let flags_fragment = [ip[6], ip[7]];
    if version_length != 0x45
        || diff_serv != 0
        || !(flags_fragment == [0x00, 0x00] || flags_fragment == [0x40, 0x00])
    {
        debug!(
            "ingress: unsupported IPv4 header (vl={version_length:#04x}, ds={diff_serv}, ff={flags_fragment:02x?})"
        );
        return;
    }

    let dest_ip = Ipv4Addr([ip[16], ip[17], ip[18], ip[19]]);
    if dest_ip != iface.ip_addr {
        return;
    }

    match ip[9] {
        IPPROTO_ICMP => icmp::handle_packet(iface, ip_ident),
        IPPROTO_UDP => udp::handle_datagram(iface, ports),
        other => {
            debug!("ingress: unsupported IP protocol {other}");
        }
    }
}
