//! ICMP echo handling.  Echo requests get an immediate reply; every other
//! ICMP type is dropped.

use log::debug;

use crate::checksum::{Checksum, ipv4_header_checksum};
use crate::iface::Interface;
use crate::types::MacAddr;
use crate::{
    ETH_HEADER_LEN, ETHERTYPE_IPV4, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, ICMP_HEADER_LEN,
    IPPROTO_ICMP, IPV4_HEADER_LEN, next_ip_ident,
};

const ICMP_OFFSET: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;

/// Handle an ICMP packet sitting in the RX scratch (IPv4 filter already
/// passed).  An echo request produces an equal-length echo reply in the
/// TX scratch.
pub(crate) fn handle_packet(iface: &mut Interface, ip_ident: &mut u16) {
    let frame = &iface.rx_frame[..iface.rx_frame_len];
    if frame.len() < ICMP_OFFSET + ICMP_HEADER_LEN {
        debug!("icmp: packet too short ({})", frame.len());
        return;
    }

    match frame[ICMP_OFFSET] {
        ICMP_ECHO_REQUEST => write_echo_reply(iface, ip_ident),
        other => {
            debug!("icmp: ignoring type {other}");
        }
    }
}

/// Build the echo reply: addresses swapped at the Ethernet and IP layers,
/// ICMP type cleared, identifier, sequence number and echo payload copied
/// from the request, both checksums recomputed.
fn write_echo_reply(iface: &mut Interface, ip_ident: &mut u16) {
    let reply_len = iface.rx_frame_len;
    let our_hw = iface.hw_addr;
    let our_ip = iface.ip_addr;
    let ident = next_ip_ident(ip_ident);

    let rx = &iface.rx_frame;
    let tx = &mut iface.tx_frame;

    let remote_hw = MacAddr([rx[6], rx[7], rx[8], rx[9], rx[10], rx[11]]);
    debug!("icmp: echo request from {remote_hw}, replying {reply_len} bytes");

    tx[0..6].copy_from_slice(&remote_hw.0);
    tx[6..12].copy_from_slice(&our_hw.0);
    tx[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    let total_length = (reply_len - ETH_HEADER_LEN) as u16;
    let ip = &mut tx[ETH_HEADER_LEN..ETH_HEADER_LEN + IPV4_HEADER_LEN];
    ip[0] = 0x45;
    ip[1] = 0;
    ip[2..4].copy_from_slice(&total_length.to_be_bytes());
    ip[4..6].copy_from_slice(&ident.to_be_bytes());
    ip[6..8].copy_from_slice(&[0, 0]);
    ip[8] = 0x80;
    ip[9] = IPPROTO_ICMP;
    ip[10..12].copy_from_slice(&[0, 0]);
    ip[12..16].copy_from_slice(&our_ip.0);
    // Reply to the request's source address.
    ip[16] = rx[26];
    ip[17] = rx[27];
    ip[18] = rx[28];
    ip[19] = rx[29];
    let ip_csum = ipv4_header_checksum(ip);
    ip[10..12].copy_from_slice(&ip_csum.to_be_bytes());

    tx[ICMP_OFFSET] = ICMP_ECHO_REPLY;
    tx[ICMP_OFFSET + 1] = 0;
    tx[ICMP_OFFSET + 2..ICMP_OFFSET + 4].copy_from_slice(&[0, 0]);
    // Identifier, sequence number and echo payload come back verbatim.
    tx[ICMP_OFFSET + 4..reply_len].copy_from_slice(&rx[ICMP_OFFSET + 4..reply_len]);

    let mut ck = Checksum::new();
    ck.add_bytes(&tx[ICMP_OFFSET..reply_len]);
    let icmp_csum = ck.finish();
    tx[ICMP_OFFSET + 2..ICMP_OFFSET + 4].copy_from_slice(&icmp_csum.to_be_bytes());

    iface.tx_frame_len = reply_len;
}
