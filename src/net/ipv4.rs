//! IPv4 packet handling: build and parse IPv4 headers, route outgoing
//! packets, and dispatch incoming ones to a registered per-protocol
//! callback — the realisation of this spec's `ip_add_protocol`/`ip_tx`.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU16, Ordering};
use super::types::{Ipv4Addr, MacAddr};
use super::checksum;
use super::ethernet;
use crate::sync::spinlock::Spinlock;

const IPV4_HEADER_LEN: usize = 20;
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

const MAX_PROTOCOLS: usize = 4;

/// A registered protocol receive callback: `(segment, src, dst)`.
pub type ProtocolHandler = fn(&[u8], Ipv4Addr, Ipv4Addr);

static PROTOCOLS: Spinlock<[Option<(u8, ProtocolHandler)>; MAX_PROTOCOLS]> =
    Spinlock::new([None; MAX_PROTOCOLS]);

static IP_ID: AtomicU16 = AtomicU16::new(0);

/// Register a receive callback for an IP protocol number. Mirrors
/// `ip_add_protocol(proto, handler)`; the TCP core calls this with
/// `proto = 6` at init.
pub fn add_protocol(proto: u8, handler: ProtocolHandler) {
    let mut table = PROTOCOLS.lock();
    for slot in table.iter_mut() {
        if slot.is_none() {
            *slot = Some((proto, handler));
            return;
        }
    }
}

pub struct Ipv4Packet<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub payload: &'a [u8],
    pub total_len: u16,
    pub header_len: usize,
}

/// Parse an IPv4 packet.
pub fn parse(data: &[u8]) -> Option<Ipv4Packet<'_>> {
    if data.len() < IPV4_HEADER_LEN {
        return None;
    }

    let version = data[0] >> 4;
    if version != 4 {
        return None;
    }

    let ihl = (data[0] & 0x0F) as usize;
    let header_len = ihl * 4;
    if data.len() < header_len {
        return None;
    }

    let total_len = ((data[2] as u16) << 8) | data[3] as u16;
    if (total_len as usize) > data.len() {
        return None;
    }

    let ttl = data[8];
    let protocol = data[9];
    let src = Ipv4Addr([data[12], data[13], data[14], data[15]]);
    let dst = Ipv4Addr([data[16], data[17], data[18], data[19]]);

    let payload = &data[header_len..(total_len as usize)];

    Some(Ipv4Packet { src, dst, protocol, ttl, payload, total_len, header_len })
}

/// Build and send an IPv4 packet to `dst`, resolving the next-hop MAC via
/// ARP (through the gateway if `dst` is not on-link).
pub fn send_ipv4(dst: Ipv4Addr, protocol: u8, payload: &[u8]) -> bool {
    let cfg = super::config();
    let total_len = IPV4_HEADER_LEN + payload.len();
    if total_len > 1500 {
        return false;
    }

    let mut header = [0u8; IPV4_HEADER_LEN];
    header[0] = 0x45;
    header[2] = (total_len >> 8) as u8;
    header[3] = (total_len & 0xFF) as u8;
    let id = IP_ID.fetch_add(1, Ordering::Relaxed);
    header[4] = (id >> 8) as u8;
    header[5] = (id & 0xFF) as u8;
    header[6] = 0x40;
    header[8] = 64;
    header[9] = protocol;
    header[12..16].copy_from_slice(&cfg.ip.0);
    header[16..20].copy_from_slice(&dst.0);

    let cksum = checksum::internet_checksum(&header);
    header[10] = (cksum >> 8) as u8;
    header[11] = (cksum & 0xFF) as u8;

    let mut packet = Vec::with_capacity(total_len);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(payload);

    let next_hop = if cfg.is_local(dst) || dst == Ipv4Addr::BROADCAST {
        dst
    } else {
        cfg.gateway
    };

    let dst_mac = if dst == Ipv4Addr::BROADCAST {
        MacAddr::BROADCAST
    } else {
        match super::arp::resolve(next_hop) {
            Some(mac) => mac,
            None => {
                crate::serial_println!("IPv4: ARP resolve failed for {}", next_hop);
                return false;
            }
        }
    };

    ethernet::send_frame(dst_mac, ethernet::ETHERTYPE_IPV4, &packet);
    true
}

/// Dispatch an incoming IPv4 packet: unicast-address filter, then hand the
/// payload to whichever protocol callback (if any) is registered for it.
pub fn handle_ipv4(data: &[u8]) {
    let pkt = match parse(data) {
        Some(p) => p,
        None => return,
    };

    let cfg = super::config();
    if pkt.dst != cfg.ip && pkt.dst != Ipv4Addr::BROADCAST {
        return;
    }

    let table = PROTOCOLS.lock();
    for slot in table.iter() {
        if let Some((proto, handler)) = slot {
            if *proto == pkt.protocol {
                handler(pkt.payload, pkt.src, pkt.dst);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(parse(&[0u8; 10]).is_none());
    }

    #[test]
    fn parse_rejects_non_ipv4_version() {
        let mut buf = [0u8; 20];
        buf[0] = 0x65;
        assert!(parse(&buf).is_none());
    }

    #[test]
    fn parse_extracts_addresses_and_protocol() {
        let mut buf = [0u8; 20];
        buf[0] = 0x45;
        buf[2] = 0;
        buf[3] = 20;
        buf[9] = PROTO_TCP;
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let pkt = parse(&buf).unwrap();
        assert_eq!(pkt.protocol, PROTO_TCP);
        assert_eq!(pkt.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pkt.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(pkt.payload.len(), 0);
    }
}
