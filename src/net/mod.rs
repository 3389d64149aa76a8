//! Network stack: Ethernet/ARP/IPv4 plumbing feeding the TCP core.

pub mod types;
pub mod checksum;
pub mod ethernet;
pub mod arp;
pub mod ipv4;
pub mod tcp;

use types::NetConfig;
use crate::sync::spinlock::Spinlock;

static NET_CONFIG: Spinlock<NetConfig> = Spinlock::new(NetConfig {
    ip: types::Ipv4Addr::ZERO,
    mask: types::Ipv4Addr::ZERO,
    gateway: types::Ipv4Addr::ZERO,
    dns: types::Ipv4Addr::ZERO,
    mac: types::MacAddr::ZERO,
});

/// Bring the network stack up: assign the interface configuration. The
/// TCP core registers its own protocol-6 callback from `tcp::init`
/// rather than this function claiming that registration on its behalf.
pub fn init(cfg: NetConfig) {
    set_config(cfg);
}

/// The configuration currently bound to this crate's single interface.
pub fn config() -> NetConfig {
    *NET_CONFIG.lock()
}

pub fn set_config(cfg: NetConfig) {
    *NET_CONFIG.lock() = cfg;
}

/// Drain any pending inbound frames and service any due retransmissions.
/// Called from the idle loop and from blocking waits that need the stack
/// to keep moving while they spin.
pub fn poll() {
    while let Some(frame) = crate::drivers::network::recv_packet() {
        ethernet::handle_frame(&frame);
    }
    tcp::timer::check_retransmissions();
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Ipv4Addr, MacAddr};

    #[test]
    fn set_config_then_config_round_trips() {
        let cfg = NetConfig {
            ip: Ipv4Addr::new(10, 0, 0, 5),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dns: Ipv4Addr::new(10, 0, 0, 1),
            mac: MacAddr([2, 0, 0, 0, 0, 9]),
        };
        set_config(cfg);
        assert_eq!(config().ip, Ipv4Addr::new(10, 0, 0, 5));
    }
}
