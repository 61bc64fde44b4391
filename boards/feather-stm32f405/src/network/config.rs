#![deny(unsafe_code)]
#![deny(warnings)]
//! Board network configuration

use core::net::Ipv4Addr;

use iot_core::link::LinkConfig;
use iot_core::w5500::{DriverConfig, NetworkConfig, SocketId};

/// Last byte of the MAC address, unique per controller on the segment
pub const CONTROLLER_NUM: u8 = 0x01;

/// Broker the link task keeps a connection to
pub const BROKER_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BROKER_PORT: u16 = 1883;

/// Main loop sleep between link polls
pub const LOOP_PERIOD_MS: u64 = 99;
/// Period of the uptime report written to the broker
pub const UPTIME_PERIOD_SECS: u64 = 15;

/// Static addressing for the W5500
pub fn network() -> NetworkConfig {
    NetworkConfig {
        mac_addr: [0x00, 0x00, 0x00, 0xBE, 0xEF, CONTROLLER_NUM],
        ip: Ipv4Addr::new(192, 168, 1, 50 + CONTROLLER_NUM),
        ..NetworkConfig::default()
    }
}

/// Driver timing; the defaults suit a 10 MHz bus
pub fn driver() -> DriverConfig {
    DriverConfig::default()
}

/// Broker connection on socket 0
pub fn link() -> LinkConfig {
    LinkConfig {
        remote: BROKER_ADDR,
        port: BROKER_PORT,
        socket: SocketId::FIRST,
        connect_timeout_ms: 5_000,
        max_failures: 3,
    }
}
