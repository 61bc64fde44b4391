//! Driver and network configuration structures

use core::net::Ipv4Addr;

use super::error::Error;
use super::registers::MAX_SOCKETS;

/// Total buffer memory per direction, in KiB
const BUFFER_MEMORY_KB: u16 = 16;

/// Device-wide network identity
///
/// Written to the common registers once at initialization and left alone
/// until the next explicit re-init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Local IPv4 address
    pub ip: Ipv4Addr,
    /// Subnet mask
    pub netmask: Ipv4Addr,
    /// Default gateway
    pub gateway: Ipv4Addr,
    /// DNS server handed to upper layers (the chip never uses it)
    pub dns: Ipv4Addr,
    /// Address was leased via DHCP rather than configured statically
    pub dhcp: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            ip: Ipv4Addr::new(192, 168, 1, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            dns: Ipv4Addr::new(192, 168, 1, 1),
            dhcp: false,
        }
    }
}

/// Per-socket ring buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferSize {
    Kb1 = 1,
    #[default]
    Kb2 = 2,
    Kb4 = 4,
    Kb8 = 8,
    Kb16 = 16,
}

impl BufferSize {
    /// Value for the Sn_RXBUF_SIZE / Sn_TXBUF_SIZE registers
    pub const fn kilobytes(self) -> u8 {
        self as u8
    }

    pub const fn bytes(self) -> u16 {
        (self as u16) * 1024
    }
}

/// Polling, timeout and memory layout settings for the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Sleep between status polls in blocking operations
    pub poll_interval_ms: u32,
    /// Upper bound for the chip to accept a command or settle a status
    pub command_timeout_ms: u32,
    /// Upper bound for SEND_OK after a SEND command
    pub send_ack_timeout_ms: u32,
    /// Time allowed for a graceful DISCON before falling back to CLOSE
    pub disconnect_timeout_ms: u32,
    /// Retransmission timeout in 100 µs units
    pub retry_time: u16,
    /// Retransmissions before the chip raises TIMEOUT
    pub retry_count: u8,
    /// Ring buffer size of each socket (same for TX and RX)
    pub buffer_sizes: [BufferSize; MAX_SOCKETS],
}

impl DriverConfig {
    /// Check the buffer layout fits in the chip's 16 KiB per direction
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the sizes add up to more than 16 KiB.
    pub fn validate(&self) -> Result<(), Error> {
        let total: u16 = self
            .buffer_sizes
            .iter()
            .map(|size| size.kilobytes() as u16)
            .sum();
        if total > BUFFER_MEMORY_KB {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1,
            command_timeout_ms: 100,
            send_ack_timeout_ms: 2000,
            disconnect_timeout_ms: 500,
            retry_time: 2000,
            retry_count: 8,
            buffer_sizes: [BufferSize::Kb2; MAX_SOCKETS],
        }
    }
}
