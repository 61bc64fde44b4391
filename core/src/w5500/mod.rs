//! W5500 hardware TCP/IP offload driver
//!
//! The chip runs the TCP/IP stack itself and exposes eight sockets through
//! a byte-addressable register interface over SPI. This module is the
//! socket-register protocol driver on top of that interface:
//!
//! - **`transport`**: one chip-select framed SPI transaction per access
//! - **`access`**: fixed-width big-endian register helpers
//! - **`slots`**: the eight socket slots and their bookkeeping
//! - **`command`**: command/status/interrupt state machine
//! - **`buffer`**: TX/RX ring-buffer arithmetic and transfers
//! - **`socket`**: connect/send/receive/close façade with timeouts
//! - **`stream`**: byte-stream adapter for protocol clients
//!
//! ## Concurrency
//!
//! A [`ChipContext`] owns the bus, the reset line, the delay and the clock.
//! Every operation takes `&mut self`, so register traffic for all sockets is
//! serialized through one owner without any locking. Blocking operations
//! busy-poll with the caller's timeout and never yield mid-transaction.
//!
//! ## Example
//!
//! ```ignore
//! let mut chip = ChipContext::new(spi, reset, delay, clock, DriverConfig::default());
//! chip.init(NetworkConfig::default())?;
//! let id = chip.allocate_socket()?;
//! chip.connect(id, Ipv4Addr::new(192, 0, 2, 1), 1883, 5_000)?;
//! chip.send(id, b"ping", 1_000)?;
//! ```

pub mod access;
pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod registers;
pub mod slots;
pub mod socket;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod sim;

use core::net::Ipv4Addr;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use hal_abstractions::{Clock, Deadline};

pub use config::{BufferSize, DriverConfig, NetworkConfig};
pub use error::{BusFault, Error};
pub use registers::{Command, Interrupts, Protocol, Status, MAX_SOCKETS};
pub use slots::{SocketId, SocketSlot, SocketTable};
pub use socket::{Datagram, Received};
pub use stream::TcpStream;
pub use transport::RegisterTransport;

use registers::{common, socket as sreg, Block, CHIP_VERSION};

/// Reset line held low for this long (datasheet minimum is 500 µs)
const RESET_PULSE_MS: u32 = 1;
/// PLL lock time after the reset line is released
const RESET_SETTLE_MS: u32 = 2;
/// Sleep between polls while waiting on the chip itself
const FAST_POLL_US: u32 = 10;

/// One physical W5500 and everything needed to drive it
pub struct ChipContext<SPI, RST, D, C> {
    bus: RegisterTransport<SPI>,
    reset: RST,
    delay: D,
    clock: C,
    network: NetworkConfig,
    driver: DriverConfig,
    sockets: SocketTable,
}

impl<SPI, RST, D, C> ChipContext<SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    /// Take ownership of the bus and control lines
    ///
    /// No bus traffic happens until [`init`](Self::init).
    pub fn new(spi: SPI, reset: RST, delay: D, clock: C, driver: DriverConfig) -> Self {
        Self {
            bus: RegisterTransport::new(spi),
            reset,
            delay,
            clock,
            network: NetworkConfig::default(),
            sockets: SocketTable::new(&driver.buffer_sizes),
            driver,
        }
    }

    /// Reset the chip and program the network identity
    ///
    /// This function:
    /// 1. Validates the buffer layout
    /// 2. Pulses the reset line, then issues a software reset
    /// 3. Checks the version register identifies a W5500
    /// 4. Writes MAC, IP, netmask and gateway
    /// 5. Sets retry timing and per-socket buffer sizes
    ///
    /// # Errors
    ///
    /// `InvalidConfig` before any bus traffic, `ChipNotFound` if the version
    /// register is wrong, or a transport error.
    pub fn init(&mut self, network: NetworkConfig) -> Result<(), Error> {
        self.driver.validate()?;
        self.sockets = SocketTable::new(&self.driver.buffer_sizes);

        self.hardware_reset()?;
        self.software_reset()?;

        let version = self.bus.read_u8(common::VERSION, Block::Common)?;
        if version != CHIP_VERSION {
            return Err(Error::ChipNotFound { version });
        }

        self.bus
            .write_mac(common::MAC, Block::Common, &network.mac_addr)?;
        self.set_network(network)?;

        self.bus
            .write_u16(common::RETRY_TIME, Block::Common, self.driver.retry_time)?;
        self.bus
            .write_u8(common::RETRY_COUNT, Block::Common, self.driver.retry_count)?;

        for id in SocketId::all() {
            let size = self.driver.buffer_sizes[id.index()].kilobytes();
            self.bus.write_u8(sreg::RX_BUF_SIZE, Block::Socket(id), size)?;
            self.bus.write_u8(sreg::TX_BUF_SIZE, Block::Socket(id), size)?;
        }
        Ok(())
    }

    /// Repeat [`init`](Self::init) with the stored network configuration
    pub fn reinit(&mut self) -> Result<(), Error> {
        self.init(self.network)
    }

    /// Pulse the reset line
    pub fn hardware_reset(&mut self) -> Result<(), Error> {
        self.reset.set_low().map_err(|_| Error::ResetPin)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.reset.set_high().map_err(|_| Error::ResetPin)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        self.sockets.reset();
        Ok(())
    }

    fn software_reset(&mut self) -> Result<(), Error> {
        self.bus
            .write_u8(common::MODE, Block::Common, common::MODE_RESET)?;
        let deadline = Deadline::starting_now(&self.clock, self.driver.command_timeout_ms);
        loop {
            let mode = self.bus.read_u8(common::MODE, Block::Common)?;
            if mode & common::MODE_RESET == 0 {
                return Ok(());
            }
            if deadline.expired(self.clock.now_ms()) {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(FAST_POLL_US);
        }
    }

    /// Write gateway, subnet and source IP
    pub fn set_network(&mut self, network: NetworkConfig) -> Result<(), Error> {
        self.bus
            .write_ipv4(common::GATEWAY, Block::Common, network.gateway)?;
        self.bus
            .write_ipv4(common::SUBNET, Block::Common, network.netmask)?;
        self.bus
            .write_ipv4(common::SOURCE_IP, Block::Common, network.ip)?;
        self.network = network;
        Ok(())
    }

    /// Configuration last written to the chip
    pub fn network_config(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn driver_config(&self) -> &DriverConfig {
        &self.driver
    }

    /// Whether the address came from DHCP
    pub fn is_dhcp(&self) -> bool {
        self.network.dhcp
    }

    /// Source IP as currently programmed in the chip
    pub fn local_ip(&mut self) -> Result<Ipv4Addr, Error> {
        self.bus.read_ipv4(common::SOURCE_IP, Block::Common)
    }

    /// Hardware address as currently programmed in the chip
    pub fn mac_address(&mut self) -> Result<[u8; 6], Error> {
        self.bus.read_mac(common::MAC, Block::Common)
    }

    /// Ethernet PHY reports link
    pub fn link_up(&mut self) -> Result<bool, Error> {
        let phy = self.bus.read_u8(common::PHY_CONFIG, Block::Common)?;
        Ok(phy & common::PHY_LINK_UP != 0)
    }

    /// Reserve the lowest free socket
    ///
    /// # Errors
    ///
    /// Returns `Error::NoFreeSocket` when all eight are in use.
    pub fn allocate_socket(&mut self) -> Result<SocketId, Error> {
        self.sockets.allocate()
    }

    /// Driver bookkeeping for a socket
    pub fn slot(&self, id: SocketId) -> &SocketSlot {
        self.sockets.slot(id)
    }

    /// Sockets currently reserved by callers
    pub fn sockets_in_use(&self) -> heapless::Vec<SocketId, MAX_SOCKETS> {
        self.sockets.in_use()
    }

    /// Give the owned peripherals back
    pub fn release(self) -> (SPI, RST, D, C) {
        (self.bus.release(), self.reset, self.delay, self.clock)
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn deadline(&self, budget_ms: u32) -> Deadline {
        Deadline::starting_now(&self.clock, budget_ms)
    }

    fn sleep_poll_interval(&mut self) {
        self.delay.delay_ms(self.driver.poll_interval_ms);
    }
}
