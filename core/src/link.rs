//! Link supervision
//!
//! Owns the reconnect and chip-reset policy the driver leaves to its caller.
//! Call [`LinkSupervisor::poll`] from the firmware's main loop; each call
//! performs at most one step and reports what happened.
//!
//! ```text
//! Down ──init ok──▶ NetworkUp ──connect ok──▶ Connected
//!  ▲                 │    ▲                      │
//!  └─PHY down / too──┘    └──peer closed/dropped─┘
//!    many failures
//! ```
//!
//! After the peer closes, the supervisor stays in `Connected` and reports
//! [`LinkEvent::Draining`] until the caller has read every buffered byte.

use core::net::Ipv4Addr;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use hal_abstractions::Clock;

use crate::w5500::{ChipContext, Error, NetworkConfig, SocketId, Status};

/// Where to connect and how hard to try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Remote endpoint address
    pub remote: Ipv4Addr,
    /// Remote endpoint port
    pub port: u16,
    /// Hardware socket dedicated to this link
    pub socket: SocketId,
    /// Budget for one connect attempt
    pub connect_timeout_ms: u32,
    /// Consecutive connect failures tolerated before the chip is reset
    pub max_failures: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            remote: Ipv4Addr::new(192, 168, 1, 1),
            port: 1883,
            socket: SocketId::FIRST,
            connect_timeout_ms: 5_000,
            max_failures: 3,
        }
    }
}

/// Supervisor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// Chip needs (re)initialization
    Down,
    /// Chip configured, no connection
    NetworkUp,
    /// Connection established
    Connected,
}

/// Outcome of one [`LinkSupervisor::poll`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// Chip reset and configured
    NetworkUp,
    /// Chip bring-up failed; retried on the next poll
    InitFailed(Error),
    /// Ethernet PHY reports no link
    LinkDown,
    /// Connection established
    Connected,
    /// Connect attempt failed; `failures` counts consecutive failures
    ConnectFailed { error: Error, failures: u8 },
    /// Too many consecutive failures, chip will be reset
    GaveUp,
    /// Peer closed with bytes still buffered; read them before the next poll
    Draining { pending: u16 },
    /// Established connection went away
    ConnectionLost,
    /// Socket did not reach CLOSED; chip will be reset
    CloseFailed(Error),
    /// Bus fault while supervising; chip will be reset
    Fault(Error),
    /// Still connected, nothing to do
    Idle,
}

/// Drives one socket through connect / reconnect / chip reset
pub struct LinkSupervisor {
    config: LinkConfig,
    network: NetworkConfig,
    state: LinkState,
    failures: u8,
}

impl LinkSupervisor {
    pub fn new(config: LinkConfig, network: NetworkConfig) -> Self {
        Self {
            config,
            network,
            state: LinkState::Down,
            failures: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Consecutive connect failures since the last success or reset
    pub fn failures(&self) -> u8 {
        self.failures
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    /// Advance the state machine by one step
    ///
    /// May block for up to `connect_timeout_ms` while connecting.
    pub fn poll<SPI, RST, D, C>(&mut self, chip: &mut ChipContext<SPI, RST, D, C>) -> LinkEvent
    where
        SPI: SpiDevice,
        RST: OutputPin,
        D: DelayNs,
        C: Clock,
    {
        let step = match self.state {
            LinkState::Down => self.bring_up(chip),
            LinkState::NetworkUp => self.try_connect(chip),
            LinkState::Connected => self.check_connection(chip),
        };
        step.unwrap_or_else(|error| {
            // Bus faults and closes that never complete
            self.state = LinkState::Down;
            self.failures = 0;
            if error.is_transport() {
                LinkEvent::Fault(error)
            } else {
                LinkEvent::CloseFailed(error)
            }
        })
    }

    fn bring_up<SPI, RST, D, C>(
        &mut self,
        chip: &mut ChipContext<SPI, RST, D, C>,
    ) -> Result<LinkEvent, Error>
    where
        SPI: SpiDevice,
        RST: OutputPin,
        D: DelayNs,
        C: Clock,
    {
        match chip.init(self.network) {
            Ok(()) => {
                self.state = LinkState::NetworkUp;
                self.failures = 0;
                Ok(LinkEvent::NetworkUp)
            }
            Err(error) => Ok(LinkEvent::InitFailed(error)),
        }
    }

    fn try_connect<SPI, RST, D, C>(
        &mut self,
        chip: &mut ChipContext<SPI, RST, D, C>,
    ) -> Result<LinkEvent, Error>
    where
        SPI: SpiDevice,
        RST: OutputPin,
        D: DelayNs,
        C: Clock,
    {
        if !chip.link_up()? {
            self.state = LinkState::Down;
            return Ok(LinkEvent::LinkDown);
        }

        let LinkConfig {
            remote,
            port,
            socket,
            connect_timeout_ms,
            ..
        } = self.config;
        match chip.connect(socket, remote, port, connect_timeout_ms) {
            Ok(()) => {
                self.state = LinkState::Connected;
                self.failures = 0;
                Ok(LinkEvent::Connected)
            }
            Err(error) if error.is_transport() => Err(error),
            Err(error) => {
                self.failures = self.failures.saturating_add(1);
                if self.failures > self.config.max_failures {
                    chip.close(socket)?;
                    self.failures = 0;
                    self.state = LinkState::Down;
                    return Ok(LinkEvent::GaveUp);
                }
                Ok(LinkEvent::ConnectFailed {
                    error,
                    failures: self.failures,
                })
            }
        }
    }

    fn check_connection<SPI, RST, D, C>(
        &mut self,
        chip: &mut ChipContext<SPI, RST, D, C>,
    ) -> Result<LinkEvent, Error>
    where
        SPI: SpiDevice,
        RST: OutputPin,
        D: DelayNs,
        C: Clock,
    {
        let socket = self.config.socket;
        match chip.status(socket)? {
            Status::Established => return Ok(LinkEvent::Idle),
            Status::CloseWait => {
                let pending = chip.rx_received(socket)?;
                if pending > 0 {
                    return Ok(LinkEvent::Draining { pending });
                }
            }
            _ => {}
        }
        chip.close(socket)?;
        self.state = LinkState::NetworkUp;
        Ok(LinkEvent::ConnectionLost)
    }
}
