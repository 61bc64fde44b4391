//! Driver error types
//!
//! The driver never logs. Every failure comes back as an [`Error`] so the
//! calling layer can tell transport faults, timeouts and misuse apart and
//! pick its own retry policy.

use super::registers::{Command, Status};
use super::slots::SocketId;

/// SPI bus failure, mirrored from `embedded_hal::spi::ErrorKind`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFault {
    Overrun,
    ModeFault,
    FrameFormat,
    ChipSelectFault,
    Other,
}

impl From<embedded_hal::spi::ErrorKind> for BusFault {
    fn from(kind: embedded_hal::spi::ErrorKind) -> Self {
        use embedded_hal::spi::ErrorKind;
        match kind {
            ErrorKind::Overrun => BusFault::Overrun,
            ErrorKind::ModeFault => BusFault::ModeFault,
            ErrorKind::FrameFormat => BusFault::FrameFormat,
            ErrorKind::ChipSelectFault => BusFault::ChipSelectFault,
            _ => BusFault::Other,
        }
    }
}

/// W5500 driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// SPI transaction failed
    Spi(BusFault),
    /// Reset line could not be driven
    ResetPin,
    /// Deadline elapsed (connect, send, accept, or a chip acknowledgement)
    Timeout,
    /// Command is not valid from the socket's current status
    InvalidState { command: Command, status: Status },
    /// Socket id outside `0..8`
    InvalidSocket(u8),
    /// Socket already carries a connection
    SocketInUse(SocketId),
    /// Every socket slot is allocated
    NoFreeSocket,
    /// Remote reset the connection attempt
    ConnectionRefused,
    /// Connection dropped while an operation was in progress
    ConnectionClosed,
    /// Datagram larger than the socket's transmit buffer
    MessageTooLarge,
    /// Configuration rejected before touching the chip
    InvalidConfig,
    /// Version register did not identify a W5500
    ChipNotFound { version: u8 },
}

impl Error {
    /// Deadline-based failure; callers may retry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Bus or pin failure; fatal to the current operation
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Spi(_) | Error::ResetPin)
    }

    /// Programming error on the caller's side; retrying will not help
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. }
                | Error::InvalidSocket(_)
                | Error::SocketInUse(_)
                | Error::MessageTooLarge
                | Error::InvalidConfig
        )
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Spi(fault) => write!(f, "SPI transaction failed: {:?}", fault),
            Self::ResetPin => write!(f, "Reset pin error"),
            Self::Timeout => write!(f, "Operation timed out"),
            Self::InvalidState { command, status } => {
                write!(f, "{:?} not permitted in status {:?}", command, status)
            }
            Self::InvalidSocket(raw) => write!(f, "Invalid socket id {}", raw),
            Self::SocketInUse(id) => write!(f, "Socket {} already in use", id.raw()),
            Self::NoFreeSocket => write!(f, "No free socket"),
            Self::ConnectionRefused => write!(f, "Connection refused"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::MessageTooLarge => write!(f, "Message too large"),
            Self::InvalidConfig => write!(f, "Invalid configuration"),
            Self::ChipNotFound { version } => {
                write!(f, "Chip not found (version register {:#04x})", version)
            }
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self {
            Self::Spi(_) | Self::ResetPin | Self::ChipNotFound { .. } => ErrorKind::Other,
            Self::Timeout => ErrorKind::TimedOut,
            Self::InvalidState { .. } => ErrorKind::NotConnected,
            Self::InvalidSocket(_) | Self::InvalidConfig => ErrorKind::InvalidInput,
            Self::SocketInUse(_) => ErrorKind::AddrInUse,
            Self::NoFreeSocket => ErrorKind::OutOfMemory,
            Self::ConnectionRefused => ErrorKind::ConnectionRefused,
            Self::ConnectionClosed => ErrorKind::BrokenPipe,
            Self::MessageTooLarge => ErrorKind::InvalidInput,
        }
    }
}
