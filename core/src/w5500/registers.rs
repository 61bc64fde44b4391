//! W5500 register map, command opcodes and status codes
//!
//! Addresses are byte offsets inside a register block. The block itself is
//! selected by the control byte of each SPI frame (see [`Block`]).

use super::slots::SocketId;

/// Number of hardware sockets on the chip
pub const MAX_SOCKETS: usize = 8;

/// Value of the version register on a genuine W5500
pub const CHIP_VERSION: u8 = 0x04;

/// Common register block
pub mod common {
    /// Mode register (bit 7 = software reset)
    pub const MODE: u16 = 0x0000;
    /// Gateway address, 4 bytes
    pub const GATEWAY: u16 = 0x0001;
    /// Subnet mask, 4 bytes
    pub const SUBNET: u16 = 0x0005;
    /// Source hardware address, 6 bytes
    pub const MAC: u16 = 0x0009;
    /// Source IP address, 4 bytes
    pub const SOURCE_IP: u16 = 0x000F;
    /// Retransmission time in 100 µs units, 2 bytes
    pub const RETRY_TIME: u16 = 0x0019;
    /// Retransmission count
    pub const RETRY_COUNT: u16 = 0x001B;
    /// PHY configuration (bit 0 = link up)
    pub const PHY_CONFIG: u16 = 0x002E;
    /// Chip version
    pub const VERSION: u16 = 0x0039;

    /// Software reset bit in [`MODE`], self-clearing
    pub const MODE_RESET: u8 = 0x80;
    /// Link status bit in [`PHY_CONFIG`]
    pub const PHY_LINK_UP: u8 = 0x01;
}

/// Per-socket register block
pub mod socket {
    pub const MODE: u16 = 0x0000;
    pub const COMMAND: u16 = 0x0001;
    pub const INTERRUPT: u16 = 0x0002;
    pub const STATUS: u16 = 0x0003;
    pub const SOURCE_PORT: u16 = 0x0004;
    pub const DEST_IP: u16 = 0x000C;
    pub const DEST_PORT: u16 = 0x0010;
    pub const RX_BUF_SIZE: u16 = 0x001E;
    pub const TX_BUF_SIZE: u16 = 0x001F;
    pub const TX_FREE_SIZE: u16 = 0x0020;
    pub const TX_READ_PTR: u16 = 0x0022;
    pub const TX_WRITE_PTR: u16 = 0x0024;
    pub const RX_RECEIVED_SIZE: u16 = 0x0026;
    pub const RX_READ_PTR: u16 = 0x0028;
    pub const RX_WRITE_PTR: u16 = 0x002A;
}

/// Direction bit of the control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    Read = 0x00,
    Write = 0x04,
}

/// Register block addressed by an SPI frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Block {
    /// Chip-wide registers
    Common,
    /// Socket `n` registers
    Socket(SocketId),
    /// Socket `n` transmit buffer memory
    TxBuffer(SocketId),
    /// Socket `n` receive buffer memory
    RxBuffer(SocketId),
}

impl Block {
    /// Control byte for this block: `BSB << 3 | RWB << 2 | OM` with variable
    /// length mode (OM = 0b00)
    ///
    /// Socket `n` register block reads use `0x08 + (n << 5)`, writes
    /// `0x0C + (n << 5)`.
    pub const fn control_byte(self, access: Access) -> u8 {
        let block = match self {
            Block::Common => 0x00,
            Block::Socket(id) => 0x08 + (id.raw() << 5),
            Block::TxBuffer(id) => 0x10 + (id.raw() << 5),
            Block::RxBuffer(id) => 0x18 + (id.raw() << 5),
        };
        block | access as u8
    }
}

/// Socket mode register protocol selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    #[default]
    Closed = 0x00,
    Tcp = 0x01,
    Udp = 0x02,
}

/// Socket command register opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Discon = 0x08,
    Close = 0x10,
    Send = 0x20,
    SendKeep = 0x22,
    Recv = 0x40,
}

impl Command {
    /// Whether the chip accepts this command while the socket is in `status`
    ///
    /// `Close` is accepted from any state. Everything else follows the
    /// socket lifecycle: `CLOSED → INIT → (LISTEN | SYNSENT) → ESTABLISHED →
    /// CLOSE_WAIT → CLOSED`, with `UDP` replacing the TCP branch.
    pub fn permitted_from(self, status: Status) -> bool {
        use Status::*;
        match self {
            Command::Open => status == Closed,
            Command::Listen | Command::Connect => status == Init,
            Command::Discon => matches!(status, Established | CloseWait),
            Command::Close => true,
            Command::Send | Command::Recv => matches!(status, Established | CloseWait | Udp),
            Command::SendKeep => status == Established,
        }
    }
}

/// Socket status register values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Closed,
    Init,
    Listen,
    SynSent,
    SynRecv,
    Established,
    FinWait,
    Closing,
    TimeWait,
    CloseWait,
    LastAck,
    Udp,
    MacRaw,
    /// A value the datasheet does not define
    Unknown(u8),
}

impl Status {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Status::Closed,
            0x13 => Status::Init,
            0x14 => Status::Listen,
            0x15 => Status::SynSent,
            0x16 => Status::SynRecv,
            0x17 => Status::Established,
            0x18 => Status::FinWait,
            0x1A => Status::Closing,
            0x1B => Status::TimeWait,
            0x1C => Status::CloseWait,
            0x1D => Status::LastAck,
            0x22 => Status::Udp,
            0x42 => Status::MacRaw,
            other => Status::Unknown(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            Status::Closed => 0x00,
            Status::Init => 0x13,
            Status::Listen => 0x14,
            Status::SynSent => 0x15,
            Status::SynRecv => 0x16,
            Status::Established => 0x17,
            Status::FinWait => 0x18,
            Status::Closing => 0x1A,
            Status::TimeWait => 0x1B,
            Status::CloseWait => 0x1C,
            Status::LastAck => 0x1D,
            Status::Udp => 0x22,
            Status::MacRaw => 0x42,
            Status::Unknown(raw) => raw,
        }
    }

    /// Teardown states the chip passes through on its own after DISCON
    pub const fn is_closing(self) -> bool {
        matches!(
            self,
            Status::FinWait | Status::Closing | Status::TimeWait | Status::LastAck
        )
    }
}

/// Socket interrupt register flags (write-1-to-clear)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interrupts(u8);

impl Interrupts {
    pub const CON: Self = Self(0x01);
    pub const DISCON: Self = Self(0x02);
    pub const RECV: Self = Self(0x04);
    pub const TIMEOUT: Self = Self(0x08);
    pub const SEND_OK: Self = Self(0x10);
    pub const ALL: Self = Self(0x1F);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}
