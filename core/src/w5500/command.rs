//! Socket command/status state machine
//!
//! Commands go to Sn_CR, the chip reports lifecycle state through Sn_SR and
//! edge events through Sn_IR. Status is always read fresh before a decision;
//! a command that the current status does not permit is rejected before
//! anything is written.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use hal_abstractions::Clock;

use super::error::Error;
use super::registers::{socket as sreg, Block, Command, Interrupts, Status};
use super::slots::SocketId;
use super::{ChipContext, FAST_POLL_US};

impl<SPI, RST, D, C> ChipContext<SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    /// Current socket status, read from the chip
    pub fn status(&mut self, id: SocketId) -> Result<Status, Error> {
        let status = Status::from_raw(self.bus.read_u8(sreg::STATUS, Block::Socket(id))?);
        self.sockets.slot_mut(id).status = status;
        Ok(status)
    }

    /// Pending interrupt flags
    pub fn interrupts(&mut self, id: SocketId) -> Result<Interrupts, Error> {
        let raw = self.bus.read_u8(sreg::INTERRUPT, Block::Socket(id))?;
        Ok(Interrupts::from_bits(raw))
    }

    /// Acknowledge interrupt flags (write-1-to-clear)
    pub fn clear_interrupts(&mut self, id: SocketId, flags: Interrupts) -> Result<(), Error> {
        if flags.is_empty() {
            return Ok(());
        }
        self.bus
            .write_u8(sreg::INTERRUPT, Block::Socket(id), flags.bits())
    }

    /// Issue `command` after checking it is permitted from the current status
    ///
    /// Waits for the chip to accept the command (Sn_CR reads back zero).
    ///
    /// # Errors
    ///
    /// `InvalidState` without touching the chip if the status forbids the
    /// command, `Timeout` if the chip never accepts it.
    pub fn command(&mut self, id: SocketId, command: Command) -> Result<(), Error> {
        let status = self.status(id)?;
        if !command.permitted_from(status) {
            return Err(Error::InvalidState { command, status });
        }
        self.bus
            .write_u8(sreg::COMMAND, Block::Socket(id), command as u8)?;

        let deadline = self.deadline(self.driver.command_timeout_ms);
        loop {
            if self.bus.read_u8(sreg::COMMAND, Block::Socket(id))? == 0 {
                return Ok(());
            }
            if deadline.expired(self.now_ms()) {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(FAST_POLL_US);
        }
    }

    /// Poll until the socket reports `wanted`
    ///
    /// # Errors
    ///
    /// `Timeout` if `timeout_ms` elapses first.
    pub fn wait_status(
        &mut self,
        id: SocketId,
        wanted: Status,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let deadline = self.deadline(timeout_ms);
        loop {
            if self.status(id)? == wanted {
                return Ok(());
            }
            if deadline.expired(self.now_ms()) {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(FAST_POLL_US);
        }
    }

    /// Socket is ESTABLISHED (TCP) or open for UDP
    ///
    /// A single status read, nothing is written.
    pub fn is_connected(&mut self, id: SocketId) -> Result<bool, Error> {
        Ok(matches!(self.status(id)?, Status::Established | Status::Udp))
    }

    /// Peer sent FIN; buffered data can still be drained
    pub fn is_fin_received(&mut self, id: SocketId) -> Result<bool, Error> {
        Ok(self.status(id)? == Status::CloseWait)
    }

    /// Issue SEND_KEEP on an established connection
    pub fn send_keepalive(&mut self, id: SocketId) -> Result<(), Error> {
        self.command(id, Command::SendKeep)
    }
}
