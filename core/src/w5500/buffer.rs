//! TX/RX ring-buffer engine
//!
//! Each socket owns a transmit and a receive ring in chip memory. The chip
//! tracks free-running 16-bit pointers; the physical offset is the pointer
//! modulo the ring size. A transfer that would run past the end of the ring
//! is split into a tail segment and a head segment.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use hal_abstractions::Clock;

use super::error::Error;
use super::registers::{socket as sreg, Access, Block};
use super::slots::SocketId;
use super::ChipContext;

/// Contiguous piece of a ring transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Physical offset inside the ring
    pub offset: u16,
    /// Bytes in this piece
    pub len: usize,
}

/// Split `len` bytes starting at ring pointer `pointer` into at most two
/// contiguous segments of a ring of `size` bytes
///
/// `len` must not exceed `size`.
pub fn split_transfer(pointer: u16, len: usize, size: u16) -> (Segment, Option<Segment>) {
    let offset = pointer % size;
    let to_end = (size - offset) as usize;
    if len <= to_end {
        (Segment { offset, len }, None)
    } else {
        (
            Segment {
                offset,
                len: to_end,
            },
            Some(Segment {
                offset: 0,
                len: len - to_end,
            }),
        )
    }
}

impl<SPI, RST, D, C> ChipContext<SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    /// Free space in the transmit ring
    pub fn tx_free(&mut self, id: SocketId) -> Result<u16, Error> {
        let free = self
            .bus
            .read_u16_settled(sreg::TX_FREE_SIZE, Block::Socket(id))?;
        self.sockets.slot_mut(id).tx_free = free;
        Ok(free)
    }

    /// Unread bytes in the receive ring
    pub fn rx_received(&mut self, id: SocketId) -> Result<u16, Error> {
        let received = self
            .bus
            .read_u16_settled(sreg::RX_RECEIVED_SIZE, Block::Socket(id))?;
        self.sockets.slot_mut(id).rx_received = received;
        Ok(received)
    }

    /// Copy `data` into the transmit ring and advance the write pointer
    ///
    /// Does not issue SEND. The caller must have checked free space.
    pub(crate) fn write_tx(&mut self, id: SocketId, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let size = self.sockets.slot(id).tx_size;
        let pointer = self.bus.read_u16(sreg::TX_WRITE_PTR, Block::Socket(id))?;
        let control = Block::TxBuffer(id).control_byte(Access::Write);

        let (tail, head) = split_transfer(pointer, data.len(), size);
        self.bus
            .write(tail.offset, control, &data[..tail.len])?;
        if let Some(head) = head {
            self.bus.write(head.offset, control, &data[tail.len..])?;
        }

        // Free-running counter; the modulo above handles the wrap
        let advanced = pointer.wrapping_add(data.len() as u16);
        self.bus
            .write_u16(sreg::TX_WRITE_PTR, Block::Socket(id), advanced)
    }

    /// Copy `buf.len()` bytes out of the receive ring and advance the read
    /// pointer
    ///
    /// Does not issue RECV. The caller must have checked the received size.
    pub(crate) fn read_rx(&mut self, id: SocketId, buf: &mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let size = self.sockets.slot(id).rx_size;
        let pointer = self.bus.read_u16(sreg::RX_READ_PTR, Block::Socket(id))?;
        let control = Block::RxBuffer(id).control_byte(Access::Read);

        let (tail, head) = split_transfer(pointer, buf.len(), size);
        let (first, second) = buf.split_at_mut(tail.len);
        self.bus.read(tail.offset, control, first)?;
        if let Some(head) = head {
            self.bus.read(head.offset, control, second)?;
        }

        let advanced = pointer.wrapping_add(buf.len() as u16);
        self.bus
            .write_u16(sreg::RX_READ_PTR, Block::Socket(id), advanced)
    }

    /// Advance the read pointer past `len` bytes without reading them
    pub(crate) fn skip_rx(&mut self, id: SocketId, len: u16) -> Result<(), Error> {
        if len == 0 {
            return Ok(());
        }
        let pointer = self.bus.read_u16(sreg::RX_READ_PTR, Block::Socket(id))?;
        self.bus.write_u16(
            sreg::RX_READ_PTR,
            Block::Socket(id),
            pointer.wrapping_add(len),
        )
    }
}
