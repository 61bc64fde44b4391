//! Register transport: one SPI frame per register access
//!
//! Every access is a single `SpiDevice` transaction, so chip-select framing
//! is owned by the device and no other frame can interleave. A W5500 frame
//! is a 16-bit big-endian address, a control byte, then the data phase.

use embedded_hal::spi::{Error as _, Operation, SpiDevice};

use super::error::{BusFault, Error};

/// Serializes register reads and writes over an SPI device
pub struct RegisterTransport<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> RegisterTransport<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Give the SPI device back
    pub fn release(self) -> SPI {
        self.spi
    }

    /// Write `data` starting at `address` in the block selected by `control`
    ///
    /// # Errors
    ///
    /// Returns `Error::Spi` if the bus transaction fails. Nothing is retried.
    pub fn write(&mut self, address: u16, control: u8, data: &[u8]) -> Result<(), Error> {
        let header = frame_header(address, control);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Write(data)])
            .map_err(|e| Error::Spi(BusFault::from(e.kind())))
    }

    /// Read `data.len()` bytes starting at `address` in the block selected
    /// by `control`
    ///
    /// # Errors
    ///
    /// Returns `Error::Spi` if the bus transaction fails. Nothing is retried.
    pub fn read(&mut self, address: u16, control: u8, data: &mut [u8]) -> Result<(), Error> {
        let header = frame_header(address, control);
        self.spi
            .transaction(&mut [Operation::Write(&header), Operation::Read(data)])
            .map_err(|e| Error::Spi(BusFault::from(e.kind())))
    }
}

fn frame_header(address: u16, control: u8) -> [u8; 3] {
    let [hi, lo] = address.to_be_bytes();
    [hi, lo, control]
}
