//! Typed register access
//!
//! Fixed-width helpers on top of [`RegisterTransport`]. Multi-byte values
//! are big-endian on the wire; MAC and IPv4 addresses are opaque byte
//! sequences and go out in the order given.

use core::net::Ipv4Addr;

use embedded_hal::spi::SpiDevice;

use super::error::Error;
use super::registers::{Access, Block};
use super::transport::RegisterTransport;

/// Read attempts before accepting an unsettled 16-bit counter
const SETTLE_ATTEMPTS: usize = 8;

impl<SPI: SpiDevice> RegisterTransport<SPI> {
    pub fn read_u8(&mut self, address: u16, block: Block) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.read(address, block.control_byte(Access::Read), &mut buf)?;
        Ok(buf[0])
    }

    pub fn write_u8(&mut self, address: u16, block: Block, value: u8) -> Result<(), Error> {
        self.write(address, block.control_byte(Access::Write), &[value])
    }

    pub fn read_u16(&mut self, address: u16, block: Block) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.read(address, block.control_byte(Access::Read), &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn write_u16(&mut self, address: u16, block: Block, value: u16) -> Result<(), Error> {
        self.write(
            address,
            block.control_byte(Access::Write),
            &value.to_be_bytes(),
        )
    }

    pub fn read_u32(&mut self, address: u16, block: Block) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.read(address, block.control_byte(Access::Read), &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn write_u32(&mut self, address: u16, block: Block, value: u32) -> Result<(), Error> {
        self.write(
            address,
            block.control_byte(Access::Write),
            &value.to_be_bytes(),
        )
    }

    pub fn read_mac(&mut self, address: u16, block: Block) -> Result<[u8; 6], Error> {
        let mut mac = [0u8; 6];
        self.read(address, block.control_byte(Access::Read), &mut mac)?;
        Ok(mac)
    }

    pub fn write_mac(&mut self, address: u16, block: Block, mac: &[u8; 6]) -> Result<(), Error> {
        self.write(address, block.control_byte(Access::Write), mac)
    }

    pub fn read_ipv4(&mut self, address: u16, block: Block) -> Result<Ipv4Addr, Error> {
        let mut octets = [0u8; 4];
        self.read(address, block.control_byte(Access::Read), &mut octets)?;
        Ok(Ipv4Addr::from(octets))
    }

    pub fn write_ipv4(&mut self, address: u16, block: Block, ip: Ipv4Addr) -> Result<(), Error> {
        self.write(address, block.control_byte(Access::Write), &ip.octets())
    }

    /// Read a 16-bit counter the chip may be updating mid-frame
    ///
    /// TX free size and RX received size are only trustworthy once two
    /// consecutive reads agree.
    pub fn read_u16_settled(&mut self, address: u16, block: Block) -> Result<u16, Error> {
        let mut previous = self.read_u16(address, block)?;
        for _ in 0..SETTLE_ATTEMPTS {
            let current = self.read_u16(address, block)?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }
        Ok(previous)
    }
}
