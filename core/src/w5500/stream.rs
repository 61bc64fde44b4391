//! Byte-stream adapter over one TCP socket
//!
//! [`TcpStream`] borrows a [`ChipContext`] and a socket id and exposes them
//! through the `embedded-io` blocking traits and
//! [`hal_abstractions::ByteStream`], which is what protocol clients consume.

use core::net::Ipv4Addr;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use embedded_io::{ErrorType, Read, Write};
use hal_abstractions::{ByteStream, Clock};

use super::error::Error;
use super::slots::SocketId;
use super::ChipContext;

/// Default timeout for `embedded-io` reads and writes
pub const DEFAULT_IO_TIMEOUT_MS: u32 = 1_000;

/// TCP connection on one hardware socket
///
/// # Example
///
/// ```ignore
/// let id = chip.allocate_socket()?;
/// let mut stream = TcpStream::new(&mut chip, id);
/// stream.connect(broker_ip, 1883, 5_000)?;
/// stream.write_all(b"hello")?;
/// ```
pub struct TcpStream<'a, SPI, RST, D, C> {
    chip: &'a mut ChipContext<SPI, RST, D, C>,
    id: SocketId,
    read_timeout_ms: u32,
    write_timeout_ms: u32,
}

impl<'a, SPI, RST, D, C> TcpStream<'a, SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    pub fn new(chip: &'a mut ChipContext<SPI, RST, D, C>, id: SocketId) -> Self {
        Self {
            chip,
            id,
            read_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }

    /// Timeouts used by the `embedded-io` traits (zero means non-blocking)
    pub fn with_timeouts(mut self, read_timeout_ms: u32, write_timeout_ms: u32) -> Self {
        self.read_timeout_ms = read_timeout_ms;
        self.write_timeout_ms = write_timeout_ms;
        self
    }

    pub fn socket(&self) -> SocketId {
        self.id
    }

    /// Read with an explicit timeout
    ///
    /// Returns `Ok(0)` once the peer has closed and everything is drained.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if nothing arrived in time.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let received = self.chip.receive(self.id, buf, timeout_ms)?;
        if received.timed_out() {
            return Err(Error::Timeout);
        }
        Ok(received.len)
    }

    /// Write with an explicit timeout, returning how many bytes were accepted
    pub fn write_timeout(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Error> {
        self.chip.send(self.id, buf, timeout_ms)
    }

    /// Give the chip back, closing nothing
    pub fn into_inner(self) -> (&'a mut ChipContext<SPI, RST, D, C>, SocketId) {
        (self.chip, self.id)
    }
}

impl<SPI, RST, D, C> ErrorType for TcpStream<'_, SPI, RST, D, C> {
    type Error = Error;
}

impl<SPI, RST, D, C> Read for TcpStream<'_, SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_timeout(buf, self.read_timeout_ms)
    }
}

impl<SPI, RST, D, C> Write for TcpStream<'_, SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match self.write_timeout(buf, self.write_timeout_ms)? {
            0 if !buf.is_empty() => Err(Error::Timeout),
            n => Ok(n),
        }
    }

    /// Every send already waits for SEND_OK
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<SPI, RST, D, C> ByteStream for TcpStream<'_, SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    type Error = Error;

    fn connect(&mut self, remote: Ipv4Addr, port: u16, timeout_ms: u32) -> Result<(), Error> {
        self.chip.connect(self.id, remote, port, timeout_ms)
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Error> {
        self.read_timeout(buf, timeout_ms)
    }

    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Error> {
        self.write_timeout(buf, timeout_ms)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        self.chip.close(self.id)
    }

    /// A transport error reads as disconnected
    fn is_connected(&mut self) -> bool {
        self.chip.is_connected(self.id).unwrap_or(false)
    }

    fn local_ip(&mut self) -> Result<Ipv4Addr, Error> {
        self.chip.local_ip()
    }
}
