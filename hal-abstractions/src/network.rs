//! Byte-stream network transport
//!
//! Protocol clients (MQTT and friends) talk to the network exclusively
//! through this trait. Every blocking operation carries an explicit
//! millisecond timeout and implementations never retry on their own:
//! reconnect and backoff policy belongs to the caller.

use core::net::Ipv4Addr;

/// Connection-oriented byte stream with explicit timeouts
pub trait ByteStream {
    /// Error type, convertible to `embedded_io::ErrorKind`
    type Error: embedded_io::Error;

    /// Connect to an already-resolved IPv4 endpoint
    ///
    /// # Errors
    ///
    /// Implementations report a timeout distinctly (`ErrorKind::TimedOut`)
    /// so callers can count failures and back off.
    fn connect(&mut self, remote: Ipv4Addr, port: u16, timeout_ms: u32)
        -> Result<(), Self::Error>;

    /// Read up to `buf.len()` bytes
    ///
    /// Returns `Ok(0)` once the peer has closed and nothing is left to drain.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Write up to `buf.len()` bytes, returning how many were accepted
    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, Self::Error>;

    /// Close the connection; calling this on a closed stream succeeds
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// True while the connection is established
    fn is_connected(&mut self) -> bool;

    /// IPv4 address of the local interface
    fn local_ip(&mut self) -> Result<Ipv4Addr, Self::Error>;
}
