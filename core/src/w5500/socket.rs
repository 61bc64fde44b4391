//! Connection façade
//!
//! Public socket operations composed from the command state machine and
//! the buffer engine. Every blocking call polls the chip with a
//! caller-supplied millisecond timeout; a timeout of zero means
//! non-blocking. Nothing here retries on its own.

use core::net::{Ipv4Addr, SocketAddrV4};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use hal_abstractions::{Clock, Deadline};

use super::error::Error;
use super::registers::{socket as sreg, Block, Command, Interrupts, Protocol, Status};
use super::slots::SocketId;
use super::{ChipContext, FAST_POLL_US};

/// Size of the header the chip prepends to each received UDP datagram
const UDP_HEADER_LEN: usize = 8;

/// Result of a TCP receive
///
/// `len == 0 && !peer_closed` means the timeout elapsed with nothing to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Received {
    /// Bytes copied into the caller's buffer
    pub len: usize,
    /// Peer has closed its side; drain until `len == 0`, then close
    pub peer_closed: bool,
}

impl Received {
    /// Timeout elapsed without data or a close
    pub fn timed_out(&self) -> bool {
        self.len == 0 && !self.peer_closed
    }

    /// Connection has ended and nothing is left to read
    pub fn is_eof(&self) -> bool {
        self.len == 0 && self.peer_closed
    }
}

/// One received UDP datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    /// Sender address
    pub remote: SocketAddrV4,
    /// Bytes copied into the caller's buffer
    pub len: usize,
    /// Datagram was larger than the caller's buffer; the rest was dropped
    pub truncated: bool,
}

impl<SPI, RST, D, C> ChipContext<SPI, RST, D, C>
where
    SPI: SpiDevice,
    RST: OutputPin,
    D: DelayNs,
    C: Clock,
{
    /// Open `id` as a TCP client and connect to `remote:port`
    ///
    /// This function:
    /// 1. Claims the slot and picks an ephemeral local port
    /// 2. Issues OPEN and waits for INIT
    /// 3. Issues CONNECT and polls until ESTABLISHED, the TIMEOUT interrupt,
    ///    or `timeout_ms` elapses
    ///
    /// On any failure after OPEN the socket is closed again so the slot can
    /// be reused right away.
    ///
    /// # Errors
    ///
    /// - `Timeout` on the TIMEOUT interrupt or an elapsed deadline
    /// - `ConnectionRefused` if the remote resets the attempt
    /// - `SocketInUse` / `InvalidState` if the socket is already open
    /// - a transport error
    pub fn connect(
        &mut self,
        id: SocketId,
        remote: Ipv4Addr,
        port: u16,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let deadline = self.deadline(timeout_ms);
        self.open(id, Protocol::Tcp, None)?;

        let result = self.start_connect(id, remote, port, deadline);
        if result.is_err() {
            self.close(id)?;
        }
        result
    }

    fn start_connect(
        &mut self,
        id: SocketId,
        remote: Ipv4Addr,
        port: u16,
        deadline: Deadline,
    ) -> Result<(), Error> {
        self.bus
            .write_ipv4(sreg::DEST_IP, Block::Socket(id), remote)?;
        self.bus
            .write_u16(sreg::DEST_PORT, Block::Socket(id), port)?;
        self.command(id, Command::Connect)?;

        loop {
            let status = self.status(id)?;
            let pending = self.interrupts(id)?;
            if status == Status::Established || pending.contains(Interrupts::CON) {
                self.clear_interrupts(id, Interrupts::CON)?;
                return Ok(());
            }
            if pending.contains(Interrupts::TIMEOUT) {
                self.clear_interrupts(id, Interrupts::TIMEOUT)?;
                return Err(Error::Timeout);
            }
            if status == Status::Closed {
                return Err(Error::ConnectionRefused);
            }
            if deadline.expired(self.now_ms()) {
                return Err(Error::Timeout);
            }
            self.sleep_poll_interval();
        }
    }

    /// Open `id` as a TCP server on `port` and wait for LISTEN
    pub fn listen(&mut self, id: SocketId, port: u16) -> Result<(), Error> {
        self.open(id, Protocol::Tcp, Some(port))?;
        let result = self.command(id, Command::Listen).and_then(|_| {
            let timeout = self.driver.command_timeout_ms;
            self.wait_status(id, Status::Listen, timeout)
        });
        if result.is_err() {
            self.close(id)?;
        }
        result
    }

    /// Wait for a remote client to connect to a listening socket
    ///
    /// # Errors
    ///
    /// `Timeout` if nobody connects in time; the socket keeps listening.
    /// `ConnectionClosed` if the socket left LISTEN without a connection.
    pub fn accept(&mut self, id: SocketId, timeout_ms: u32) -> Result<SocketAddrV4, Error> {
        let deadline = self.deadline(timeout_ms);
        loop {
            match self.status(id)? {
                Status::Established | Status::CloseWait => {
                    self.clear_interrupts(id, Interrupts::CON)?;
                    return self.remote_endpoint(id);
                }
                Status::Listen | Status::SynRecv => {}
                Status::Closed => return Err(Error::ConnectionClosed),
                status => {
                    return Err(Error::InvalidState {
                        command: Command::Listen,
                        status,
                    })
                }
            }
            if deadline.expired(self.now_ms()) {
                return Err(Error::Timeout);
            }
            self.sleep_poll_interval();
        }
    }

    /// Open `id` as a UDP socket bound to `port`
    pub fn open_udp(&mut self, id: SocketId, port: u16) -> Result<(), Error> {
        self.open(id, Protocol::Udp, Some(port))
    }

    /// Address and port of the remote end
    pub fn remote_endpoint(&mut self, id: SocketId) -> Result<SocketAddrV4, Error> {
        let ip = self.bus.read_ipv4(sreg::DEST_IP, Block::Socket(id))?;
        let port = self.bus.read_u16(sreg::DEST_PORT, Block::Socket(id))?;
        Ok(SocketAddrV4::new(ip, port))
    }

    /// Claim the slot and open it; a failed open leaves the slot as it was
    fn open(&mut self, id: SocketId, protocol: Protocol, port: Option<u16>) -> Result<(), Error> {
        let reserved = self.slot(id).is_allocated();
        self.sockets.claim(id)?;
        let result = self.open_claimed(id, protocol, port);
        if result.is_err() && !reserved {
            self.sockets.release(id);
        }
        result
    }

    /// Set mode and port, issue OPEN and wait for INIT / UDP
    fn open_claimed(
        &mut self,
        id: SocketId,
        protocol: Protocol,
        port: Option<u16>,
    ) -> Result<(), Error> {
        let status = self.status(id)?;
        if status != Status::Closed {
            return Err(Error::InvalidState {
                command: Command::Open,
                status,
            });
        }

        let port = match port {
            Some(port) => port,
            None => self.sockets.ephemeral_port(),
        };
        self.bus
            .write_u8(sreg::MODE, Block::Socket(id), protocol as u8)?;
        self.bus
            .write_u16(sreg::SOURCE_PORT, Block::Socket(id), port)?;
        self.clear_interrupts(id, Interrupts::ALL)?;
        self.command(id, Command::Open)?;

        let opened = match protocol {
            Protocol::Udp => Status::Udp,
            _ => Status::Init,
        };
        let timeout = self.driver.command_timeout_ms;
        if let Err(e) = self.wait_status(id, opened, timeout) {
            self.close(id)?;
            return Err(e);
        }
        self.sockets.mark_open(id, protocol, port);
        Ok(())
    }

    /// Wait until at least `min` bytes of transmit space are free
    ///
    /// Returns the free space seen last; this is below `min` only when
    /// `timeout_ms` elapsed.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the socket drops while waiting.
    pub fn wait_writable(&mut self, id: SocketId, timeout_ms: u32, min: u16) -> Result<u16, Error> {
        let deadline = self.deadline(timeout_ms);
        loop {
            let free = self.tx_free(id)?;
            if free >= min {
                return Ok(free);
            }
            let status = self.status(id)?;
            if !matches!(status, Status::Established | Status::CloseWait | Status::Udp) {
                return Err(Error::ConnectionClosed);
            }
            if deadline.expired(self.now_ms()) {
                return Ok(free);
            }
            self.sleep_poll_interval();
        }
    }

    /// Wait until at least `min` bytes (at least one) are readable
    ///
    /// Returns the received size seen last; zero means the timeout elapsed
    /// or the peer closed with nothing buffered.
    pub fn wait_readable(&mut self, id: SocketId, timeout_ms: u32, min: u16) -> Result<u16, Error> {
        let min = min.max(1);
        let deadline = self.deadline(timeout_ms);
        loop {
            let received = self.rx_received(id)?;
            if received >= min {
                return Ok(received);
            }
            if !matches!(self.status(id)?, Status::Established | Status::Udp) {
                return Ok(received);
            }
            if deadline.expired(self.now_ms()) {
                return Ok(received);
            }
            self.sleep_poll_interval();
        }
    }

    /// Send on an established TCP connection
    ///
    /// With `timeout_ms == 0` only what fits right now is written, possibly
    /// nothing. Otherwise this waits for room for the whole request (capped
    /// at the ring size) and writes whatever is free when the deadline hits.
    /// Returns the number of bytes handed to the chip.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the socket is ESTABLISHED
    /// - `Timeout` if no space freed up in time, or the chip gave up
    ///   retransmitting
    /// - `ConnectionClosed` if the connection dropped mid-send
    pub fn send(&mut self, id: SocketId, data: &[u8], timeout_ms: u32) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let status = self.status(id)?;
        if status != Status::Established {
            return Err(Error::InvalidState {
                command: Command::Send,
                status,
            });
        }

        let size = self.sockets.slot(id).tx_size;
        let wanted = data.len().min(size as usize) as u16;
        let free = self.wait_writable(id, timeout_ms, wanted)?;
        if free == 0 {
            return if timeout_ms == 0 {
                Ok(0)
            } else {
                Err(Error::Timeout)
            };
        }

        let len = wanted.min(free) as usize;
        self.write_tx(id, &data[..len])?;
        self.command(id, Command::Send)?;
        self.wait_send_ok(id)?;
        Ok(len)
    }

    /// Send one UDP datagram to `remote:port`
    ///
    /// Datagrams are never split. With `timeout_ms == 0` this returns
    /// `Ok(0)` if the datagram does not fit right now.
    ///
    /// # Errors
    ///
    /// - `MessageTooLarge` if the datagram can never fit the ring
    /// - `Timeout` if space did not free up, or ARP failed
    pub fn send_to(
        &mut self,
        id: SocketId,
        remote: Ipv4Addr,
        port: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let status = self.status(id)?;
        if status != Status::Udp {
            return Err(Error::InvalidState {
                command: Command::Send,
                status,
            });
        }
        if data.len() > self.sockets.slot(id).tx_size as usize {
            return Err(Error::MessageTooLarge);
        }

        let len = data.len() as u16;
        let free = self.wait_writable(id, timeout_ms, len)?;
        if free < len {
            return if timeout_ms == 0 {
                Ok(0)
            } else {
                Err(Error::Timeout)
            };
        }

        self.bus
            .write_ipv4(sreg::DEST_IP, Block::Socket(id), remote)?;
        self.bus
            .write_u16(sreg::DEST_PORT, Block::Socket(id), port)?;
        self.write_tx(id, data)?;
        self.command(id, Command::Send)?;
        self.wait_send_ok(id)?;
        Ok(data.len())
    }

    /// Wait for SEND_OK after a SEND command
    fn wait_send_ok(&mut self, id: SocketId) -> Result<(), Error> {
        let deadline = self.deadline(self.driver.send_ack_timeout_ms);
        loop {
            let pending = self.interrupts(id)?;
            if pending.contains(Interrupts::SEND_OK) {
                return self.clear_interrupts(id, Interrupts::SEND_OK);
            }
            if pending.contains(Interrupts::TIMEOUT) {
                self.clear_interrupts(id, Interrupts::TIMEOUT)?;
                return Err(Error::Timeout);
            }
            if self.status(id)? == Status::Closed {
                return Err(Error::ConnectionClosed);
            }
            if deadline.expired(self.now_ms()) {
                return Err(Error::Timeout);
            }
            self.delay.delay_us(FAST_POLL_US);
        }
    }

    /// Receive from a TCP connection
    ///
    /// With `timeout_ms == 0` this returns immediately when nothing is
    /// buffered. After the peer closes, buffered bytes are still returned
    /// (with `peer_closed` set) until the ring is empty.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the socket is not an open TCP socket.
    pub fn receive(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<Received, Error> {
        if buf.is_empty() {
            return Ok(Received::default());
        }
        let deadline = self.deadline(timeout_ms);
        loop {
            let status = self.status(id)?;
            let readable = match status {
                Status::Established | Status::CloseWait => true,
                s if s == Status::Closed || s.is_closing() => false,
                _ => {
                    return Err(Error::InvalidState {
                        command: Command::Recv,
                        status,
                    })
                }
            };
            if self.sockets.slot(id).protocol != Protocol::Tcp {
                return Err(Error::InvalidState {
                    command: Command::Recv,
                    status,
                });
            }
            let peer_closed = status != Status::Established;

            if readable {
                // Received size is re-checked with a settled double read
                // before trusting it
                let available = self.rx_received(id)?;
                if available > 0 {
                    let len = buf.len().min(available as usize);
                    self.read_rx(id, &mut buf[..len])?;
                    self.command(id, Command::Recv)?;
                    self.clear_interrupts(id, Interrupts::RECV)?;
                    return Ok(Received { len, peer_closed });
                }
            }
            if peer_closed {
                return Ok(Received {
                    len: 0,
                    peer_closed,
                });
            }
            if deadline.expired(self.now_ms()) {
                return Ok(Received::default());
            }
            self.sleep_poll_interval();
        }
    }

    /// Receive one UDP datagram
    ///
    /// Returns `None` if nothing arrived before `timeout_ms`.
    pub fn receive_from(
        &mut self,
        id: SocketId,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<Option<Datagram>, Error> {
        let status = self.status(id)?;
        if status != Status::Udp {
            return Err(Error::InvalidState {
                command: Command::Recv,
                status,
            });
        }
        let available = self.wait_readable(id, timeout_ms, UDP_HEADER_LEN as u16)?;
        if (available as usize) < UDP_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; UDP_HEADER_LEN];
        self.read_rx(id, &mut header)?;
        let ip = Ipv4Addr::new(header[0], header[1], header[2], header[3]);
        let port = u16::from_be_bytes([header[4], header[5]]);
        let payload = u16::from_be_bytes([header[6], header[7]]);

        let len = buf.len().min(payload as usize);
        self.read_rx(id, &mut buf[..len])?;
        self.skip_rx(id, payload - len as u16)?;
        self.command(id, Command::Recv)?;
        self.clear_interrupts(id, Interrupts::RECV)?;

        Ok(Some(Datagram {
            remote: SocketAddrV4::new(ip, port),
            len,
            truncated: len < payload as usize,
        }))
    }

    /// Drive the socket back to CLOSED and release its slot
    ///
    /// Tolerates any state. An established connection gets a graceful
    /// DISCON first; if that does not complete in time, CLOSE forces it.
    /// Closing an already closed socket writes nothing.
    pub fn close(&mut self, id: SocketId) -> Result<(), Error> {
        let status = self.status(id)?;
        if status == Status::Closed {
            self.sockets.release(id);
            return Ok(());
        }

        if matches!(status, Status::Established | Status::CloseWait) {
            self.command(id, Command::Discon)?;
            let timeout = self.driver.disconnect_timeout_ms;
            match self.wait_status(id, Status::Closed, timeout) {
                Ok(()) | Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }

        if self.status(id)? != Status::Closed {
            self.command(id, Command::Close)?;
            let timeout = self.driver.command_timeout_ms;
            self.wait_status(id, Status::Closed, timeout)?;
        }
        self.clear_interrupts(id, Interrupts::ALL)?;
        self.sockets.release(id);
        Ok(())
    }
}
