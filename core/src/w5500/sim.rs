//! Simulated W5500 for host tests
//!
//! Register-level model of the chip behind an `SpiDevice`, plus a reset pin,
//! a delay and a clock that all share one state. Only the behaviour the
//! driver depends on is modelled. Every ring-buffer transfer is checked
//! against the ring size, so a transfer the driver failed to split panics.

use core::cell::RefCell;
use core::convert::Infallible;
use core::net::SocketAddrV4;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};
use hal_abstractions::Clock;

use super::config::{DriverConfig, NetworkConfig};
use super::registers::{
    common, socket as sreg, Command, Interrupts, Status, CHIP_VERSION, MAX_SOCKETS,
};
use super::slots::SocketId;
use super::ChipContext;

const COMMON_LEN: usize = 0x40;
const SOCKET_REG_LEN: usize = 0x30;
/// Largest ring the chip can give one socket
const MAX_RING: usize = 16 * 1024;

pub(crate) type TestChip = ChipContext<SimChip, SimPin, SimDelay, SimClock>;

/// How the remote end reacts to CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Peer {
    /// Handshake completes at once
    Accept,
    /// SYN goes unanswered; the socket sits in SYNSENT
    Silent,
    /// ARP/TCP retransmission gives up: TIMEOUT interrupt and CLOSED
    Timeout,
    /// Peer answers RST
    Reset,
}

/// How the chip finishes a SEND
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Data acknowledged, SEND_OK
    Ack,
    /// Retransmission gives up: TIMEOUT interrupt and CLOSED
    Timeout,
    /// Connection reset before the data is acknowledged
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SocketSnapshot {
    regs: [u8; SOCKET_REG_LEN],
    tx: Vec<u8>,
    rx: Vec<u8>,
    sent: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct SimError;

impl spi::Error for SimError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

struct SimSocket {
    regs: [u8; SOCKET_REG_LEN],
    tx: Vec<u8>,
    rx: Vec<u8>,
    rx_committed: u16,
    peer: Peer,
    echo: bool,
    hold_tx: bool,
    ignore_discon: bool,
    delivery: Delivery,
    /// Reads of RX_RSR that still see the counter moving
    rx_size_glitches: u16,
    sent: Vec<u8>,
    commands: Vec<u8>,
    keepalives: usize,
}

impl SimSocket {
    fn new() -> Self {
        let mut regs = [0u8; SOCKET_REG_LEN];
        regs[sreg::RX_BUF_SIZE as usize] = 2;
        regs[sreg::TX_BUF_SIZE as usize] = 2;
        Self {
            regs,
            tx: vec![0; MAX_RING],
            rx: vec![0; MAX_RING],
            rx_committed: 0,
            peer: Peer::Silent,
            echo: false,
            hold_tx: false,
            ignore_discon: false,
            delivery: Delivery::Ack,
            rx_size_glitches: 0,
            sent: Vec::new(),
            commands: Vec::new(),
            keepalives: 0,
        }
    }

    /// Registers and rings back to defaults; the peer script is not chip state
    fn reset(&mut self) {
        let fresh = Self::new();
        self.regs = fresh.regs;
        self.tx = fresh.tx;
        self.rx = fresh.rx;
        self.rx_committed = 0;
    }

    fn reg16(&self, address: u16) -> u16 {
        let a = address as usize;
        u16::from_be_bytes([self.regs[a], self.regs[a + 1]])
    }

    fn set_reg16(&mut self, address: u16, value: u16) {
        let a = address as usize;
        self.regs[a..a + 2].copy_from_slice(&value.to_be_bytes());
    }

    fn tx_size(&self) -> usize {
        self.regs[sreg::TX_BUF_SIZE as usize] as usize * 1024
    }

    fn rx_size(&self) -> usize {
        self.regs[sreg::RX_BUF_SIZE as usize] as usize * 1024
    }

    fn status(&self) -> Status {
        Status::from_raw(self.regs[sreg::STATUS as usize])
    }

    fn set_status(&mut self, status: Status) {
        self.regs[sreg::STATUS as usize] = status.raw();
    }

    fn raise(&mut self, flags: Interrupts) {
        self.regs[sreg::INTERRUPT as usize] |= flags.bits();
    }

    fn tx_free(&self) -> u16 {
        let used = self
            .reg16(sreg::TX_WRITE_PTR)
            .wrapping_sub(self.reg16(sreg::TX_READ_PTR));
        (self.tx_size() as u16).wrapping_sub(used)
    }

    fn rx_received(&self) -> u16 {
        self.reg16(sreg::RX_WRITE_PTR)
            .wrapping_sub(self.rx_committed)
    }

    fn read_reg(&self, address: usize) -> u8 {
        let a = address as u16;
        match a {
            _ if a == sreg::TX_FREE_SIZE || a == sreg::TX_FREE_SIZE + 1 => {
                self.tx_free().to_be_bytes()[(a - sreg::TX_FREE_SIZE) as usize]
            }
            _ if a == sreg::RX_RECEIVED_SIZE || a == sreg::RX_RECEIVED_SIZE + 1 => {
                self.rx_received().to_be_bytes()[(a - sreg::RX_RECEIVED_SIZE) as usize]
            }
            _ => self.regs[address],
        }
    }

    fn write_reg(&mut self, address: usize, value: u8, stall: bool) {
        let a = address as u16;
        match a {
            sreg::COMMAND => {
                if stall {
                    self.regs[address] = value;
                } else {
                    self.execute(value);
                }
            }
            sreg::INTERRUPT => self.regs[address] &= !value,
            sreg::STATUS => {}
            _ if (sreg::TX_FREE_SIZE..sreg::TX_WRITE_PTR).contains(&a) => {}
            _ if (sreg::RX_RECEIVED_SIZE..sreg::RX_READ_PTR).contains(&a) => {}
            _ if a >= sreg::RX_WRITE_PTR => {}
            _ => self.regs[address] = value,
        }
    }

    fn execute(&mut self, opcode: u8) {
        self.commands.push(opcode);
        let status = self.status();
        match opcode {
            op if op == Command::Open as u8 => {
                for pointer in [
                    sreg::TX_READ_PTR,
                    sreg::TX_WRITE_PTR,
                    sreg::RX_READ_PTR,
                    sreg::RX_WRITE_PTR,
                ] {
                    self.set_reg16(pointer, 0);
                }
                self.rx_committed = 0;
                match self.regs[sreg::MODE as usize] & 0x0F {
                    0x01 => self.set_status(Status::Init),
                    0x02 => self.set_status(Status::Udp),
                    _ => {}
                }
            }
            op if op == Command::Listen as u8 && status == Status::Init => {
                self.set_status(Status::Listen);
            }
            op if op == Command::Connect as u8 && status == Status::Init => match self.peer {
                Peer::Accept => {
                    self.set_status(Status::Established);
                    self.raise(Interrupts::CON);
                }
                Peer::Silent => self.set_status(Status::SynSent),
                Peer::Timeout => {
                    self.set_status(Status::Closed);
                    self.raise(Interrupts::TIMEOUT);
                }
                Peer::Reset => {
                    self.set_status(Status::Closed);
                    self.raise(Interrupts::DISCON);
                }
            },
            op if op == Command::Discon as u8 => {
                if !self.ignore_discon {
                    self.set_status(Status::Closed);
                    self.raise(Interrupts::DISCON);
                }
            }
            op if op == Command::Close as u8 => self.set_status(Status::Closed),
            op if op == Command::Send as u8 => match self.delivery {
                Delivery::Ack => {
                    if !self.hold_tx {
                        self.drain_tx();
                    }
                    self.raise(Interrupts::SEND_OK);
                }
                Delivery::Timeout => {
                    self.set_status(Status::Closed);
                    self.raise(Interrupts::TIMEOUT);
                }
                Delivery::Dropped => {
                    self.set_status(Status::Closed);
                    self.raise(Interrupts::DISCON);
                }
            },
            op if op == Command::SendKeep as u8 => self.keepalives += 1,
            op if op == Command::Recv as u8 => {
                self.rx_committed = self.reg16(sreg::RX_READ_PTR);
            }
            _ => {}
        }
    }

    fn drain_tx(&mut self) {
        let start = self.reg16(sreg::TX_READ_PTR);
        let end = self.reg16(sreg::TX_WRITE_PTR);
        let len = end.wrapping_sub(start) as usize;
        let bytes = ring_read(&self.tx[..self.tx_size()], start, len);
        self.set_reg16(sreg::TX_READ_PTR, end);
        if self.echo {
            self.push_rx(&bytes);
        }
        self.sent.extend_from_slice(&bytes);
    }

    fn push_rx(&mut self, data: &[u8]) {
        let size = self.rx_size();
        assert!(
            self.rx_received() as usize + data.len() <= size,
            "receive ring overflow"
        );
        let pointer = self.reg16(sreg::RX_WRITE_PTR);
        ring_write(&mut self.rx[..size], pointer, data);
        self.set_reg16(sreg::RX_WRITE_PTR, pointer.wrapping_add(data.len() as u16));
        self.raise(Interrupts::RECV);
    }

    fn snapshot(&self) -> SocketSnapshot {
        SocketSnapshot {
            regs: self.regs,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            sent: self.sent.clone(),
        }
    }
}

fn ring_read(ring: &[u8], pointer: u16, len: usize) -> Vec<u8> {
    let start = pointer as usize % ring.len();
    (0..len).map(|i| ring[(start + i) % ring.len()]).collect()
}

fn ring_write(ring: &mut [u8], pointer: u16, data: &[u8]) {
    let size = ring.len();
    let start = pointer as usize % size;
    for (i, byte) in data.iter().enumerate() {
        ring[(start + i) % size] = *byte;
    }
}

struct State {
    common: [u8; COMMON_LEN],
    sockets: Vec<SimSocket>,
    version: u8,
    link: bool,
    now_ns: u64,
    transactions: usize,
    writes: usize,
    fail_next: bool,
    stall: bool,
    reset_low: bool,
    hardware_reset: bool,
}

impl State {
    fn new() -> Self {
        let mut state = Self {
            common: [0; COMMON_LEN],
            sockets: Vec::new(),
            version: CHIP_VERSION,
            link: true,
            now_ns: 0,
            transactions: 0,
            writes: 0,
            fail_next: false,
            stall: false,
            reset_low: false,
            hardware_reset: false,
        };
        state.power_on();
        state
    }

    /// Register defaults; the version and the cable survive a reset
    fn power_on(&mut self) {
        self.common = [0; COMMON_LEN];
        self.common[common::RETRY_TIME as usize..common::RETRY_TIME as usize + 2]
            .copy_from_slice(&2000u16.to_be_bytes());
        self.common[common::RETRY_COUNT as usize] = 8;
        if self.sockets.is_empty() {
            self.sockets = (0..MAX_SOCKETS).map(|_| SimSocket::new()).collect();
        }
        for socket in &mut self.sockets {
            socket.reset();
        }
    }

    fn write(&mut self, address: u16, control: u8, data: &[u8]) {
        let address = address as usize;
        let bsb = control >> 3;
        if bsb == 0 {
            for (i, byte) in data.iter().enumerate() {
                let a = address + i;
                assert!(a < COMMON_LEN, "write past common block: {:#06x}", a);
                if a == common::MODE as usize && byte & common::MODE_RESET != 0 {
                    self.power_on();
                } else {
                    self.common[a] = *byte;
                }
            }
            return;
        }

        let stall = self.stall;
        let socket = &mut self.sockets[(bsb >> 2) as usize];
        match bsb & 0x03 {
            1 => {
                for (i, byte) in data.iter().enumerate() {
                    socket.write_reg(address + i, *byte, stall);
                }
            }
            2 => {
                let size = socket.tx_size();
                assert!(
                    address + data.len() <= size,
                    "tx ring overrun: offset {} len {} size {}",
                    address,
                    data.len(),
                    size
                );
                socket.tx[address..address + data.len()].copy_from_slice(data);
            }
            _ => panic!("write to receive buffer"),
        }
    }

    fn read(&mut self, address: u16, control: u8, buf: &mut [u8]) {
        let address = address as usize;
        let bsb = control >> 3;
        if bsb == 0 {
            for (i, byte) in buf.iter_mut().enumerate() {
                let a = address + i;
                *byte = match a as u16 {
                    common::VERSION => self.version,
                    common::PHY_CONFIG => {
                        if self.link {
                            common::PHY_LINK_UP
                        } else {
                            0
                        }
                    }
                    _ => self.common[a],
                };
            }
            return;
        }

        let socket = &mut self.sockets[(bsb >> 2) as usize];
        match bsb & 0x03 {
            1 => {
                // A stalled command stays visible in Sn_CR
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = socket.read_reg(address + i);
                }
                if address == sreg::RX_RECEIVED_SIZE as usize && socket.rx_size_glitches > 0 {
                    // Each glitched read is off by a different amount
                    let moving = socket.rx_received().wrapping_add(socket.rx_size_glitches);
                    socket.rx_size_glitches -= 1;
                    let bytes = moving.to_be_bytes();
                    let len = buf.len().min(2);
                    buf[..len].copy_from_slice(&bytes[..len]);
                }
            }
            3 => {
                let size = socket.rx_size();
                assert!(
                    address + buf.len() <= size,
                    "rx ring overrun: offset {} len {} size {}",
                    address,
                    buf.len(),
                    size
                );
                buf.copy_from_slice(&socket.rx[address..address + buf.len()]);
            }
            _ => panic!("read from transmit buffer"),
        }
    }
}

/// Handle to the simulated chip; clones share state
#[derive(Clone)]
pub(crate) struct SimChip {
    state: Rc<RefCell<State>>,
}

impl SimChip {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::new())),
        }
    }

    /// Driver over this chip, not yet initialised
    pub(crate) fn context(&self) -> TestChip {
        self.context_with(DriverConfig::default())
    }

    pub(crate) fn context_with(&self, driver: DriverConfig) -> TestChip {
        ChipContext::new(
            self.clone(),
            SimPin(self.clone()),
            SimDelay(self.clone()),
            SimClock(self.clone()),
            driver,
        )
    }

    /// Driver initialised with the default network configuration
    pub(crate) fn ready(&self) -> TestChip {
        let mut chip = self.context();
        chip.init(NetworkConfig::default()).unwrap();
        chip
    }

    fn socket<R>(&self, id: SocketId, f: impl FnOnce(&mut SimSocket) -> R) -> R {
        f(&mut self.state.borrow_mut().sockets[id.index()])
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.state.borrow().now_ns / 1_000_000
    }

    /// SPI transactions attempted, failed ones included
    pub(crate) fn transactions(&self) -> usize {
        self.state.borrow().transactions
    }

    /// Successful write frames
    pub(crate) fn write_count(&self) -> usize {
        self.state.borrow().writes
    }

    pub(crate) fn fail_next_transaction(&self) {
        self.state.borrow_mut().fail_next = true;
    }

    pub(crate) fn set_version(&self, version: u8) {
        self.state.borrow_mut().version = version;
    }

    pub(crate) fn set_link(&self, up: bool) {
        self.state.borrow_mut().link = up;
    }

    /// Command register never reads back zero while stalled
    pub(crate) fn stall_commands(&self, stall: bool) {
        self.state.borrow_mut().stall = stall;
    }

    pub(crate) fn was_hardware_reset(&self) -> bool {
        self.state.borrow().hardware_reset
    }

    pub(crate) fn common_bytes(&self, address: u16, len: usize) -> Vec<u8> {
        let a = address as usize;
        self.state.borrow().common[a..a + len].to_vec()
    }

    pub(crate) fn socket_snapshot(&self, id: SocketId) -> SocketSnapshot {
        self.socket(id, |s| s.snapshot())
    }

    /// Transmit ring size in bytes as programmed
    pub(crate) fn buffer_size(&self, id: SocketId) -> u16 {
        self.socket(id, |s| s.tx_size() as u16)
    }

    pub(crate) fn set_protocol(&self, id: SocketId, mode: u8) {
        self.socket(id, |s| s.regs[sreg::MODE as usize] = mode);
    }

    /// Raw socket mode register
    pub(crate) fn protocol(&self, id: SocketId) -> u8 {
        self.socket(id, |s| s.regs[sreg::MODE as usize])
    }

    pub(crate) fn set_peer(&self, id: SocketId, peer: Peer) {
        self.socket(id, |s| s.peer = peer);
    }

    /// Loop every sent byte back into the receive ring
    pub(crate) fn set_echo(&self, id: SocketId, echo: bool) {
        self.socket(id, |s| s.echo = echo);
    }

    /// Keep sent bytes in the transmit ring until [`drain_tx`](Self::drain_tx)
    pub(crate) fn hold_tx(&self, id: SocketId, hold: bool) {
        self.socket(id, |s| s.hold_tx = hold);
    }

    pub(crate) fn drain_tx(&self, id: SocketId) {
        self.socket(id, |s| s.drain_tx());
    }

    /// DISCON is accepted but the peer never finishes the teardown
    pub(crate) fn ignore_discon(&self, id: SocketId, ignore: bool) {
        self.socket(id, |s| s.ignore_discon = ignore);
    }

    pub(crate) fn set_delivery(&self, id: SocketId, delivery: Delivery) {
        self.socket(id, |s| s.delivery = delivery);
    }

    /// The next `reads` reads of RX_RSR each return a different wrong value
    pub(crate) fn glitch_rx_size(&self, id: SocketId, reads: u16) {
        self.socket(id, |s| s.rx_size_glitches = reads);
    }

    /// Bytes the chip put on the wire
    pub(crate) fn sent(&self, id: SocketId) -> Vec<u8> {
        self.socket(id, |s| s.sent.clone())
    }

    /// Opcodes written to the command register, in order
    pub(crate) fn commands(&self, id: SocketId) -> Vec<u8> {
        self.socket(id, |s| s.commands.clone())
    }

    pub(crate) fn keepalives(&self, id: SocketId) -> usize {
        self.socket(id, |s| s.keepalives)
    }

    /// Data arriving from the peer
    pub(crate) fn inject_rx(&self, id: SocketId, data: &[u8]) {
        self.socket(id, |s| s.push_rx(data));
    }

    /// Datagram arriving on a UDP socket, with the chip's 8-byte header
    pub(crate) fn inject_datagram(&self, id: SocketId, from: SocketAddrV4, payload: &[u8]) {
        let mut frame = from.ip().octets().to_vec();
        frame.extend_from_slice(&from.port().to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        self.inject_rx(id, &frame);
    }

    /// Peer sends FIN
    pub(crate) fn peer_close(&self, id: SocketId) {
        self.socket(id, |s| {
            s.set_status(Status::CloseWait);
            s.raise(Interrupts::DISCON);
        });
    }

    /// Peer answers RST; the socket drops straight to CLOSED
    pub(crate) fn peer_reset(&self, id: SocketId) {
        self.socket(id, |s| {
            s.set_status(Status::Closed);
            s.raise(Interrupts::DISCON);
        });
    }

    /// Remote client completes a handshake on a listening socket
    pub(crate) fn remote_connect(&self, id: SocketId, from: SocketAddrV4) {
        self.socket(id, |s| {
            s.regs[sreg::DEST_IP as usize..sreg::DEST_IP as usize + 4]
                .copy_from_slice(&from.ip().octets());
            s.set_reg16(sreg::DEST_PORT, from.port());
            s.set_status(Status::Established);
            s.raise(Interrupts::CON);
        });
    }

    /// Move every ring pointer to `start` with both rings empty
    pub(crate) fn set_pointers(&self, id: SocketId, start: u16) {
        self.socket(id, |s| {
            for pointer in [
                sreg::TX_READ_PTR,
                sreg::TX_WRITE_PTR,
                sreg::RX_READ_PTR,
                sreg::RX_WRITE_PTR,
            ] {
                s.set_reg16(pointer, start);
            }
            s.rx_committed = start;
        });
    }

    /// `len` bytes of the transmit ring starting at ring pointer `start`
    pub(crate) fn tx_contents(&self, id: SocketId, start: u16, len: usize) -> Vec<u8> {
        self.socket(id, |s| ring_read(&s.tx[..s.tx_size()], start, len))
    }

    /// Place `data` in the receive ring at `start` as unread bytes
    pub(crate) fn load_rx(&self, id: SocketId, start: u16, data: &[u8]) {
        self.socket(id, |s| {
            let size = s.rx_size();
            ring_write(&mut s.rx[..size], start, data);
            s.set_reg16(sreg::RX_READ_PTR, start);
            s.set_reg16(sreg::RX_WRITE_PTR, start.wrapping_add(data.len() as u16));
            s.rx_committed = start;
        });
    }

    pub(crate) fn rx_read_pointer(&self, id: SocketId) -> u16 {
        self.socket(id, |s| s.reg16(sreg::RX_READ_PTR))
    }
}

impl spi::ErrorType for SimChip {
    type Error = SimError;
}

impl SpiDevice for SimChip {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        let mut state = self.state.borrow_mut();
        state.transactions += 1;
        if core::mem::take(&mut state.fail_next) {
            return Err(SimError);
        }

        let [Operation::Write(header), data] = operations else {
            panic!("unexpected frame shape");
        };
        assert_eq!(header.len(), 3, "frame header is address + control");
        let address = u16::from_be_bytes([header[0], header[1]]);
        let control = header[2];
        assert_eq!(control & 0x03, 0, "variable length mode only");

        match data {
            Operation::Write(bytes) => {
                assert!(control & 0x04 != 0, "write frame without RWB");
                state.writes += 1;
                state.write(address, control, bytes);
            }
            Operation::Read(buf) => {
                assert!(control & 0x04 == 0, "read frame with RWB");
                state.read(address, control, buf);
            }
            _ => panic!("unexpected data phase"),
        }
        Ok(())
    }
}

/// Reset line; releasing it after a low pulse resets the chip
pub(crate) struct SimPin(SimChip);

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.state.borrow_mut().reset_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.0.state.borrow_mut();
        if core::mem::take(&mut state.reset_low) {
            state.power_on();
            state.hardware_reset = true;
        }
        Ok(())
    }
}

/// Sleeping advances simulated time
pub(crate) struct SimDelay(SimChip);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.state.borrow_mut().now_ns += ns as u64;
    }
}

pub(crate) struct SimClock(SimChip);

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.0.now_ms()
    }
}
