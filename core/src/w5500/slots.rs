//! Socket slot table
//!
//! Eight fixed slots, one per hardware socket. A slot is handed to exactly
//! one logical connection at a time and goes back to the pool when the
//! socket is closed.

use heapless::Vec;

use super::config::BufferSize;
use super::error::Error;
use super::registers::{Protocol, Status, MAX_SOCKETS};

/// First port of the IANA dynamic range
const EPHEMERAL_PORT_START: u16 = 49152;

/// Hardware socket number in `0..8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketId(u8);

impl SocketId {
    /// Socket 0
    pub const FIRST: SocketId = SocketId(0);

    pub const fn new(raw: u8) -> Option<Self> {
        if (raw as usize) < MAX_SOCKETS {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// All socket ids in ascending order
    pub fn all() -> impl Iterator<Item = SocketId> {
        (0..MAX_SOCKETS as u8).map(SocketId)
    }
}

impl TryFrom<u8> for SocketId {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        SocketId::new(raw).ok_or(Error::InvalidSocket(raw))
    }
}

/// Driver-side bookkeeping for one hardware socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketSlot {
    /// Protocol the socket was opened with (`Closed` when not open)
    pub protocol: Protocol,
    /// Last status read from the chip
    pub status: Status,
    /// Local port assigned at open
    pub local_port: u16,
    /// Last transmit free-size reading
    pub tx_free: u16,
    /// Last received-size reading
    pub rx_received: u16,
    /// Transmit ring size in bytes
    pub tx_size: u16,
    /// Receive ring size in bytes
    pub rx_size: u16,
    allocated: bool,
}

impl SocketSlot {
    const fn new(buffer: BufferSize) -> Self {
        Self {
            protocol: Protocol::Closed,
            status: Status::Closed,
            local_port: 0,
            tx_free: 0,
            rx_received: 0,
            tx_size: buffer.bytes(),
            rx_size: buffer.bytes(),
            allocated: false,
        }
    }

    /// Slot is reserved by a caller
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Slot carries an open TCP or UDP socket
    pub fn is_open(&self) -> bool {
        self.protocol != Protocol::Closed
    }
}

/// Fixed table of the eight socket slots
#[derive(Debug, Clone)]
pub struct SocketTable {
    slots: [SocketSlot; MAX_SOCKETS],
    next_port: u16,
}

impl SocketTable {
    pub fn new(buffers: &[BufferSize; MAX_SOCKETS]) -> Self {
        let mut slots = [SocketSlot::new(BufferSize::default()); MAX_SOCKETS];
        for (slot, size) in slots.iter_mut().zip(buffers.iter()) {
            *slot = SocketSlot::new(*size);
        }
        Self {
            slots,
            next_port: EPHEMERAL_PORT_START,
        }
    }

    pub fn slot(&self, id: SocketId) -> &SocketSlot {
        &self.slots[id.index()]
    }

    pub fn slot_mut(&mut self, id: SocketId) -> &mut SocketSlot {
        &mut self.slots[id.index()]
    }

    /// Reserve the lowest free slot
    ///
    /// # Errors
    ///
    /// Returns `Error::NoFreeSocket` when all eight slots are taken.
    pub fn allocate(&mut self) -> Result<SocketId, Error> {
        let id = SocketId::all()
            .find(|id| !self.slot(*id).allocated)
            .ok_or(Error::NoFreeSocket)?;
        self.slots[id.index()].allocated = true;
        Ok(id)
    }

    /// Reserve a specific slot for a new connection
    ///
    /// A slot reserved through [`allocate`](Self::allocate) but not yet opened
    /// may be claimed by its owner.
    ///
    /// # Errors
    ///
    /// Returns `Error::SocketInUse` if the slot already carries an open socket.
    pub fn claim(&mut self, id: SocketId) -> Result<(), Error> {
        let slot = self.slot_mut(id);
        if slot.is_open() {
            return Err(Error::SocketInUse(id));
        }
        slot.allocated = true;
        Ok(())
    }

    /// Mark a slot as opened with `protocol` on `local_port`
    pub fn mark_open(&mut self, id: SocketId, protocol: Protocol, local_port: u16) {
        let slot = self.slot_mut(id);
        slot.allocated = true;
        slot.protocol = protocol;
        slot.local_port = local_port;
    }

    /// Return a slot to the pool
    pub fn release(&mut self, id: SocketId) {
        let slot = self.slot_mut(id);
        slot.allocated = false;
        slot.protocol = Protocol::Closed;
        slot.status = Status::Closed;
        slot.local_port = 0;
        slot.tx_free = 0;
        slot.rx_received = 0;
    }

    /// Release every slot, keeping the buffer layout
    pub fn reset(&mut self) {
        for id in SocketId::all() {
            self.release(id);
        }
    }

    /// Ids of slots that are currently reserved
    pub fn in_use(&self) -> Vec<SocketId, MAX_SOCKETS> {
        let mut ids = Vec::new();
        for id in SocketId::all().filter(|id| self.slot(*id).allocated) {
            // Capacity equals the slot count
            let _ = ids.push(id);
        }
        ids
    }

    /// Next local port from the dynamic range not held by an open slot
    pub fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_port;
            self.next_port = match self.next_port.checked_add(1) {
                Some(next) => next,
                None => EPHEMERAL_PORT_START,
            };
            let taken = self
                .slots
                .iter()
                .any(|slot| slot.is_open() && slot.local_port == port);
            if !taken {
                return port;
            }
        }
    }
}
