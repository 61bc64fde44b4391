#![deny(unsafe_code)]
#![deny(warnings)]
//! Network module
//!
//! - **`config`**: board addressing, broker endpoint and loop timing
//! - **`EmbassyClock`**: driver clock backed by the embassy time driver
//! - **`Session`**: work done on an established broker connection
//! - **`log_event`**: defmt rendering of link supervisor events

pub mod config;

use core::fmt::Write as _;

use defmt::{error, info, warn};
use embassy_time::Instant;
use embedded_io::Write as _;
use hal_abstractions::Clock;
use heapless::String;
use iot_core::link::{LinkEvent, LinkSupervisor};
use iot_core::w5500::{Error, SocketId, TcpStream};

use crate::eth::W5500;

/// Monotonic milliseconds since boot
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

/// Log one supervisor step
pub fn log_event(event: &LinkEvent, link: &LinkSupervisor) {
    let remote = link.config().remote.octets();
    match event {
        LinkEvent::Idle => {}
        LinkEvent::NetworkUp => info!("W5500 reset and configured"),
        LinkEvent::InitFailed(e) => error!("W5500 bring-up failed: {}", e),
        LinkEvent::LinkDown => warn!("Ethernet link down"),
        LinkEvent::Connected => info!(
            "Connected to broker {}.{}.{}.{}:{}",
            remote[0],
            remote[1],
            remote[2],
            remote[3],
            link.config().port
        ),
        LinkEvent::ConnectFailed { error, failures } => warn!(
            "Couldn't connect to broker {}.{}.{}.{} ({}), failure {}",
            remote[0], remote[1], remote[2], remote[3], error, failures
        ),
        LinkEvent::GaveUp => warn!("Too many connection failures, resetting W5500"),
        LinkEvent::Draining { pending } => {
            info!("Broker closed the connection, {} bytes left to read", pending)
        }
        LinkEvent::ConnectionLost => warn!("Broker connection lost"),
        LinkEvent::CloseFailed(e) => error!("Socket would not close: {}, resetting W5500", e),
        LinkEvent::Fault(e) => error!("SPI fault: {}, resetting W5500", e),
    }
}

/// Work done while the broker connection is up
pub struct Session {
    next_report_secs: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self { next_report_secs: 0 }
    }

    /// Forget the report schedule after a reconnect
    pub fn reset(&mut self) {
        self.next_report_secs = 0;
    }

    /// Drain received bytes and write the uptime line when it is due
    ///
    /// Never blocks on reads. Once the broker has closed and everything is
    /// read, nothing more is written; the supervisor closes the socket on its
    /// next poll.
    pub fn service(&mut self, chip: &mut W5500, id: SocketId) -> Result<(), Error> {
        let mut stream = TcpStream::new(chip, id).with_timeouts(0, 1_000);

        let mut buf = [0u8; 128];
        loop {
            match stream.read_timeout(&mut buf, 0) {
                Ok(0) => return Ok(()),
                Ok(n) => info!("Received {} bytes: {:x}", n, &buf[..n]),
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            }
        }

        let uptime_secs = Instant::now().as_secs();
        if uptime_secs >= self.next_report_secs {
            let mut line: String<32> = String::new();
            // 32 bytes always fits "uptime " and a u64
            let _ = writeln!(line, "uptime {}", uptime_secs);
            stream.write_all(line.as_bytes())?;
            self.next_report_secs = uptime_secs + config::UPTIME_PERIOD_SECS;
        }
        Ok(())
    }
}
