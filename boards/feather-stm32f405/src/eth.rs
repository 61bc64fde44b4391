#![deny(unsafe_code)]
#![deny(warnings)]
//! Ethernet hardware layer module
//!
//! Puts the W5500 behind a blocking `SpiDevice` on SPI2 and hands bus,
//! reset line, delay and clock to the driver.

use core::cell::RefCell;

use defmt::info;
use embassy_embedded_hal::shared_bus::blocking::spi::SpiDevice;
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Delay;
use iot_core::w5500::{ChipContext, DriverConfig};
use static_cell::StaticCell;

use crate::network::EmbassyClock;

type SpiBus = Spi<'static, Blocking>;
type SpiBusMutex = Mutex<CriticalSectionRawMutex, RefCell<SpiBus>>;

/// Chip-select framed SPI device for the W5500
pub type W5500Spi = SpiDevice<'static, CriticalSectionRawMutex, SpiBus, Output<'static>>;

/// The driver as wired on this board
pub type W5500 = ChipContext<W5500Spi, Output<'static>, Delay, EmbassyClock>;

/// Ethernet peripherals bundle
pub struct EthPeripherals {
    pub spi: SpiBus,
    pub cs: Output<'static>,
    pub reset: Output<'static>,
}

/// Build the driver
///
/// No bus traffic happens here; the link supervisor resets and configures
/// the chip on its first poll.
pub fn init_w5500(periph: EthPeripherals, driver: DriverConfig) -> W5500 {
    let EthPeripherals { spi, cs, reset } = periph;

    static SPI_BUS: StaticCell<SpiBusMutex> = StaticCell::new();
    let spi_bus = SPI_BUS.init(Mutex::new(RefCell::new(spi)));
    let spi_device = SpiDevice::new(spi_bus, cs);

    info!(
        "W5500 driver ready: poll {} ms, command timeout {} ms",
        driver.poll_interval_ms, driver.command_timeout_ms
    );
    ChipContext::new(spi_device, reset, Delay, EmbassyClock, driver)
}
