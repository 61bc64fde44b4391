#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod eth;
mod network;

stm32_tim2_monotonic!(Mono, 1_000_000);

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2])]
mod app {
    use super::*;
    use defmt::{info, warn};
    use embassy_stm32::gpio::{Level, Output, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::{Hse, HseMode};
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use iot_core::link::LinkSupervisor;

    use network::{config, Session};

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
    }

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("W5500 link firmware starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6, // 12 MHz / 6 = 2 MHz
            mul: embassy_stm32::rcc::PllMul::MUL168,     // 2 MHz * 168 = 336 MHz (VCO)
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4), // 336 MHz / 4 = 84 MHz (SYSCLK)
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7), // 336 MHz / 7 = 48 MHz
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("System initialized: SYSCLK=84MHz");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        let timer_clock_hz = 84_000_000;
        Mono::start(timer_clock_hz);
        info!("TIM2 monotonic timer initialized at 1 MHz");

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
        };

        heartbeat::spawn().ok();
        link_task::spawn(net_periph).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat task
    ///
    /// Runs above the link task so the LED keeps blinking while a blocking
    /// driver call is in progress.
    #[task(priority = 2, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        info!("Heartbeat task started");
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Link task - keeps the broker connection up and services it
    ///
    /// The W5500 driver is blocking; every driver call is bounded by its own
    /// timeout and the task sleeps between iterations.
    #[task(priority = 1)]
    async fn link_task(_cx: link_task::Context, periph: NetworkPeripherals) -> ! {
        info!("Link task started");

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new_blocking(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            spi_config,
        );
        let cs = Output::new(periph.cs, Level::High, Speed::VeryHigh);
        let reset = Output::new(periph.reset, Level::High, Speed::Low);

        let mut chip = eth::init_w5500(eth::EthPeripherals { spi, cs, reset }, config::driver());
        let mut link = LinkSupervisor::new(config::link(), config::network());
        let mut session = Session::new();

        loop {
            let event = link.poll(&mut chip);
            network::log_event(&event, &link);

            if link.is_connected() {
                if let Err(e) = session.service(&mut chip, link.config().socket) {
                    warn!("Broker session error: {}", e);
                }
            } else {
                session.reset();
            }

            Mono::delay(config::LOOP_PERIOD_MS.millis()).await;
        }
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        info!("Idle task started - entering WFI loop");
        loop {
            cortex_m::asm::wfi();
        }
    }
}
