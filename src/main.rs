//! Firmware for the solar-powered smart water valve.
//!
//! # Overview
//!
//! The board charges its battery from a photovoltaic panel, drives a motorized
//! valve and answers a Modbus style RS-485 field bus. All control logic lives
//! in the `smart_valve` library; this binary wires it to the STM32G071 and
//! runs it.
//!
//! # Tasks
//!
//! - **main**: the cooperative control loop, one [`SmartValve::run_once`] per
//!   iteration, yielding to the executor in between
//! - **tick_task**: 1 ms system tick feeding the control loop's clock
//! - **uart_rx_task**: moves received field bus bytes into the frame queue
//! - **encoder_task**: counts valve encoder edges
//! - **heartbeat_task**: toggles the LED after every flow check
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings and peripheral initialization

#![no_std]
#![no_main]

mod hardware;

use embassy_executor::Spawner;
use embassy_futures::yield_now;
use embassy_stm32::Config;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Output;
use embassy_stm32::usart::BufferedUartRx;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Ticker};
use embedded_io_async::Read;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use smart_valve::charge::ChargeController;
use smart_valve::config::{ChargeConfig, FlowConfig, ScheduleConfig, TelemetryConfig, ValveConfig};
use smart_valve::flow::FlowGuard;
use smart_valve::motor::EncoderCounter;
use smart_valve::sensing::LoadCurrentTap;
use smart_valve::serial::{self, RxProducer, RxQueue};
use smart_valve::system::{Controllers, SmartValve};
use smart_valve::telemetry::Telemetry;
use smart_valve::time::SystemClock;
use smart_valve::valve::ValveController;

use hardware::Peripherals;

/// Millisecond clock read by the control loop.
static CLOCK: SystemClock = SystemClock::new();

/// Valve encoder pulses, counted by [`encoder_task`].
static ENCODER: EncoderCounter = EncoderCounter::new();

/// Load current sample shared by the charger and the valve stall detector.
static LOAD_CURRENT: LoadCurrentTap = LoadCurrentTap::new();

/// Field bus receive queue.
static RX_QUEUE: StaticCell<RxQueue> = StaticCell::new();

/// Raised by the control loop after each flow check.
static HEARTBEAT: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Creates the clock configuration: 64 MHz system clock from HSI16 via the
/// PLL.
///
/// In debug mode the core runs at 16 MHz straight from HSI16, which keeps
/// stepping through the control loop responsive on the probe.
fn create_clock_config() -> embassy_stm32::rcc::Config {
    use embassy_stm32::rcc::*;

    let mut rcc = embassy_stm32::rcc::Config::default();
    rcc.hsi = Some(Hsi {
        sys_div: HsiSysDiv::DIV1,
    });
    #[cfg(not(feature = "debug-mode"))]
    {
        rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV1,
            mul: PllMul::MUL16,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV4),
        });
        rcc.sys = Sysclk::PLL1_R;
    }
    #[cfg(feature = "debug-mode")]
    {
        rcc.sys = Sysclk::HSI;
    }
    rcc
}

/// Main entry point for the smart valve firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks
/// 2. Bring every board peripheral up in its safe state
/// 3. Build the charger, valve, flow guard and field bus engines
/// 4. Enable automatic charging
/// 5. Spawn the tick, UART receive, encoder and heartbeat tasks
/// 6. Enter the control loop
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_clock_config();

    let p = embassy_stm32::init(config);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Smart valve firmware starting...");

    #[cfg(feature = "debug-mode")]
    defmt::info!("Initializing peripherals...");

    let Peripherals {
        front_end,
        stage,
        motor,
        encoder,
        meter,
        uart_tx,
        uart_rx,
        led,
    } = Peripherals::new(p, &ENCODER, &LOAD_CURRENT);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Initializing controllers...");

    let (rx_producer, rx_frames) = serial::split(RX_QUEUE.init(RxQueue::new()));

    let mut charger = ChargeController::new(ChargeConfig::DEFAULT, front_end, stage);
    charger.enable();
    let controllers = Controllers {
        charger,
        valve: ValveController::new(ValveConfig::DEFAULT, motor),
        flow: FlowGuard::new(FlowConfig::DEFAULT, meter),
    };
    let telemetry = Telemetry::new(TelemetryConfig::DEFAULT, rx_frames, uart_tx);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Spawning tasks...");

    spawner.spawn(tick_task()).unwrap();
    spawner.spawn(uart_rx_task(uart_rx, rx_producer)).unwrap();
    spawner.spawn(encoder_task(encoder)).unwrap();
    spawner.spawn(heartbeat_task(led)).unwrap();

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering control loop...");

    let mut device = SmartValve::new(ScheduleConfig::DEFAULT, controllers, telemetry, CLOCK.now());
    loop {
        let pass = device.run_once(CLOCK.now());
        if pass.flow.is_some() {
            HEARTBEAT.signal(());
        }
        yield_now().await;
    }
}

/// Advances [`CLOCK`] once per millisecond.
#[embassy_executor::task]
async fn tick_task() {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        ticker.next().await;
        CLOCK.tick();
    }
}

/// Feeds received field bus bytes into the frame queue.
///
/// Bytes arriving while the queue is full are dropped; the bus master
/// retries on timeout.
#[embassy_executor::task]
async fn uart_rx_task(mut uart: BufferedUartRx<'static>, mut queue: RxProducer<'static>) {
    let mut buf = [0u8; serial::RX_CAPACITY];
    loop {
        match uart.read(&mut buf).await {
            Ok(len) => {
                let dropped = queue.extend(&buf[..len]);
                if dropped > 0 {
                    defmt::warn!("uart: receive queue full, dropped {} bytes", dropped);
                }
            }
            Err(err) => defmt::warn!("uart: {}", err),
        }
    }
}

/// Counts falling edges on the valve encoder line.
#[embassy_executor::task]
async fn encoder_task(mut pin: ExtiInput<'static>) {
    loop {
        pin.wait_for_falling_edge().await;
        ENCODER.pulse();
    }
}

/// Toggles the heartbeat LED each time the control loop signals.
#[embassy_executor::task]
async fn heartbeat_task(mut led: Output<'static>) {
    loop {
        HEARTBEAT.wait().await;
        led.toggle();
    }
}
