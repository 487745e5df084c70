//! Board pin map and peripheral construction.
//!
//! # Pin Assignments (STM32G071RB)
//!
//! ## Charger sense (ADC1, 2.5 V reference on VREF+)
//! - **PA0**: PV_V - panel voltage divider (IN0)
//! - **PA1**: BATT_V - battery voltage divider (IN1)
//! - **PA4**: PV_I - panel current amplifier (IN4)
//! - **PA6**: BATT_I - battery current amplifier (IN6)
//! - **PA7**: LOAD_I - load/motor current amplifier (IN7)
//!
//! ## Buck converter (TIM1)
//! - **PA8**: PW_1 - phase 1 (TIM1_CH1)
//! - **PA9**: PW_2 - phase 2 (TIM1_CH2)
//! - **PB5**: P_EN - panel MOSFET gate enable
//! - **PB6**: L_EN - load rail enable
//!
//! ## Valve motor
//! - **PC6**: MOTOR_PWM - speed (TIM3_CH1)
//! - **PB7**: MOTOR_PWR - main motor supply
//! - **PB8**: MOTOR_EN - driver logic enable
//! - **PB9**: MOTOR_DIR - high opens
//! - **PC7**: MOTOR_BRAKE - high brakes
//! - **PC8**: MOTOR_FAULT - driver fault, active high, pulled up
//! - **PB4**: MOTOR_ENC - encoder, falling edge (EXTI4)
//!
//! ## Field bus (USART2, RS-485, 9600 8N1)
//! - **PA2**: RS485_TX
//! - **PA3**: RS485_RX
//! - **PB1**: RS485_DE - driver enable, high while transmitting
//!
//! ## Flow meter booster
//! - **PC0..PC3**: MUX_S1..MUX_S4 - transducer multiplexer
//! - **PC4, PC5**: PD1, PD2 - op-amp power downs
//!
//! ## Status
//! - **PA5**: LED - heartbeat

use embassy_stm32::adc::{Adc, AdcChannel, AnyAdcChannel, SampleTime};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::peripherals::{ADC1, TIM1, TIM3};
use embassy_stm32::time::{Hertz, khz};
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::usart::{self, BufferedUart, BufferedUartRx, BufferedUartTx};
use embassy_stm32::{bind_interrupts, peripherals};
use static_cell::StaticCell;

use smart_valve::booster::{BoostedMeter, Booster};
use smart_valve::flow::FlowMeter;
use smart_valve::motor::{EncoderCounter, HBridgeMotor};
use smart_valve::power::BuckConverter;
use smart_valve::sensing::{AnalogFrontEnd, LoadCurrentTap, Measurements, RawSamples};
use smart_valve::serial::Rs485Tx;

bind_interrupts!(struct Irqs {
    USART2 => usart::BufferedInterruptHandler<peripherals::USART2>;
});

/// Buck converter switching frequency.
const BUCK_FREQUENCY: Hertz = khz(100);

/// Valve motor PWM frequency.
const MOTOR_FREQUENCY: Hertz = khz(20);

/// Field bus baud rate.
const BAUD_RATE: u32 = 9600;

static UART_TX_BUF: StaticCell<[u8; 32]> = StaticCell::new();
static UART_RX_BUF: StaticCell<[u8; 32]> = StaticCell::new();

pub type BoardStage = BuckConverter<SimplePwm<'static, TIM1>, Output<'static>, Output<'static>>;

pub type BoardMotor = HBridgeMotor<
    'static,
    Output<'static>,
    Input<'static>,
    SimplePwm<'static, TIM3>,
    &'static LoadCurrentTap,
>;

pub type BoardMeter = BoostedMeter<Output<'static>, TransitTime>;

pub type BoardTx = Rs485Tx<BufferedUartTx<'static>, Output<'static>>;

/// Charger measurements from five single-ended ADC channels.
///
/// Each call runs the full sequence and publishes the load current sample for
/// the valve's stall detector.
pub struct AdcFrontEnd {
    adc: Adc<'static, ADC1>,
    pv_voltage: AnyAdcChannel<ADC1>,
    battery_voltage: AnyAdcChannel<ADC1>,
    pv_current: AnyAdcChannel<ADC1>,
    battery_current: AnyAdcChannel<ADC1>,
    load_current: AnyAdcChannel<ADC1>,
    load_tap: &'static LoadCurrentTap,
}

impl AnalogFrontEnd for AdcFrontEnd {
    fn measure(&mut self) -> Measurements {
        let raw = RawSamples {
            pv_voltage: self.adc.blocking_read(&mut self.pv_voltage),
            battery_voltage: self.adc.blocking_read(&mut self.battery_voltage),
            pv_current: self.adc.blocking_read(&mut self.pv_current),
            battery_current: self.adc.blocking_read(&mut self.battery_current),
            load_current: self.adc.blocking_read(&mut self.load_current),
        };
        self.load_tap.publish(raw.load_current);
        raw.scale()
    }
}

/// Transit time flow computation.
///
/// No capture driver is linked on this board build: every measurement fails
/// and the meter reports itself disconnected, so [`FlowGuard`] warns at boot
/// that leak and burst protection is inactive.
///
/// [`FlowGuard`]: smart_valve::flow::FlowGuard
pub struct TransitTime;

impl FlowMeter for TransitTime {
    fn measure_lph(&mut self) -> Option<f32> {
        None
    }

    fn is_connected(&self) -> bool {
        false
    }
}

/// Top-level peripheral container for the smart valve board.
pub struct Peripherals {
    /// Charger ADC sequence
    pub front_end: AdcFrontEnd,
    /// Interleaved buck converter
    pub stage: BoardStage,
    /// Valve H-bridge
    pub motor: BoardMotor,
    /// Encoder edge input, serviced by its own task
    pub encoder: ExtiInput<'static>,
    /// Ultrasonic flow meter behind the booster. Reports disconnected until
    /// a transit time capture driver is linked, leaving leak and burst
    /// protection inactive.
    pub meter: BoardMeter,
    /// Field bus transmitter
    pub uart_tx: BoardTx,
    /// Field bus receiver, serviced by its own task
    pub uart_rx: BufferedUartRx<'static>,
    /// Heartbeat LED
    pub led: Output<'static>,
}

impl Peripherals {
    /// Initializes every board peripheral in its safe state: both charger
    /// rails off, motor unpowered and braked, booster asleep, RS-485 driver
    /// released.
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    /// * `encoder_count` - pulse counter the encoder task increments
    /// * `load_tap` - shared load current sample
    pub fn new(
        p: embassy_stm32::Peripherals,
        encoder_count: &'static EncoderCounter,
        load_tap: &'static LoadCurrentTap,
    ) -> Self {
        let mut adc = Adc::new(p.ADC1);
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let front_end = AdcFrontEnd {
            adc,
            pv_voltage: p.PA0.degrade_adc(),
            battery_voltage: p.PA1.degrade_adc(),
            pv_current: p.PA4.degrade_adc(),
            battery_current: p.PA6.degrade_adc(),
            load_current: p.PA7.degrade_adc(),
            load_tap,
        };

        let buck_pwm = SimplePwm::new(
            p.TIM1,
            Some(PwmPin::new(p.PA8, OutputType::PushPull)),
            Some(PwmPin::new(p.PA9, OutputType::PushPull)),
            None,
            None,
            BUCK_FREQUENCY,
            CountingMode::CenterAlignedBothInterrupts,
        );
        let stage = BuckConverter::new(
            buck_pwm,
            Channel::Ch1,
            Channel::Ch2,
            Output::new(p.PB5, Level::Low, Speed::Low),
            Output::new(p.PB6, Level::Low, Speed::Low),
        );

        let motor_pwm = SimplePwm::new(
            p.TIM3,
            Some(PwmPin::new(p.PC6, OutputType::PushPull)),
            None,
            None,
            None,
            MOTOR_FREQUENCY,
            CountingMode::EdgeAlignedUp,
        );
        let motor = HBridgeMotor::new(
            Output::new(p.PB7, Level::Low, Speed::Low),
            Output::new(p.PB8, Level::Low, Speed::Low),
            Output::new(p.PB9, Level::Low, Speed::Low),
            Output::new(p.PC7, Level::High, Speed::Low),
            Input::new(p.PC8, Pull::Up),
            motor_pwm,
            Channel::Ch1,
            encoder_count,
            load_tap,
        );
        let encoder = ExtiInput::new(p.PB4, p.EXTI4, Pull::Up);

        let booster = Booster::new([
            Output::new(p.PC0, Level::Low, Speed::Low),
            Output::new(p.PC1, Level::Low, Speed::Low),
            Output::new(p.PC2, Level::Low, Speed::Low),
            Output::new(p.PC3, Level::Low, Speed::Low),
            Output::new(p.PC4, Level::Low, Speed::Low),
            Output::new(p.PC5, Level::Low, Speed::Low),
        ]);
        let meter = BoostedMeter::new(booster, TransitTime);

        let mut uart_config = usart::Config::default();
        uart_config.baudrate = BAUD_RATE;
        let uart = BufferedUart::new(
            p.USART2,
            p.PA3,
            p.PA2,
            UART_TX_BUF.init([0; 32]),
            UART_RX_BUF.init([0; 32]),
            Irqs,
            uart_config,
        )
        .unwrap();
        let (tx, uart_rx) = uart.split();
        let uart_tx = Rs485Tx::new(tx, Output::new(p.PB1, Level::Low, Speed::Medium));

        Self {
            front_end,
            stage,
            motor,
            encoder,
            meter,
            uart_tx,
            uart_rx,
            led: Output::new(p.PA5, Level::Low, Speed::Low),
        }
    }
}
