//! Control core for a solar-powered, motor-actuated water valve.
//!
//! # Overview
//!
//! The valve runs from a battery charged by a photovoltaic panel through an
//! interleaved buck converter. Three engines make up the control core:
//!
//! - [`charge`] - multi-stage battery charger wrapping a Perturb & Observe
//!   maximum power point tracker
//! - [`valve`] - valve motion state machine with soft start, dual stall
//!   detection and timeout protection
//! - [`telemetry`] - CRC checked, register mapped request/response handler
//!   for the RS-485 field bus
//!
//! [`flow`] adds leak and burst protection on top of the ultrasonic flow
//! meter, and [`system`] ties everything into the cooperative loop body the
//! firmware binary runs.
//!
//! # Hardware Seam
//!
//! Every engine is generic over narrow driver traits ([`power::PowerStage`],
//! [`sensing::AnalogFrontEnd`], [`motor::MotorDrive`], [`flow::FlowMeter`])
//! and over `embedded-io` for the serial transport. The library never touches
//! a peripheral register, so the whole core runs under `cargo test` on the
//! host.
//!
//! # Module Organization
//!
//! - [`time`] - wrapping millisecond instants and the system tick counter
//! - [`config`] - thresholds and cadences for every engine
//! - [`error`] - error types
//! - [`crc`] - Modbus CRC16
//! - [`power`] - buck converter power stage
//! - [`sensing`] - ADC scaling and measurement snapshot
//! - [`motor`] - H-bridge motor driver and encoder counter
//! - [`booster`] - ultrasonic transducer multiplexer around each flow measurement
//! - [`registers`] - telemetry register map
//! - [`serial`] - receive byte queue shared with the UART producer

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod booster;
pub mod charge;
pub mod config;
pub mod crc;
pub mod error;
pub mod flow;
pub mod motor;
pub mod power;
pub mod registers;
pub mod sensing;
pub mod serial;
pub mod system;
pub mod telemetry;
pub mod time;
pub mod valve;

#[cfg(test)]
mod mock;
