//! Position control for a roller shutter driven by two relays.
//!
//! The motor has no position feedback, so the position is estimated by dead
//! reckoning: full-travel times are learned once (either entered by hand or
//! measured with a current sensor, see [`calibration`]), and every movement's
//! duration is turned into a change of position in percent, 0 being fully up
//! and 100 fully down. Travel times and the last position are kept in a
//! byte-addressed store so that they survive a power loss.
//!
//! [`Shutter`] makes the decisions and drives the relays; [`ShutterDriver`]
//! wraps it in a non-blocking loop that times the movements.
//!
//! This crate supports `no_std`. Hardware is reached through `embedded-hal`
//! pins and delays, `embedded-storage` and the [`CurrentSensor`] trait.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod calibration;
mod config;
mod controller;
mod driver;
mod error;
pub mod sensor;
pub mod store;

#[cfg(test)]
mod mock;

pub use config::{Config, ConfigBuilder, RelayPolarity};
pub use controller::{Direction, Directive, Move, Shutter, ShutterState};
pub use driver::{Event, Events, Request, ShutterDriver};
pub use error::{Error, Result};
pub use gowired_time::Millis;
pub use sensor::{is_overloaded, power_watts, AcsParams, AcsSensor, CurrentSensor};
pub use store::{CalibrationData, CalibrationStore, Layout, RamStorage, TravelTimes, UNSET};
