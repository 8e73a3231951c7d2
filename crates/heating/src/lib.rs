//! Thermostat sections for a heating controller.
//!
//! Each section switches one heating relay. Its setpoint comes from the bus
//! and survives a power loss; its temperature comes from a remote sensor on
//! the bus, addressed by the sensor's id. A section heats while the room is
//! below the setpoint and stops once it reaches `setpoint + hysteresis`. In
//! between it keeps doing whatever it did. A section that has never heard
//! from its sensor does not heat.
//!
//! Temperatures are in tenths of a degree Celsius throughout.

#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt::Debug;

use embedded_storage::Storage;
use serde::{Deserialize, Serialize};

/// Setpoints at or above this (100 °C) are not believed when loaded. An
/// erased cell reads back as `0xFFFF` and falls in that range.
pub const MAX_SETPOINT: i16 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no heating section for sensor {0}")]
    UnknownSection(u8),
    #[error("setpoint {0} is out of range")]
    InvalidSetpoint(i16),
    #[error("too many sections")]
    TooManySections,
    #[error("storage access failed")]
    Storage,
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeatingConfig {
    /// Where the first section's setpoint is stored. Each takes two bytes.
    pub base_address: u32,
    pub default_setpoint: i16,
    pub hysteresis: u16,
}

impl Default for HeatingConfig {
    fn default() -> Self {
        HeatingConfig {
            base_address: 600,
            default_setpoint: 200,
            hysteresis: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Section {
    sensor: u8,
    setpoint: i16,
    temperature: Option<i16>,
    heating: bool,
}

impl Section {
    /// Id of the remote sensor that reports this section's temperature.
    pub fn sensor(&self) -> u8 {
        self.sensor
    }

    pub fn setpoint(&self) -> i16 {
        self.setpoint
    }

    pub fn temperature(&self) -> Option<i16> {
        self.temperature
    }

    pub fn is_heating(&self) -> bool {
        self.heating
    }

    fn wants_heat(&self, hysteresis: u16) -> bool {
        let Some(t) = self.temperature else {
            return false;
        };
        if t < self.setpoint {
            true
        } else if i32::from(t) >= i32::from(self.setpoint) + i32::from(hysteresis) {
            false
        } else {
            self.heating
        }
    }
}

/// A relay that has to change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    pub sensor: u8,
    pub heating: bool,
}

pub type Changes<const N: usize> = heapless::Vec<Change, N>;

/// Up to `N` sections sharing one hysteresis and one master switch.
pub struct Thermostat<S, const N: usize> {
    storage: S,
    config: HeatingConfig,
    sections: heapless::Vec<Section, N>,
    enabled: bool,
}

impl<S, const N: usize> Thermostat<S, N>
where
    S: Storage,
    S::Error: Debug,
{
    /// Sets up one section per entry of `sensors`, loading their setpoints.
    /// Starts enabled, with no section heating.
    pub fn new(mut storage: S, config: HeatingConfig, sensors: &[u8]) -> Result<Self> {
        let mut sections = heapless::Vec::new();
        for (index, &sensor) in sensors.iter().enumerate() {
            let stored = read_setpoint(&mut storage, address(&config, index))?;
            let setpoint = match stored {
                Some(sp) => sp,
                None => {
                    log::info!("section {sensor}: no setpoint stored, using the default");
                    config.default_setpoint
                }
            };
            sections
                .push(Section {
                    sensor,
                    setpoint,
                    temperature: None,
                    heating: false,
                })
                .map_err(|_| Error::TooManySections)?;
        }
        Ok(Thermostat {
            storage,
            config,
            sections,
            enabled: true,
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, sensor: u8) -> Option<&Section> {
        self.sections.iter().find(|s| s.sensor == sensor)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn hysteresis(&self) -> u16 {
        self.config.hysteresis
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// A reading from a remote sensor. Readings from sensors that no
    /// section listens to are ignored.
    pub fn report_temperature(&mut self, sensor: u8, temperature: i16) -> Changes<N> {
        match self.sections.iter_mut().find(|s| s.sensor == sensor) {
            Some(section) => section.temperature = Some(temperature),
            None => log::debug!("no section listens to sensor {sensor}"),
        }
        self.evaluate()
    }

    /// Changes a section's setpoint and stores it.
    pub fn set_setpoint(&mut self, sensor: u8, setpoint: i16) -> Result<Changes<N>> {
        if !(0..MAX_SETPOINT).contains(&setpoint) {
            return Err(Error::InvalidSetpoint(setpoint));
        }
        let index = self
            .sections
            .iter()
            .position(|s| s.sensor == sensor)
            .ok_or(Error::UnknownSection(sensor))?;
        let offset = address(&self.config, index);
        self.storage
            .write(offset, &(setpoint as u16).to_le_bytes())
            .map_err(|e| {
                log::error!("failed to store setpoint at {offset}: {e:?}");
                Error::Storage
            })?;
        self.sections[index].setpoint = setpoint;
        log::info!("section {sensor}: setpoint {setpoint}");
        Ok(self.evaluate())
    }

    pub fn set_hysteresis(&mut self, hysteresis: u16) -> Changes<N> {
        self.config.hysteresis = hysteresis;
        self.evaluate()
    }

    /// The master switch. While off, no section heats.
    pub fn set_enabled(&mut self, enabled: bool) -> Changes<N> {
        self.enabled = enabled;
        self.evaluate()
    }

    fn evaluate(&mut self) -> Changes<N> {
        let mut changes = Changes::new();
        for section in self.sections.iter_mut() {
            let heating = self.enabled && section.wants_heat(self.config.hysteresis);
            if heating != section.heating {
                section.heating = heating;
                log::debug!("section {}: heating {heating}", section.sensor);
                // At most one change per section.
                let _ = changes.push(Change {
                    sensor: section.sensor,
                    heating,
                });
            }
        }
        changes
    }
}

fn address(config: &HeatingConfig, index: usize) -> u32 {
    config.base_address + 2 * index as u32
}

fn read_setpoint<S>(storage: &mut S, offset: u32) -> Result<Option<i16>>
where
    S: Storage,
    S::Error: Debug,
{
    let mut buf = [0u8; 2];
    storage.read(offset, &mut buf).map_err(|e| {
        log::error!("failed to read setpoint at {offset}: {e:?}");
        Error::Storage
    })?;
    let raw = u16::from_le_bytes(buf);
    Ok((raw < MAX_SETPOINT as u16).then_some(raw as i16))
}
