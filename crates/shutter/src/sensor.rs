//! Motor current measurement.
//!
//! The only thing the controller needs from a current sensor is "is the
//! motor still pulling current", and only while auto-calibrating. Readings
//! are requested with [`CurrentSensor::measure`], which is allowed to answer
//! `WouldBlock` while it is still collecting samples.

use core::marker::PhantomData;

use embedded_hal::adc::{Channel, OneShot};

pub trait CurrentSensor {
    type Error: core::fmt::Debug;

    /// The most recent RMS current in amps, or `WouldBlock` if there is no
    /// new reading yet.
    fn measure(&mut self) -> nb::Result<f32, Self::Error>;
}

impl<T: CurrentSensor> CurrentSensor for &mut T {
    type Error = T::Error;

    fn measure(&mut self) -> nb::Result<f32, Self::Error> {
        T::measure(self)
    }
}

/// Electrical parameters of a hall-effect current sensor (ACS712 family)
/// read through an ADC.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AcsParams {
    /// Sensitivity of the sensor: 185 mV/A for the 5 A part, 100 mV/A for
    /// the 20 A one.
    pub mv_per_amp: f32,
    /// ADC reference voltage.
    pub reference_volts: f32,
    /// Number of distinct ADC codes (1024 for a 10-bit converter).
    pub adc_steps: u16,
    /// How many raw samples make up one reading. The window should cover at
    /// least one mains period.
    pub samples_per_window: u16,
}

impl Default for AcsParams {
    fn default() -> Self {
        AcsParams {
            mv_per_amp: 185.0,
            reference_volts: 5.0,
            adc_steps: 1024,
            samples_per_window: 64,
        }
    }
}

impl AcsParams {
    /// Converts the spread between the largest and smallest raw sample in a
    /// window into an RMS current, assuming a sine wave.
    pub fn rms_amps(&self, min: u16, max: u16) -> f32 {
        let peak_to_peak =
            (max.saturating_sub(min)) as f32 * self.reference_volts / self.adc_steps as f32;
        let v_rms = (peak_to_peak / 2.0) * 0.707;
        v_rms * 1000.0 / self.mv_per_amp
    }
}

/// An ACS712-style AC current sensor sampled through an `embedded-hal` ADC
/// channel.
///
/// Each call to `measure` takes one sample. Once a full window has been
/// collected, the window's peak-to-peak spread is turned into a reading and
/// a new window starts.
pub struct AcsSensor<Adc, A, Pin> {
    adc: A,
    pin: Pin,
    params: AcsParams,
    min: u16,
    max: u16,
    taken: u16,
    _adc: PhantomData<Adc>,
}

impl<Adc, A, Pin> AcsSensor<Adc, A, Pin>
where
    A: OneShot<Adc, u16, Pin>,
    Pin: Channel<Adc>,
{
    pub fn new(adc: A, pin: Pin, params: AcsParams) -> Self {
        Self {
            adc,
            pin,
            params,
            min: u16::MAX,
            max: 0,
            taken: 0,
            _adc: PhantomData,
        }
    }

    pub fn release(self) -> (A, Pin) {
        (self.adc, self.pin)
    }
}

impl<Adc, A, Pin> CurrentSensor for AcsSensor<Adc, A, Pin>
where
    A: OneShot<Adc, u16, Pin>,
    A::Error: core::fmt::Debug,
    Pin: Channel<Adc>,
{
    type Error = A::Error;

    fn measure(&mut self) -> nb::Result<f32, A::Error> {
        let sample = self.adc.read(&mut self.pin)?;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.taken += 1;

        if self.taken < self.params.samples_per_window.max(1) {
            return Err(nb::Error::WouldBlock);
        }

        let amps = self.params.rms_amps(self.min, self.max);
        self.min = u16::MAX;
        self.max = 0;
        self.taken = 0;
        Ok(amps)
    }
}

/// Power drawn by a load, in watts.
pub fn power_watts(current: f32, volts: f32) -> f32 {
    current * volts
}

/// Is the load drawing more than the board is rated for?
pub fn is_overloaded(current: f32, max_current: f32) -> bool {
    current > max_current
}
