//! A tubular shutter motor, its two relays and a clamp meter on its supply.

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use embedded_hal::{blocking::delay::DelayMs, digital::v2::OutputPin};
use gowired_shutter::{CurrentSensor, RelayPolarity};

#[derive(Clone, Copy, Debug)]
pub struct MotorParams {
    /// Full travel from bottom to top, in ms.
    pub up_ms: u32,
    /// Full travel from top to bottom, in ms.
    pub down_ms: u32,
    pub running_amps: f32,
    /// What the sensor reads with the motor stopped.
    pub idle_amps: f32,
}

impl Default for MotorParams {
    fn default() -> Self {
        MotorParams {
            up_ms: 19_400,
            down_ms: 21_300,
            running_amps: 0.9,
            idle_amps: 0.03,
        }
    }
}

#[derive(Debug)]
pub struct Motor {
    params: MotorParams,
    polarity: RelayPolarity,
    up: bool,
    down: bool,
    // 0.0 is fully up, 1.0 fully down.
    position: f64,
    running: bool,
    faults: u32,
}

impl Motor {
    fn new(params: MotorParams, polarity: RelayPolarity, position: f64) -> Self {
        Motor {
            params,
            polarity,
            up: false,
            down: false,
            position: position.clamp(0.0, 1.0),
            running: false,
            faults: 0,
        }
    }

    /// Position in percent, 0 being fully up.
    pub fn position(&self) -> f64 {
        self.position * 100.0
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// How many times both windings were powered at once.
    pub fn faults(&self) -> u32 {
        self.faults
    }

    pub fn amps(&self) -> f32 {
        if self.running {
            self.params.running_amps
        } else {
            self.params.idle_amps
        }
    }

    /// Runs the motor for `ms`. The built-in limit switches cut the power at
    /// either end.
    pub fn advance(&mut self, ms: u32) {
        self.running = false;
        match (self.up, self.down) {
            (true, true) => {
                log::error!("both windings energized");
                self.faults += 1;
            }
            (true, false) if self.position > 0.0 => {
                self.position = (self.position - ms as f64 / self.params.up_ms as f64).max(0.0);
                self.running = true;
            }
            (false, true) if self.position < 1.0 => {
                self.position = (self.position + ms as f64 / self.params.down_ms as f64).min(1.0);
                self.running = true;
            }
            _ => {}
        }
    }
}

/// The motor and its wiring, shared by the relays and the sensor.
#[derive(Clone, Debug)]
pub struct Bench(Rc<RefCell<Motor>>);

impl Bench {
    pub fn new(params: MotorParams, polarity: RelayPolarity, position: f64) -> Self {
        Bench(Rc::new(RefCell::new(Motor::new(params, polarity, position))))
    }

    pub fn motor(&self) -> std::cell::Ref<'_, Motor> {
        self.0.borrow()
    }

    pub fn advance(&self, ms: u32) {
        self.0.borrow_mut().advance(ms);
    }

    pub fn relays(&self) -> (SimRelay, SimRelay) {
        (
            SimRelay {
                bench: self.clone(),
                up: true,
            },
            SimRelay {
                bench: self.clone(),
                up: false,
            },
        )
    }

    pub fn sensor(&self) -> SimCurrentSensor {
        SimCurrentSensor(self.clone())
    }
}

pub struct SimRelay {
    bench: Bench,
    up: bool,
}

impl SimRelay {
    fn set(&mut self, high: bool) {
        let mut motor = self.bench.0.borrow_mut();
        let on = high == (motor.polarity == RelayPolarity::ActiveHigh);
        if self.up {
            motor.up = on;
        } else {
            motor.down = on;
        }
    }
}

impl OutputPin for SimRelay {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.set(true);
        Ok(())
    }
}

pub struct SimCurrentSensor(Bench);

impl CurrentSensor for SimCurrentSensor {
    type Error = Infallible;

    fn measure(&mut self) -> nb::Result<f32, Infallible> {
        Ok(self.0.motor().amps())
    }
}

/// Relay change-over pauses take no simulated time.
pub struct NoDelay;

impl DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, ms: u16) {
        log::trace!("settle {ms} ms");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_switches_stop_the_motor() {
        let bench = Bench::new(MotorParams::default(), RelayPolarity::ActiveHigh, 0.9);
        let (_, mut down) = bench.relays();
        down.set_high().unwrap();
        bench.advance(1_000);
        assert!(bench.motor().is_running());
        bench.advance(10_000);
        assert_eq!(bench.motor().position(), 100.0);
        bench.advance(10);
        assert!(!bench.motor().is_running());
        assert_eq!(bench.sensor().measure(), Ok(0.03));
    }

    #[test]
    fn active_low_relays() {
        let bench = Bench::new(MotorParams::default(), RelayPolarity::ActiveLow, 1.0);
        let (mut up, mut down) = bench.relays();
        up.set_high().unwrap();
        down.set_high().unwrap();
        bench.advance(10);
        assert!(!bench.motor().is_running());
        up.set_low().unwrap();
        bench.advance(10);
        assert!(bench.motor().is_running());
        assert_eq!(bench.motor().faults(), 0);
    }
}
