//! Current-sensing auto calibration.
//!
//! The procedure first drives the shutter up until the motor stalls against
//! the top stop, which gives us a known reference position. Then it times a
//! number of full down and up runs, each ending when the motor current
//! drops away, and averages them.
//!
//! Nothing here touches hardware: [`AutoCalibration::step`] is fed the time
//! and (maybe) a current reading, and tells the controller which way the
//! motor should be driven next.

use gowired_time::Millis;

use crate::{Config, Direction, Error, Result, ShutterState, TravelTimes};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Driving up to the top stop to find the reference position.
    Homing,
    /// Resting, then moving in the given direction.
    Pause(Direction),
    /// Timing a full travel in the given direction.
    Travel(Direction),
}

/// What the controller should do after a calibration step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Keep going, nothing to change.
    Wait,
    /// Switch the motor into this state.
    Drive(ShutterState),
    /// The procedure is over and these are the measured times. The motor
    /// should be stopped.
    Finished(TravelTimes),
}

#[derive(Clone, Debug)]
pub struct AutoCalibration {
    phase: Phase,
    phase_start: Millis,
    // First instant of the current run of below-threshold readings.
    below_since: Option<Millis>,
    samples: u8,
    completed: u8,
    up_total_ms: u32,
    down_total_ms: u32,
    threshold: f32,
    inrush_ms: u32,
    stall_window_ms: u32,
    pause_ms: u32,
    timeout_ms: u32,
}

impl AutoCalibration {
    /// Starts a calibration. The caller must drive the motor up right away
    /// (this is also returned as the first [`Step`]).
    pub fn start(config: &Config, now: Millis) -> (Self, Step) {
        let cal = AutoCalibration {
            phase: Phase::Homing,
            phase_start: now,
            below_since: None,
            samples: config.calibration_samples.max(1),
            completed: 0,
            up_total_ms: 0,
            down_total_ms: 0,
            threshold: config.current_threshold,
            inrush_ms: config.inrush_ms,
            stall_window_ms: config.stall_window_ms,
            pause_ms: config.pause_ms,
            timeout_ms: config.calibration_timeout_ms,
        };
        (cal, Step::Drive(ShutterState::MovingUp))
    }

    /// Number of completed down/up round trips so far.
    pub fn completed_samples(&self) -> u8 {
        self.completed
    }

    pub fn step(&mut self, now: Millis, amps: Option<f32>) -> Result<Step> {
        // `None` while homing, the timed direction otherwise.
        let timing = match self.phase {
            Phase::Pause(direction) => {
                if now.since(self.phase_start) < self.pause_ms {
                    return Ok(Step::Wait);
                }
                log::debug!("calibration: timing travel {direction:?}");
                self.enter(Phase::Travel(direction), now);
                return Ok(Step::Drive(direction.into()));
            }
            Phase::Homing => None,
            Phase::Travel(direction) => Some(direction),
        };

        let elapsed = now.since(self.phase_start);
        let Some(stalled_at) = self.stall(now, elapsed, amps) else {
            if elapsed > self.timeout_ms {
                log::warn!("calibration: no stall after {elapsed} ms in {:?}", self.phase);
                return Err(Error::CalibrationTimeout(self.timeout_ms));
            }
            return Ok(Step::Wait);
        };
        self.stalled(timing, stalled_at.since(self.phase_start), now)
    }

    // Returns the instant at which the current first dropped, once the drop
    // has lasted for the full stall window.
    fn stall(&mut self, now: Millis, elapsed: u32, amps: Option<f32>) -> Option<Millis> {
        if elapsed < self.inrush_ms {
            self.below_since = None;
            return None;
        }
        if let Some(amps) = amps {
            if amps < self.threshold {
                self.below_since.get_or_insert(now);
            } else {
                self.below_since = None;
            }
        }
        let since = self.below_since?;
        (now.since(since) >= self.stall_window_ms).then_some(since)
    }

    fn stalled(&mut self, timing: Option<Direction>, travel_ms: u32, now: Millis) -> Result<Step> {
        let next = match timing {
            None => {
                log::debug!("calibration: reached the top stop");
                Phase::Pause(Direction::Down)
            }
            Some(Direction::Down) => {
                log::debug!("calibration: down run took {travel_ms} ms");
                self.down_total_ms += travel_ms;
                Phase::Pause(Direction::Up)
            }
            Some(Direction::Up) => {
                log::debug!("calibration: up run took {travel_ms} ms");
                self.up_total_ms += travel_ms;
                self.completed += 1;
                if self.completed >= self.samples {
                    return self.finish().map(Step::Finished);
                }
                Phase::Pause(Direction::Down)
            }
        };
        self.enter(next, now);
        Ok(Step::Drive(ShutterState::Idle))
    }

    fn finish(&self) -> Result<TravelTimes> {
        let seconds = |total_ms: u32| {
            let avg_ms = total_ms / self.samples as u32;
            // Round up: stopping a little late at an end stop is harmless,
            // stopping early leaves the shutter short of it.
            u8::try_from(avg_ms.div_ceil(1000)).unwrap_or(u8::MAX)
        };
        TravelTimes::new(seconds(self.up_total_ms), seconds(self.down_total_ms))
    }

    fn enter(&mut self, phase: Phase, now: Millis) {
        self.phase = phase;
        self.phase_start = now;
        self.below_since = None;
    }
}
