use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;
use embedded_storage::Storage;
use gowired_time::{Deadline, Millis};

use crate::{
    CurrentSensor, Direction, Directive, Error, Move, Result, Shutter, ShutterState, TravelTimes,
};

/// Something the outside world wants the shutter to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Directive(Directive),
    Button(Direction),
    Position(u8),
    Calibrate { up: u8, down: u8 },
    AutoCalibrate,
}

/// Something that happened and is worth telling the bus about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    StateChanged(ShutterState),
    PositionChanged(u8),
    Calibrated(TravelTimes),
    CalibrationFailed(Error),
}

pub type Events = heapless::Vec<Event, 4>;

#[derive(Clone, Copy, Debug)]
struct Run {
    direction: Direction,
    deadline: Deadline,
}

/// Runs a [`Shutter`] without blocking: it remembers when the current
/// movement started, stops it once its advisory duration is up and feeds the
/// time actually spent moving back into the position estimate.
///
/// Call [`handle`](Self::handle) for every request and [`poll`](Self::poll)
/// regularly (every few milliseconds is plenty).
pub struct ShutterDriver<U, D, DL, S, C> {
    shutter: Shutter<U, D, DL, S>,
    sensor: Option<C>,
    run: Option<Run>,
    reported: ShutterState,
}

impl<U, D, DL, S, C> ShutterDriver<U, D, DL, S, C>
where
    U: OutputPin,
    U::Error: Debug,
    D: OutputPin,
    D::Error: Debug,
    DL: DelayMs<u16>,
    S: Storage,
    S::Error: Debug,
    C: CurrentSensor,
{
    pub fn new(shutter: Shutter<U, D, DL, S>, sensor: Option<C>) -> Self {
        let reported = shutter.state();
        ShutterDriver {
            shutter,
            sensor,
            run: None,
            reported,
        }
    }

    pub fn shutter(&self) -> &Shutter<U, D, DL, S> {
        &self.shutter
    }

    pub fn sensor_mut(&mut self) -> Option<&mut C> {
        self.sensor.as_mut()
    }

    pub fn into_parts(self) -> (Shutter<U, D, DL, S>, Option<C>) {
        (self.shutter, self.sensor)
    }

    /// Whether the motor is running or a calibration is in progress.
    pub fn is_busy(&self) -> bool {
        self.run.is_some() || self.shutter.is_calibrating()
    }

    /// How long until the current movement times out, if there is one.
    pub fn remaining_ms(&self, now: Millis) -> Option<u32> {
        self.run.map(|run| run.deadline.remaining(now))
    }

    pub fn handle(&mut self, request: Request, now: Millis) -> Result<Events> {
        let mut events = Events::new();
        log::debug!("request {request:?}");

        if self.shutter.is_calibrating() {
            log::info!("{request:?} interrupts the calibration");
            self.shutter.abort_calibration()?;
            self.report_state(&mut events);
            return Ok(events);
        }

        let mv = match request {
            Request::Directive(directive) => self.shutter.read_directive(directive),
            Request::Button(direction) => {
                self.shutter.read_buttons(Directive::from(direction) as u8)?
            }
            Request::Position(target) => self.shutter.read_new_position(target)?,
            Request::Calibrate { .. } | Request::AutoCalibrate if self.run.is_some() => {
                self.shutter.read_directive(Directive::Stop)
            }
            Request::Calibrate { up, down } => {
                self.shutter.calibrate(up, down)?;
                if let Some(times) = self.shutter.travel_times() {
                    push(&mut events, Event::Calibrated(times));
                }
                push(&mut events, Event::PositionChanged(self.shutter.position()));
                return Ok(events);
            }
            Request::AutoCalibrate => {
                if !self.shutter.config().auto_calibrate {
                    return Err(Error::AutoCalibrationDisabled);
                }
                if self.sensor.is_none() {
                    return Err(Error::NoCurrentSensor);
                }
                self.shutter.start_auto_calibration(now)?;
                self.report_state(&mut events);
                return Ok(events);
            }
        };

        self.apply(mv, now, &mut events)?;
        Ok(events)
    }

    pub fn poll(&mut self, now: Millis) -> Result<Events> {
        let mut events = Events::new();

        if self.shutter.is_calibrating() {
            let Some(sensor) = self.sensor.as_mut() else {
                self.shutter.abort_calibration()?;
                return Err(Error::NoCurrentSensor);
            };
            match self.shutter.poll_calibration(sensor, now) {
                Err(nb::Error::WouldBlock) => self.report_state(&mut events),
                Ok(times) => {
                    self.report_state(&mut events);
                    push(&mut events, Event::Calibrated(times));
                    push(&mut events, Event::PositionChanged(self.shutter.position()));
                }
                Err(nb::Error::Other(e)) => {
                    self.report_state(&mut events);
                    push(&mut events, Event::CalibrationFailed(e));
                }
            }
            return Ok(events);
        }

        if let Some(run) = self.run {
            if run.deadline.expired(now) {
                self.shutter.read_directive(Directive::Stop);
                self.shutter.movement()?;
                self.run = None;
                self.report_state(&mut events);
                self.settle_position(run, now, &mut events)?;
            }
        }
        Ok(events)
    }

    fn apply(&mut self, mv: Move, now: Millis, events: &mut Events) -> Result<()> {
        let state = self.shutter.movement()?;
        let finished = self.run.take();
        self.report_state(events);
        if let Some(run) = finished {
            self.settle_position(run, now, events)?;
        }
        if let Some(direction) = state.direction() {
            log::debug!("running {direction:?} for up to {} ms", mv.duration_ms);
            self.run = Some(Run {
                direction,
                deadline: Deadline::new(now, mv.duration_ms),
            });
        }
        Ok(())
    }

    fn settle_position(&mut self, run: Run, now: Millis, events: &mut Events) -> Result<()> {
        let elapsed = run.deadline.elapsed(now);
        match self.shutter.calculate_position(run.direction, elapsed) {
            Ok(position) => push(events, Event::PositionChanged(position)),
            Err(Error::NotCalibrated) => {
                log::debug!("not calibrated, position after {elapsed} ms is unknown")
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn report_state(&mut self, events: &mut Events) {
        let state = self.shutter.state();
        if state != self.reported {
            self.reported = state;
            push(events, Event::StateChanged(state));
        }
    }
}

fn push(events: &mut Events, event: Event) {
    if let Err(event) = events.push(event) {
        log::warn!("event queue full, dropping {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::vec::Vec;

    use super::*;
    use crate::mock::{fixture_with, Relay, NoDelay};
    use crate::store::RamStorage;
    use crate::{Config, ConfigBuilder};

    /// Reports whatever the test last put in the cell.
    #[derive(Clone, Default)]
    struct Clamp(Rc<Cell<f32>>);

    impl CurrentSensor for Clamp {
        type Error = core::convert::Infallible;

        fn measure(&mut self) -> nb::Result<f32, Self::Error> {
            Ok(self.0.get())
        }
    }

    type Driver = ShutterDriver<Relay, Relay, NoDelay, RamStorage<1024>, Clamp>;

    fn driver(config: Config, calibrated: bool) -> (Driver, Clamp) {
        let (mut shutter, _) = fixture_with(RamStorage::new(), config);
        if calibrated {
            shutter.calibrate(20, 22).unwrap();
        }
        let clamp = Clamp::default();
        (ShutterDriver::new(shutter, Some(clamp.clone())), clamp)
    }

    fn events(list: &[Event]) -> Events {
        Events::from_slice(list).unwrap()
    }

    #[test]
    fn run_to_a_position() {
        let (mut driver, _) = driver(Config::default(), true);
        assert_eq!(
            driver.handle(Request::Position(50), Millis(1000)).unwrap(),
            events(&[Event::StateChanged(ShutterState::MovingDown)])
        );
        assert_eq!(driver.remaining_ms(Millis(1000)), Some(11_000));
        assert!(driver.poll(Millis(11_999)).unwrap().is_empty());
        assert_eq!(
            driver.poll(Millis(12_000)).unwrap(),
            events(&[
                Event::StateChanged(ShutterState::Idle),
                Event::PositionChanged(50)
            ])
        );
        assert!(!driver.is_busy());
        assert_eq!(driver.shutter().position(), 50);
    }

    #[test]
    fn stop_midway_uses_elapsed_time() {
        let (mut driver, _) = driver(Config::default(), true);
        driver
            .handle(Request::Directive(Directive::Down), Millis(0))
            .unwrap();
        assert_eq!(
            driver.handle(Request::Button(Direction::Up), Millis(6_600)).unwrap(),
            events(&[
                Event::StateChanged(ShutterState::Idle),
                Event::PositionChanged(30)
            ])
        );
        // The stop took; the button was not taken as a new order.
        assert_eq!(driver.shutter().state(), ShutterState::Idle);
    }

    #[test]
    fn out_of_range_position_still_stops_a_run() {
        let (mut driver, _) = driver(Config::default(), true);
        driver
            .handle(Request::Directive(Directive::Down), Millis(0))
            .unwrap();
        assert_eq!(
            driver.handle(Request::Position(150), Millis(2_200)).unwrap(),
            events(&[
                Event::StateChanged(ShutterState::Idle),
                Event::PositionChanged(10)
            ])
        );
        assert!(!driver.is_busy());
        assert_eq!(
            driver.handle(Request::Position(150), Millis(3_000)),
            Err(Error::InvalidPosition(150))
        );
    }

    #[test]
    fn runs_survive_clock_wraparound() {
        let (mut driver, _) = driver(Config::default(), true);
        let start = Millis(u32::MAX - 5_000);
        driver.handle(Request::Position(100), start).unwrap();
        assert!(driver.poll(start + 21_999).unwrap().is_empty());
        let done = driver.poll(start + 22_000).unwrap();
        assert!(done.contains(&Event::PositionChanged(100)));
    }

    #[test]
    fn uncalibrated_runs_have_no_position() {
        let config = ConfigBuilder::default().with_uncalibrated_run_ms(30_000).build();
        let (mut driver, _) = driver(config, false);
        assert_eq!(
            driver.handle(Request::Position(40), Millis(0)),
            Err(Error::NotCalibrated)
        );
        driver
            .handle(Request::Directive(Directive::Up), Millis(0))
            .unwrap();
        assert_eq!(
            driver.poll(Millis(30_000)).unwrap(),
            events(&[Event::StateChanged(ShutterState::Idle)])
        );
    }

    #[test]
    fn manual_calibration_reports() {
        let (mut driver, _) = driver(Config::default(), false);
        assert_eq!(
            driver
                .handle(Request::Calibrate { up: 30, down: 32 }, Millis(0))
                .unwrap(),
            events(&[
                Event::Calibrated(TravelTimes::new(30, 32).unwrap()),
                Event::PositionChanged(0)
            ])
        );
        assert_eq!(
            driver.handle(Request::Calibrate { up: 0, down: 32 }, Millis(0)),
            Err(Error::InvalidTravelTime)
        );
    }

    #[test]
    fn calibration_request_while_moving_only_stops() {
        let (mut driver, _) = driver(Config::default(), true);
        driver
            .handle(Request::Directive(Directive::Down), Millis(0))
            .unwrap();
        let got = driver
            .handle(Request::Calibrate { up: 5, down: 5 }, Millis(2_200))
            .unwrap();
        assert_eq!(
            got,
            events(&[
                Event::StateChanged(ShutterState::Idle),
                Event::PositionChanged(10)
            ])
        );
        assert_eq!(driver.shutter().travel_times(), TravelTimes::new(20, 22).ok());
    }

    #[test]
    fn auto_calibration_needs_the_feature_and_a_sensor() {
        let (mut driver, _) = driver(Config::default(), false);
        assert_eq!(
            driver.handle(Request::AutoCalibrate, Millis(0)),
            Err(Error::AutoCalibrationDisabled)
        );

        let config = ConfigBuilder::default().with_auto_calibration(true).build();
        let (shutter, _) = fixture_with(RamStorage::new(), config);
        let mut driver: Driver = ShutterDriver::new(shutter, None);
        assert_eq!(
            driver.handle(Request::AutoCalibrate, Millis(0)),
            Err(Error::NoCurrentSensor)
        );
    }

    // Simulates a motor that pulls 1.2 A until it hits an end stop. The
    // position is kept in units of `up_ms * down_ms` for a full travel so
    // that both directions step exactly. Returns everything the driver
    // reported.
    fn calibrate(driver: &mut Driver, clamp: &Clamp, up_ms: u32, down_ms: u32) -> Vec<Event> {
        let full = up_ms as i64 * down_ms as i64;
        let mut position = full / 2;
        let mut now = Millis(0);
        let mut reported = Vec::new();
        reported.extend(driver.handle(Request::AutoCalibrate, now).unwrap());
        while driver.is_busy() {
            now = now + 10;
            let amps = match driver.shutter().state() {
                ShutterState::MovingUp => {
                    position = (position - 10 * down_ms as i64).max(0);
                    if position == 0 { 0.02 } else { 1.2 }
                }
                ShutterState::MovingDown => {
                    position = (position + 10 * up_ms as i64).min(full);
                    if position == full { 0.02 } else { 1.2 }
                }
                ShutterState::Idle => 0.0,
            };
            clamp.0.set(amps);
            reported.extend(driver.poll(now).unwrap());
            assert!(now.0 < 1_000_000, "calibration never finished");
        }
        reported
    }

    #[test]
    fn auto_calibration_end_to_end() {
        let config = ConfigBuilder::default()
            .with_auto_calibration(true)
            .with_calibration_samples(1)
            .build();
        let (mut driver, clamp) = driver(config, false);
        let reported = calibrate(&mut driver, &clamp, 18_000, 20_000);

        let times = driver.shutter().travel_times().unwrap();
        assert_eq!((times.up(), times.down()), (18, 20));
        assert_eq!(driver.shutter().position(), 0);
        assert_eq!(driver.shutter().state(), ShutterState::Idle);
        assert!(reported.contains(&Event::Calibrated(times)));
        assert_eq!(reported.last(), Some(&Event::PositionChanged(0)));
    }

    #[test]
    fn failed_auto_calibration_keeps_the_old_times() {
        let config = ConfigBuilder::default()
            .with_auto_calibration(true)
            .with_calibration_timeout_ms(3_000)
            .build();
        let (mut driver, clamp) = driver(config, true);
        clamp.0.set(1.2);
        driver.handle(Request::AutoCalibrate, Millis(0)).unwrap();
        let mut reported = Vec::new();
        let mut now = Millis(0);
        while driver.is_busy() {
            now = now + 10;
            reported.extend(driver.poll(now).unwrap());
        }
        assert_eq!(
            reported.last(),
            Some(&Event::CalibrationFailed(Error::CalibrationTimeout(3_000)))
        );
        assert_eq!(driver.shutter().state(), ShutterState::Idle);
        assert_eq!(driver.shutter().travel_times(), TravelTimes::new(20, 22).ok());
    }

    #[test]
    fn any_request_aborts_a_calibration() {
        let config = ConfigBuilder::default().with_auto_calibration(true).build();
        let (mut driver, clamp) = driver(config, true);
        clamp.0.set(1.2);
        assert_eq!(
            driver.handle(Request::AutoCalibrate, Millis(0)).unwrap(),
            events(&[Event::StateChanged(ShutterState::MovingUp)])
        );
        assert!(driver.poll(Millis(500)).unwrap().is_empty());
        assert_eq!(
            driver.handle(Request::Position(10), Millis(600)).unwrap(),
            events(&[Event::StateChanged(ShutterState::Idle)])
        );
        assert!(!driver.is_busy());
        assert_eq!(driver.shutter().travel_times(), TravelTimes::new(20, 22).ok());
    }
}
