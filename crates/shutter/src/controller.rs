use core::fmt::Debug;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{OutputPin, PinState};
use embedded_storage::Storage;
use gowired_time::Millis;
use serde::{Deserialize, Serialize};

use crate::calibration::{AutoCalibration, Step};
use crate::sensor::CurrentSensor;
use crate::store::{CalibrationData, CalibrationStore, TravelTimes};
use crate::{Config, Error, Result};

/// What the motor is doing. The discriminants are the status codes reported
/// to the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ShutterState {
    MovingUp = 0,
    MovingDown = 1,
    Idle = 2,
}

impl ShutterState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_moving(self) -> bool {
        self != ShutterState::Idle
    }

    pub fn direction(self) -> Option<Direction> {
        match self {
            ShutterState::MovingUp => Some(Direction::Up),
            ShutterState::MovingDown => Some(Direction::Down),
            ShutterState::Idle => None,
        }
    }
}

impl From<ShutterState> for u8 {
    fn from(state: ShutterState) -> u8 {
        state.code()
    }
}

impl TryFrom<u8> for ShutterState {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(ShutterState::MovingUp),
            1 => Ok(ShutterState::MovingDown),
            2 => Ok(ShutterState::Idle),
            _ => Err(Error::InvalidDirective(code)),
        }
    }
}

/// Direction of travel. Moving down increases the position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl From<Direction> for ShutterState {
    fn from(direction: Direction) -> ShutterState {
        match direction {
            Direction::Up => ShutterState::MovingUp,
            Direction::Down => ShutterState::MovingDown,
        }
    }
}

/// An order from the bus or a local button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Directive {
    Up = 0,
    Down = 1,
    Stop = 2,
}

impl From<Direction> for Directive {
    fn from(direction: Direction) -> Directive {
        match direction {
            Direction::Up => Directive::Up,
            Direction::Down => Directive::Down,
        }
    }
}

impl TryFrom<u8> for Directive {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Directive::Up),
            1 => Ok(Directive::Down),
            2 => Ok(Directive::Stop),
            _ => Err(Error::InvalidDirective(code)),
        }
    }
}

/// The next state the controller wants to be in, and how long the caller
/// should let it stay there. The duration is advisory: the controller never
/// enforces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Move {
    pub state: ShutterState,
    pub duration_ms: u32,
}

impl Move {
    pub const STOP: Move = Move {
        state: ShutterState::Idle,
        duration_ms: 0,
    };
}

/// Controller for one roller shutter driven by an UP and a DOWN relay.
///
/// The controller only decides and records; it never waits for a movement to
/// finish. A caller (see [`ShutterDriver`](crate::ShutterDriver)) asks it
/// what to do with `read_*`, applies the decision with
/// [`movement`](Self::movement), waits for the advisory duration or a stop
/// order, and then reports the time actually spent moving to
/// [`calculate_position`](Self::calculate_position).
pub struct Shutter<U, D, DL, S> {
    up: U,
    down: D,
    delay: DL,
    store: CalibrationStore<S>,
    config: Config,
    state: ShutterState,
    pending: ShutterState,
    times: Option<TravelTimes>,
    position: u8,
    calibration: Option<AutoCalibration>,
}

impl<U, D, DL, S> Shutter<U, D, DL, S>
where
    U: OutputPin,
    U::Error: Debug,
    D: OutputPin,
    D::Error: Debug,
    DL: DelayMs<u16>,
    S: Storage,
    S::Error: Debug,
{
    /// Switches both relays off, then restores the calibration record from
    /// `storage`.
    pub fn new(up: U, down: D, delay: DL, storage: S, config: Config) -> Result<Self> {
        let mut shutter = Shutter {
            up,
            down,
            delay,
            store: CalibrationStore::new(storage, config.layout),
            config,
            state: ShutterState::Idle,
            pending: ShutterState::Idle,
            times: None,
            position: 0,
            calibration: None,
        };
        shutter.switch_up(false)?;
        shutter.switch_down(false)?;

        let data = shutter.store.load()?;
        match data.travel_times() {
            Some(times) => {
                shutter.times = Some(times);
                shutter.position = data.position.min(100);
                log::info!(
                    "restored calibration: up {}s, down {}s, position {}%",
                    times.up(),
                    times.down(),
                    shutter.position
                );
            }
            None => log::info!("no calibration stored, position control is disabled"),
        }
        Ok(shutter)
    }

    pub fn release(self) -> (U, D, DL, S) {
        (self.up, self.down, self.delay, self.store.into_inner())
    }

    pub fn state(&self) -> ShutterState {
        self.state
    }

    pub fn pending_state(&self) -> ShutterState {
        self.pending
    }

    /// Estimated position in percent, 0 being fully up.
    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn is_calibrated(&self) -> bool {
        self.times.is_some()
    }

    pub fn travel_times(&self) -> Option<TravelTimes> {
        self.times
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CalibrationStore<S> {
        &self.store
    }

    /// Decides what to do about a directive from the bus (0 = up,
    /// 1 = down, 2 = stop).
    pub fn read_message(&mut self, order: u8) -> Result<Move> {
        let directive = self.decode(order)?;
        log::debug!("bus directive {directive:?}");
        Ok(self.read_directive(directive))
    }

    /// Decides what to do about a local button press, using the same codes
    /// as [`read_message`](Self::read_message).
    pub fn read_buttons(&mut self, button: u8) -> Result<Move> {
        let directive = self.decode(button)?;
        log::debug!("button directive {directive:?}");
        Ok(self.read_directive(directive))
    }

    /// Orders are only taken while idle. Anything that arrives while the
    /// shutter is moving (or calibrating) stops it instead, so a change of
    /// direction always passes through idle.
    pub fn read_directive(&mut self, directive: Directive) -> Move {
        if self.interrupt() {
            return Move::STOP;
        }
        let direction = match directive {
            Directive::Up => Direction::Up,
            Directive::Down => Direction::Down,
            Directive::Stop => {
                self.pending = ShutterState::Idle;
                return Move::STOP;
            }
        };
        self.pending = direction.into();
        Move {
            state: self.pending,
            duration_ms: self.full_travel_ms(direction),
        }
    }

    /// Plans a move from the current estimate to `target` percent.
    ///
    /// With travel times in whole seconds, each percent of the way takes
    /// `travel_time_s * 1000 / 100` milliseconds.
    ///
    /// A moving shutter is stopped, even by a target that is out of range.
    pub fn read_new_position(&mut self, target: u8) -> Result<Move> {
        if self.interrupt() {
            return Ok(Move::STOP);
        }
        if target > 100 {
            return Err(Error::InvalidPosition(target));
        }
        let times = self.times.ok_or(Error::NotCalibrated)?;

        let delta = target as i16 - self.position as i16;
        let direction = match delta {
            0 => {
                self.pending = ShutterState::Idle;
                return Ok(Move::STOP);
            }
            d if d > 0 => Direction::Down,
            _ => Direction::Up,
        };
        self.pending = direction.into();
        Ok(Move {
            state: self.pending,
            duration_ms: times.millis(direction) * delta.unsigned_abs() as u32 / 100,
        })
    }

    /// Drives the relays into the pending state and commits it.
    ///
    /// When starting a move, the opposite relay is released first and given
    /// `settle_ms` to drop out before the other one is energized.
    pub fn movement(&mut self) -> Result<ShutterState> {
        match self.pending {
            ShutterState::Idle => {
                self.switch_up(false)?;
                self.switch_down(false)?;
            }
            ShutterState::MovingUp => {
                self.switch_down(false)?;
                self.delay.delay_ms(self.config.settle_ms);
                self.switch_up(true)?;
            }
            ShutterState::MovingDown => {
                self.switch_up(false)?;
                self.delay.delay_ms(self.config.settle_ms);
                self.switch_down(true)?;
            }
        }
        if self.state != self.pending {
            log::debug!("{:?} -> {:?}", self.state, self.pending);
        }
        self.state = self.pending;
        Ok(self.state)
    }

    /// Updates the position estimate after the motor ran for `measured_ms`
    /// in `direction`, and persists it.
    ///
    /// This is dead reckoning: the estimate is only as good as the times the
    /// caller measures, and errors accumulate until the next calibration.
    pub fn calculate_position(&mut self, direction: Direction, measured_ms: u32) -> Result<u8> {
        let times = self.times.ok_or(Error::NotCalibrated)?;
        let travel_ms = times.millis(direction) as u64;
        let change = ((measured_ms as u64 * 100 + travel_ms / 2) / travel_ms).min(100) as u8;

        let position = match direction {
            Direction::Down => self.position.saturating_add(change).min(100),
            Direction::Up => self.position.saturating_sub(change),
        };
        log::debug!(
            "moved {direction:?} for {measured_ms} ms: {}% -> {position}%",
            self.position
        );
        self.position = position;
        self.store.save_position(position)?;
        Ok(position)
    }

    /// Manual calibration with known travel times, in seconds. The shutter
    /// is assumed to be fully up, so it has to be idle.
    pub fn calibrate(&mut self, up: u8, down: u8) -> Result<()> {
        if self.calibration.is_some() {
            return Err(Error::CalibrationInProgress);
        }
        if self.state.is_moving() {
            return Err(Error::Moving);
        }
        let times = TravelTimes::new(up, down)?;
        self.apply_calibration(times)
    }

    /// Starts the current-sensing calibration; drive it with
    /// [`poll_calibration`](Self::poll_calibration). The shutter has to be
    /// idle, since the first thing the calibration does is drive it up.
    pub fn start_auto_calibration(&mut self, now: Millis) -> Result<()> {
        if !self.config.auto_calibrate {
            return Err(Error::AutoCalibrationDisabled);
        }
        if self.calibration.is_some() {
            return Err(Error::CalibrationInProgress);
        }
        if self.state.is_moving() {
            return Err(Error::Moving);
        }
        log::info!(
            "starting auto calibration with {} samples",
            self.config.calibration_samples
        );
        let (calibration, step) = AutoCalibration::start(&self.config, now);
        self.calibration = Some(calibration);
        if let Step::Drive(state) = step {
            self.drive(state).map_err(|e| self.fail(e))?;
        }
        Ok(())
    }

    /// Advances a running auto calibration. Returns `WouldBlock` until it
    /// has finished.
    ///
    /// On failure the relays are switched off and whatever calibration was
    /// there before is kept.
    pub fn poll_calibration<C: CurrentSensor>(
        &mut self,
        sensor: &mut C,
        now: Millis,
    ) -> nb::Result<TravelTimes, Error> {
        if self.calibration.is_none() {
            return Err(nb::Error::Other(Error::CalibrationAborted));
        }
        let amps = match sensor.measure() {
            Ok(amps) => Some(amps),
            Err(nb::Error::WouldBlock) => None,
            Err(nb::Error::Other(e)) => {
                log::error!("current sensor failed: {e:?}");
                return Err(self.fail(Error::Sensor).into());
            }
        };

        let step = match self.calibration.as_mut().map(|c| c.step(now, amps)) {
            Some(Ok(step)) => step,
            Some(Err(e)) => return Err(self.fail(e).into()),
            None => return Err(nb::Error::Other(Error::CalibrationAborted)),
        };
        match step {
            Step::Wait => Err(nb::Error::WouldBlock),
            Step::Drive(state) => {
                self.drive(state).map_err(|e| self.fail(e))?;
                Err(nb::Error::WouldBlock)
            }
            Step::Finished(times) => {
                self.calibration = None;
                self.drive(ShutterState::Idle)?;
                self.apply_calibration(times)?;
                Ok(times)
            }
        }
    }

    /// Stops a running auto calibration, leaving the previous calibration
    /// in place.
    pub fn abort_calibration(&mut self) -> Result<()> {
        if self.calibration.take().is_some() {
            log::warn!("auto calibration aborted");
            self.drive(ShutterState::Idle)?;
        }
        Ok(())
    }

    fn apply_calibration(&mut self, times: TravelTimes) -> Result<()> {
        self.store.save(&CalibrationData::calibrated(times, 0))?;
        self.times = Some(times);
        self.position = 0;
        log::info!("calibrated: up {}s, down {}s", times.up(), times.down());
        Ok(())
    }

    // While moving, any order stops the shutter, including ones with a code
    // we don't know.
    fn decode(&mut self, code: u8) -> Result<Directive> {
        match Directive::try_from(code) {
            Err(e) if self.state.is_moving() || self.calibration.is_some() => {
                log::warn!("{e} while moving, stopping");
                Ok(Directive::Stop)
            }
            decoded => decoded,
        }
    }

    // Turns an order that arrives during a movement or a calibration into a
    // stop. Returns whether that happened.
    fn interrupt(&mut self) -> bool {
        if self.calibration.take().is_some() {
            log::warn!("order received during calibration, aborting it");
        } else if !self.state.is_moving() {
            return false;
        }
        self.pending = ShutterState::Idle;
        true
    }

    fn fail(&mut self, error: Error) -> Error {
        log::warn!("auto calibration failed: {error}");
        self.calibration = None;
        if let Err(e) = self.drive(ShutterState::Idle) {
            log::error!("could not stop the motor after a failed calibration: {e}");
        }
        error
    }

    fn drive(&mut self, state: ShutterState) -> Result<()> {
        self.pending = state;
        self.movement().map(|_| ())
    }

    fn full_travel_ms(&self, direction: Direction) -> u32 {
        match self.times {
            Some(times) => times.millis(direction),
            None => self.config.uncalibrated_run_ms,
        }
    }

    fn level(&self, on: bool) -> PinState {
        if on {
            self.config.polarity.on_level()
        } else {
            self.config.polarity.off_level()
        }
    }

    fn switch_up(&mut self, on: bool) -> Result<()> {
        let level = self.level(on);
        self.up.set_state(level).map_err(|e| {
            log::error!("failed to switch the UP relay: {e:?}");
            Error::Relay
        })
    }

    fn switch_down(&mut self, on: bool) -> Result<()> {
        let level = self.level(on);
        self.down.set_state(level).map_err(|e| {
            log::error!("failed to switch the DOWN relay: {e:?}");
            Error::Relay
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{fixture, fixture_with, Relays, Trace};
    use crate::store::{Layout, RamStorage, UNSET};
    use crate::{ConfigBuilder, RelayPolarity};
    use proptest::prelude::*;

    fn calibrated_storage(up: u8, down: u8, position: u8) -> RamStorage<1024> {
        let mut store = CalibrationStore::new(RamStorage::new(), Layout::default());
        store
            .save(&CalibrationData {
                travel_time_up: up,
                travel_time_down: down,
                position,
            })
            .unwrap();
        store.into_inner()
    }

    #[test]
    fn uncalibrated_on_sentinel() {
        let (shutter, relays) = fixture(RamStorage::new());
        assert!(!shutter.is_calibrated());
        assert_eq!(shutter.position(), 0);
        assert_eq!(shutter.state(), ShutterState::Idle);
        assert_eq!(relays.levels(), (PinState::Low, PinState::Low));
    }

    #[test]
    fn relays_are_switched_off_before_anything_else() {
        let config = ConfigBuilder::default()
            .with_polarity(RelayPolarity::ActiveLow)
            .build();
        let (_, relays) = fixture_with(calibrated_storage(20, 22, 30), config);
        assert_eq!(
            relays.trace(),
            vec![Trace::Up(PinState::High), Trace::Down(PinState::High)]
        );
    }

    #[test]
    fn restores_calibration() {
        let (shutter, _) = fixture(calibrated_storage(20, 22, 30));
        assert!(shutter.is_calibrated());
        assert_eq!(shutter.travel_times(), Some(TravelTimes::new(20, 22).unwrap()));
        assert_eq!(shutter.position(), 30);
    }

    #[test]
    fn one_unset_time_means_uncalibrated() {
        let (shutter, _) = fixture(calibrated_storage(20, UNSET, 30));
        assert!(!shutter.is_calibrated());
        assert_eq!(shutter.position(), 0);
    }

    #[test]
    fn corrupt_position_is_clamped() {
        let (shutter, _) = fixture(calibrated_storage(20, 22, 180));
        assert_eq!(shutter.position(), 100);
    }

    #[test]
    fn manual_calibration() {
        let (mut shutter, _) = fixture(calibrated_storage(30, 30, 70));
        shutter.calibrate(20, 22).unwrap();
        assert!(shutter.is_calibrated());
        assert_eq!(shutter.position(), 0);

        let (_, _, _, storage) = shutter.release();
        let mut store = CalibrationStore::new(storage, Layout::default());
        assert_eq!(
            store.load().unwrap(),
            CalibrationData {
                travel_time_up: 20,
                travel_time_down: 22,
                position: 0
            }
        );
    }

    #[test]
    fn manual_calibration_rejects_sentinel() {
        let (mut shutter, _) = fixture(RamStorage::new());
        assert_eq!(shutter.calibrate(UNSET, 20), Err(Error::InvalidTravelTime));
        assert_eq!(shutter.calibrate(20, 0), Err(Error::InvalidTravelTime));
        assert!(!shutter.is_calibrated());
    }

    #[test]
    fn calibration_survives_a_restart() {
        let (mut shutter, _) = fixture(RamStorage::new());
        shutter.calibrate(20, 22).unwrap();
        shutter.read_message(1).unwrap();
        shutter.movement().unwrap();
        shutter.calculate_position(Direction::Down, 6600).unwrap();
        let (_, _, _, storage) = shutter.release();

        let (restored, _) = fixture(storage);
        assert!(restored.is_calibrated());
        assert_eq!(restored.travel_times(), Some(TravelTimes::new(20, 22).unwrap()));
        assert_eq!(restored.position(), 30);
    }

    #[test]
    fn directives_while_idle() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 0));
        assert_eq!(
            shutter.read_message(0).unwrap(),
            Move {
                state: ShutterState::MovingUp,
                duration_ms: 20_000
            }
        );
        assert_eq!(
            shutter.read_buttons(1).unwrap(),
            Move {
                state: ShutterState::MovingDown,
                duration_ms: 22_000
            }
        );
        assert_eq!(shutter.read_message(2).unwrap(), Move::STOP);
        assert_eq!(shutter.read_message(3), Err(Error::InvalidDirective(3)));
        // Nothing is committed until `movement`.
        assert_eq!(shutter.state(), ShutterState::Idle);
    }

    #[test]
    fn uncalibrated_directives_use_the_fallback_duration() {
        let config = ConfigBuilder::default().with_uncalibrated_run_ms(45_000).build();
        let (mut shutter, _) = fixture_with(RamStorage::new(), config);
        assert_eq!(
            shutter.read_message(1).unwrap(),
            Move {
                state: ShutterState::MovingDown,
                duration_ms: 45_000
            }
        );
    }

    #[test]
    fn any_order_while_moving_stops() {
        let (mut shutter, relays) = fixture(calibrated_storage(20, 22, 0));
        shutter.read_message(1).unwrap();
        assert_eq!(shutter.movement().unwrap(), ShutterState::MovingDown);
        assert_eq!(relays.levels(), (PinState::Low, PinState::High));

        assert_eq!(shutter.read_message(0).unwrap(), Move::STOP);
        assert_eq!(shutter.pending_state(), ShutterState::Idle);
        assert_eq!(shutter.movement().unwrap(), ShutterState::Idle);
        assert_eq!(relays.levels(), (PinState::Low, PinState::Low));
    }

    #[test]
    fn position_order_while_moving_stops() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 0));
        shutter.read_message(1).unwrap();
        shutter.movement().unwrap();
        assert_eq!(shutter.read_new_position(10).unwrap(), Move::STOP);
    }

    #[test]
    fn malformed_orders_while_moving_still_stop() {
        let (mut shutter, relays) = fixture(calibrated_storage(20, 22, 0));
        shutter.read_message(1).unwrap();
        shutter.movement().unwrap();
        assert_eq!(shutter.read_message(3).unwrap(), Move::STOP);
        assert_eq!(shutter.read_buttons(9).unwrap(), Move::STOP);
        assert_eq!(shutter.read_new_position(150).unwrap(), Move::STOP);
        assert_eq!(shutter.pending_state(), ShutterState::Idle);
        assert_eq!(shutter.movement().unwrap(), ShutterState::Idle);
        assert_eq!(relays.levels(), (PinState::Low, PinState::Low));

        // Once idle, they are rejected again.
        assert_eq!(shutter.read_message(3), Err(Error::InvalidDirective(3)));
        assert_eq!(shutter.read_new_position(150), Err(Error::InvalidPosition(150)));
    }

    #[test]
    fn manual_calibration_needs_an_idle_shutter() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 40));
        shutter.read_message(1).unwrap();
        shutter.movement().unwrap();
        assert_eq!(shutter.calibrate(30, 30), Err(Error::Moving));
        assert_eq!(shutter.travel_times(), TravelTimes::new(20, 22).ok());
        assert_eq!(shutter.position(), 40);
        assert_eq!(shutter.state(), ShutterState::MovingDown);

        let (_, _, _, storage) = shutter.release();
        let mut store = CalibrationStore::new(storage, Layout::default());
        assert_eq!(store.load().unwrap().travel_time_up, 20);
    }

    #[test]
    fn auto_calibration_needs_an_idle_shutter() {
        let config = ConfigBuilder::default().with_auto_calibration(true).build();
        let (mut shutter, relays) = fixture_with(calibrated_storage(20, 22, 0), config);
        shutter.read_message(1).unwrap();
        shutter.movement().unwrap();
        relays.clear();

        assert_eq!(shutter.start_auto_calibration(Millis(0)), Err(Error::Moving));
        assert!(!shutter.is_calibrating());
        assert!(relays.trace().is_empty());
        assert_eq!(relays.levels(), (PinState::Low, PinState::High));
        assert_eq!(shutter.state(), ShutterState::MovingDown);
    }

    /// A sensor whose converter never answers.
    struct DeadSensor;

    impl CurrentSensor for DeadSensor {
        type Error = &'static str;

        fn measure(&mut self) -> nb::Result<f32, Self::Error> {
            Err(nb::Error::Other("adc timeout"))
        }
    }

    #[test]
    fn sensor_failure_ends_the_calibration() {
        let config = ConfigBuilder::default().with_auto_calibration(true).build();
        let (mut shutter, relays) = fixture_with(calibrated_storage(20, 22, 40), config);
        shutter.start_auto_calibration(Millis(0)).unwrap();
        assert_eq!(relays.levels(), (PinState::High, PinState::Low));

        assert_eq!(
            shutter.poll_calibration(&mut DeadSensor, Millis(10)),
            Err(nb::Error::Other(Error::Sensor))
        );
        assert!(!shutter.is_calibrating());
        assert_eq!(shutter.state(), ShutterState::Idle);
        assert_eq!(relays.levels(), (PinState::Low, PinState::Low));
        assert_eq!(shutter.travel_times(), TravelTimes::new(20, 22).ok());
        assert_eq!(shutter.position(), 40);
        // Nothing left to poll.
        assert_eq!(
            shutter.poll_calibration(&mut DeadSensor, Millis(20)),
            Err(nb::Error::Other(Error::CalibrationAborted))
        );
    }

    #[test]
    fn new_position() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 0));
        assert_eq!(
            shutter.read_new_position(50).unwrap(),
            Move {
                state: ShutterState::MovingDown,
                duration_ms: 11_000
            }
        );
        assert_eq!(shutter.pending_state(), ShutterState::MovingDown);
    }

    #[test]
    fn new_position_upwards_and_in_place() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 80));
        assert_eq!(
            shutter.read_new_position(30).unwrap(),
            Move {
                state: ShutterState::MovingUp,
                duration_ms: 10_000
            }
        );
        assert_eq!(shutter.read_new_position(80).unwrap(), Move::STOP);
        assert_eq!(shutter.pending_state(), ShutterState::Idle);
    }

    #[test]
    fn new_position_needs_calibration() {
        let (mut shutter, _) = fixture(RamStorage::new());
        assert_eq!(shutter.read_new_position(50), Err(Error::NotCalibrated));
        assert_eq!(shutter.pending_state(), ShutterState::Idle);
    }

    #[test]
    fn new_position_out_of_range() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 0));
        assert_eq!(shutter.read_new_position(101), Err(Error::InvalidPosition(101)));
    }

    #[test]
    fn movement_settles_between_relays() {
        let (mut shutter, relays) = fixture(calibrated_storage(20, 22, 0));
        relays.clear();
        shutter.read_message(0).unwrap();
        shutter.movement().unwrap();
        assert_eq!(
            relays.trace(),
            vec![
                Trace::Down(PinState::Low),
                Trace::Delay(20),
                Trace::Up(PinState::High)
            ]
        );
    }

    #[test]
    fn movement_is_idempotent() {
        let (mut shutter, relays) = fixture(calibrated_storage(20, 22, 0));
        for order in [0, 2, 1] {
            shutter.read_message(order).unwrap();
            let first = shutter.movement().unwrap();
            let levels = relays.levels();
            for _ in 0..3 {
                assert_eq!(shutter.movement().unwrap(), first);
                assert_eq!(relays.levels(), levels);
            }
            shutter.read_message(2).unwrap();
            shutter.movement().unwrap();
        }
    }

    #[test]
    fn position_after_moving_down() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 0));
        assert_eq!(shutter.calculate_position(Direction::Down, 11_000), Ok(50));
        assert_eq!(shutter.store.load().unwrap().position, 50);
    }

    #[test]
    fn position_rounds_to_nearest() {
        let (mut shutter, _) = fixture(calibrated_storage(20, 22, 50));
        // 20 s up travel: 1% is 200 ms.
        assert_eq!(shutter.calculate_position(Direction::Up, 299), Ok(49));
        assert_eq!(shutter.calculate_position(Direction::Up, 300), Ok(47));
    }

    #[test]
    fn position_needs_calibration() {
        let (mut shutter, _) = fixture(RamStorage::new());
        assert_eq!(
            shutter.calculate_position(Direction::Down, 1000),
            Err(Error::NotCalibrated)
        );
    }

    #[test]
    fn storage_failures_surface() {
        let config = ConfigBuilder::default().with_layout(Layout::at(2000)).build();
        let (up, down, delay) = Relays::default().parts();
        assert!(matches!(
            Shutter::new(up, down, delay, RamStorage::<1024>::new(), config),
            Err(Error::Storage)
        ));
    }

    proptest! {
        #[test]
        fn direction_follows_the_sign_of_the_delta(from in 0u8..=100, to in 0u8..=100) {
            let (mut shutter, _) = fixture(calibrated_storage(20, 22, from));
            let mv = shutter.read_new_position(to).unwrap();
            match to.cmp(&from) {
                core::cmp::Ordering::Greater => prop_assert_eq!(mv.state, ShutterState::MovingDown),
                core::cmp::Ordering::Less => prop_assert_eq!(mv.state, ShutterState::MovingUp),
                core::cmp::Ordering::Equal => prop_assert_eq!(mv, Move::STOP),
            }
            prop_assert_eq!(mv.state, shutter.pending_state());
        }

        #[test]
        fn position_stays_in_range(
            from in 0u8..=100,
            down: bool,
            measured_ms: u32,
            up in 1u8..255,
            down_time in 1u8..255,
        ) {
            let (mut shutter, _) = fixture(calibrated_storage(up, down_time, from));
            let direction = if down { Direction::Down } else { Direction::Up };
            let position = shutter.calculate_position(direction, measured_ms).unwrap();
            prop_assert!(position <= 100);
            if down {
                prop_assert!(position >= from);
            } else {
                prop_assert!(position <= from);
            }
        }

        // Going somewhere and then reporting exactly the advised time lands
        // on the target, give or take rounding.
        #[test]
        fn planned_moves_arrive(from in 0u8..=100, to in 0u8..=100, up in 1u8..255, down in 1u8..255) {
            let (mut shutter, _) = fixture(calibrated_storage(up, down, from));
            let mv = shutter.read_new_position(to).unwrap();
            if let Some(direction) = mv.state.direction() {
                let position = shutter.calculate_position(direction, mv.duration_ms).unwrap();
                prop_assert!(position.abs_diff(to) <= 1, "{} -> {} ended at {}", from, to, position);
            }
        }
    }
}
