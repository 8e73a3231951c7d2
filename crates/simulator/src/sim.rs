//! A GoWired node with one shutter, one RGBW dimmer and two heating
//! sections, talking to a controller over a simulated bus.

use anyhow::anyhow;
use gowired_dimmer::{Dimmer, DimmerConfig};
use gowired_heating::{Change, HeatingConfig, Thermostat};
use gowired_protocol::{
    encode, Cmd, DimmerAction, FrameReader, HeatingAction, Id, Report, ShutterAction, MAX_FRAME,
};
use gowired_shutter::{
    is_overloaded, power_watts, Config, Events, Millis, RamStorage, Shutter, ShutterDriver,
    ShutterState,
};

use crate::motor::{Bench, MotorParams, NoDelay, SimCurrentSensor, SimRelay};

pub const SHUTTER_ID: Id = 1;
pub const DIMMER_ID: Id = 2;
/// Sensor ids of the heating sections.
pub const HEATING_SENSORS: [Id; 2] = [11, 12];

type Driver = ShutterDriver<SimRelay, SimRelay, NoDelay, RamStorage<1024>, SimCurrentSensor>;

/// The mains side of the node.
#[derive(Clone, Copy, Debug)]
pub struct Rating {
    pub volts: f32,
    /// The most the relays may carry.
    pub max_amps: f32,
}

impl Default for Rating {
    fn default() -> Self {
        Rating {
            volts: 230.0,
            max_amps: 3.0,
        }
    }
}

/// What the motor is drawing right now.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Supply {
    pub amps: f32,
    pub watts: f32,
    pub overloaded: bool,
}

pub struct Simulation {
    bench: Bench,
    driver: Driver,
    dimmer: Dimmer<4>,
    heating: Thermostat<RamStorage<1024>, 2>,
    now: Millis,
    tick_ms: u32,
    // Bytes on their way to the node and back.
    node_rx: FrameReader<MAX_FRAME>,
    controller_rx: FrameReader<MAX_FRAME>,
}

impl Simulation {
    /// `start` is where the shutter physically is, in percent.
    pub fn new(
        motor: MotorParams,
        config: Config,
        tick_ms: u32,
        start: f64,
    ) -> anyhow::Result<Self> {
        let bench = Bench::new(motor, config.polarity, start / 100.0);
        let (up, down) = bench.relays();
        let shutter = Shutter::new(up, down, NoDelay, RamStorage::new(), config)
            .map_err(|e| anyhow!("shutter failed to start: {e}"))?;
        let sensor = config.auto_calibrate.then(|| bench.sensor());
        let heating = Thermostat::new(RamStorage::new(), HeatingConfig::default(), &HEATING_SENSORS)
            .map_err(|e| anyhow!("heating failed to start: {e}"))?;
        Ok(Simulation {
            driver: ShutterDriver::new(shutter, sensor),
            bench,
            dimmer: Dimmer::new(DimmerConfig::default()),
            heating,
            now: Millis::ZERO,
            tick_ms: tick_ms.max(1),
            node_rx: FrameReader::new(),
            controller_rx: FrameReader::new(),
        })
    }

    pub fn now(&self) -> Millis {
        self.now
    }

    pub fn bench(&self) -> &Bench {
        &self.bench
    }

    pub fn shutter(&self) -> &Shutter<SimRelay, SimRelay, NoDelay, RamStorage<1024>> {
        self.driver.shutter()
    }

    pub fn is_busy(&self) -> bool {
        self.driver.is_busy() || !self.dimmer.is_settled()
    }

    pub fn is_calibrating(&self) -> bool {
        self.driver.shutter().is_calibrating()
    }

    /// Sends `cmd` from the controller to the node and returns what the node
    /// answered.
    pub fn send(&mut self, cmd: Cmd) -> anyhow::Result<Vec<Report>> {
        let mut buf = [0u8; MAX_FRAME];
        let frame = encode(&cmd, &mut buf)?;

        let mut replies = Vec::new();
        for &byte in frame.iter() {
            if let Some(cmd) = self.node_rx.push::<Cmd>(byte) {
                replies.extend(self.handle(cmd?)?);
            }
        }
        self.deliver(replies)
    }

    /// Advances the clock by one tick and returns what the node reported.
    pub fn tick(&mut self) -> anyhow::Result<Vec<Report>> {
        self.now = self.now + self.tick_ms;
        self.bench.advance(self.tick_ms);

        let events = self.driver.poll(self.now)?;
        let mut reports = self.shutter_reports(&events);
        if self.dimmer.poll(self.now).is_some() && self.dimmer.is_settled() {
            reports.push(self.dimmer_report());
        }
        self.deliver(reports)
    }

    /// Ticks for `ms` of simulated time.
    pub fn run_for(&mut self, ms: u32) -> anyhow::Result<Vec<Report>> {
        let mut reports = Vec::new();
        let end = self.now + ms;
        while !self.now.is_reached(end) {
            reports.extend(self.tick()?);
        }
        Ok(reports)
    }

    /// Ticks until nothing is moving or fading, for at most `limit_ms`.
    pub fn run_until_idle(&mut self, limit_ms: u32) -> anyhow::Result<Vec<Report>> {
        let mut reports = Vec::new();
        let start = self.now;
        while self.is_busy() {
            if self.now.since(start) > limit_ms {
                return Err(anyhow!("still busy after {limit_ms} ms"));
            }
            reports.extend(self.tick()?);
        }
        Ok(reports)
    }

    pub fn supply(&self, rating: Rating) -> Supply {
        let amps = self.bench.motor().amps();
        Supply {
            amps,
            watts: power_watts(amps, rating.volts),
            overloaded: is_overloaded(amps, rating.max_amps),
        }
    }

    pub fn status(&self) -> Vec<Report> {
        let mut reports = vec![self.shutter_status(), self.dimmer_report()];
        reports.extend(HEATING_SENSORS.iter().filter_map(|&id| self.heating_report(id)));
        reports
    }

    // The node side: act on a command and say what happened.
    fn handle(&mut self, cmd: Cmd) -> anyhow::Result<Vec<Report>> {
        log::debug!("node received {cmd:?}");
        match cmd {
            Cmd::Shutter { id, action } if id == SHUTTER_ID => {
                let events = match self.driver.handle(action.into(), self.now) {
                    Ok(events) => events,
                    Err(e) => {
                        log::warn!("{action:?} rejected: {e}");
                        return Ok(vec![self.shutter_status()]);
                    }
                };
                if action == ShutterAction::Stop && events.is_empty() {
                    return Ok(vec![self.shutter_status()]);
                }
                Ok(self.shutter_reports(&events))
            }
            Cmd::Dimmer { id, action } if id == DIMMER_ID => {
                match action {
                    DimmerAction::SetLevel(level) => self.dimmer.set_level(level),
                    DimmerAction::SetStatus(on) => self.dimmer.set_status(on),
                    DimmerAction::SetColor(rgbw) => self.dimmer.set_color(rgbw),
                }
                Ok(vec![])
            }
            Cmd::Heating { id, action } if HEATING_SENSORS.contains(&id) => {
                let changes = match action {
                    HeatingAction::SetPoint(value) => match self.heating.set_setpoint(id, value) {
                        Ok(changes) => changes,
                        Err(e) => {
                            log::warn!("{action:?} rejected: {e}");
                            Default::default()
                        }
                    },
                    HeatingAction::Master(on) => self.heating.set_enabled(on),
                    HeatingAction::Hysteresis(h) => self.heating.set_hysteresis(h),
                };
                let mut reports = self.heating_reports(&changes);
                // The section that was addressed always answers.
                if !changes.iter().any(|c| c.sensor == id) {
                    reports.extend(self.heating_report(id));
                }
                Ok(reports)
            }
            Cmd::Temperature { sensor, value } => {
                let changes = self.heating.report_temperature(sensor, value);
                Ok(self.heating_reports(&changes))
            }
            Cmd::QueryStatus => Ok(self.status()),
            Cmd::Shutter { id, .. } | Cmd::Dimmer { id, .. } | Cmd::Heating { id, .. } => {
                log::warn!("no device with id {id}");
                Ok(vec![])
            }
        }
    }

    // Puts the node's reports on the bus and reads them back on the
    // controller side.
    fn deliver(&mut self, reports: Vec<Report>) -> anyhow::Result<Vec<Report>> {
        let mut received = Vec::new();
        for report in reports {
            let mut buf = [0u8; MAX_FRAME];
            for &byte in encode(&report, &mut buf)?.iter() {
                if let Some(report) = self.controller_rx.push::<Report>(byte) {
                    received.push(report?);
                }
            }
        }
        Ok(received)
    }

    fn shutter_reports(&self, events: &Events) -> Vec<Report> {
        Report::for_events(events, self.shutter_status()).to_vec()
    }

    fn shutter_status(&self) -> Report {
        let shutter = self.driver.shutter();
        Report::Shutter {
            id: SHUTTER_ID,
            state: shutter.state(),
            position: shutter.position(),
            calibrated: shutter.is_calibrated(),
        }
    }

    fn heating_report(&self, id: Id) -> Option<Report> {
        let section = self.heating.section(id)?;
        Some(Report::Heating {
            id,
            setpoint: section.setpoint(),
            heating: section.is_heating(),
        })
    }

    fn heating_reports(&self, changes: &[Change]) -> Vec<Report> {
        changes
            .iter()
            .filter_map(|c| self.heating_report(c.sensor))
            .collect()
    }

    fn dimmer_report(&self) -> Report {
        Report::Dimmer {
            id: DIMMER_ID,
            level: self.dimmer.current_level(),
            on: self.dimmer.is_on(),
        }
    }
}

/// One-line summary of a report, for the prompt.
pub fn describe(report: &Report) -> String {
    match report {
        Report::Shutter {
            state,
            position,
            calibrated,
            ..
        } => {
            let state = match state {
                ShutterState::MovingUp => "moving up",
                ShutterState::MovingDown => "moving down",
                ShutterState::Idle => "idle",
            };
            if *calibrated {
                format!("shutter {state} at {position}%")
            } else {
                format!("shutter {state}, not calibrated")
            }
        }
        Report::CalibrationFailed { .. } => "calibration failed".to_owned(),
        Report::Dimmer { level, on, .. } => {
            format!("dimmer {} at {level}%", if *on { "on" } else { "off" })
        }
        Report::Heating {
            id,
            setpoint,
            heating,
        } => format!(
            "section {id} {} (setpoint {:.1} °C)",
            if *heating { "heating" } else { "off" },
            f32::from(*setpoint) / 10.0
        ),
    }
}
