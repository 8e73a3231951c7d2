//! Messages exchanged with GoWired nodes over the RS-485 bus.
//!
//! Messages are serialized with `postcard` and framed with COBS, so a zero
//! byte always ends a frame and a receiver that joins mid-stream resyncs on
//! the next one. See [`encode`], [`decode`] and [`FrameReader`].

#![cfg_attr(not(feature = "std"), no_std)]

use gowired_shutter::{Direction, Directive, Event, Request, ShutterState};
use serde::{Deserialize, Serialize};

mod framing;

pub use framing::{decode, encode, Error, FrameReader, MAX_FRAME};

/// Bus address of a shutter or dimmer within a node.
pub type Id = u8;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterAction {
    Up,
    Down,
    Stop,
    SetPosition(u8),
    // Travel times in whole seconds.
    Calibrate { up: u8, down: u8 },
    AutoCalibrate,
}

impl From<ShutterAction> for Request {
    fn from(action: ShutterAction) -> Request {
        match action {
            ShutterAction::Up => Request::Directive(Directive::Up),
            ShutterAction::Down => Request::Directive(Directive::Down),
            ShutterAction::Stop => Request::Directive(Directive::Stop),
            ShutterAction::SetPosition(p) => Request::Position(p),
            ShutterAction::Calibrate { up, down } => Request::Calibrate { up, down },
            ShutterAction::AutoCalibrate => Request::AutoCalibrate,
        }
    }
}

impl From<Direction> for ShutterAction {
    fn from(direction: Direction) -> ShutterAction {
        match direction {
            Direction::Up => ShutterAction::Up,
            Direction::Down => ShutterAction::Down,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimmerAction {
    SetLevel(u8),
    SetStatus(bool),
    // RGBW; dimmers with fewer channels ignore the tail.
    SetColor([u8; 4]),
}

/// Temperatures are in tenths of a degree Celsius.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatingAction {
    SetPoint(i16),
    // The rest apply to every section of the node.
    Master(bool),
    Hysteresis(u16),
}

/// From the controller to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    Shutter { id: Id, action: ShutterAction },
    Dimmer { id: Id, action: DimmerAction },
    /// `id` is the sensor id of the heating section.
    Heating { id: Id, action: HeatingAction },
    /// A reading from a remote temperature sensor, passed on to whichever
    /// heating section listens to it.
    Temperature { sensor: Id, value: i16 },
    QueryStatus,
}

/// From a node back to the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Report {
    Shutter {
        id: Id,
        state: ShutterState,
        position: u8,
        calibrated: bool,
    },
    CalibrationFailed {
        id: Id,
    },
    Dimmer {
        id: Id,
        level: u8,
        on: bool,
    },
    Heating {
        id: Id,
        setpoint: i16,
        heating: bool,
    },
}

impl Report {
    /// What a node tells the bus after its shutter driver reported `events`:
    /// a failure notice if a calibration failed, then the shutter's current
    /// status if anything changed at all.
    pub fn for_events(events: &[Event], status: Report) -> heapless::Vec<Report, 2> {
        let mut reports = heapless::Vec::new();
        let Report::Shutter { id, .. } = status else {
            return reports;
        };
        if events
            .iter()
            .any(|e| matches!(e, Event::CalibrationFailed(_)))
        {
            let _ = reports.push(Report::CalibrationFailed { id });
        }
        if !events.is_empty() {
            let _ = reports.push(status);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_map_to_requests() {
        assert_eq!(
            Request::from(ShutterAction::Stop),
            Request::Directive(Directive::Stop)
        );
        assert_eq!(
            Request::from(ShutterAction::SetPosition(40)),
            Request::Position(40)
        );
        assert_eq!(
            Request::from(ShutterAction::Calibrate { up: 20, down: 22 }),
            Request::Calibrate { up: 20, down: 22 }
        );
        assert_eq!(ShutterAction::from(Direction::Down), ShutterAction::Down);
    }

    #[test]
    fn reports_for_driver_events() {
        let status = Report::Shutter {
            id: 3,
            state: ShutterState::Idle,
            position: 0,
            calibrated: true,
        };
        assert!(Report::for_events(&[], status).is_empty());
        assert_eq!(
            Report::for_events(&[Event::PositionChanged(0)], status).as_slice(),
            &[status]
        );
        let failed = [
            Event::StateChanged(ShutterState::Idle),
            Event::CalibrationFailed(gowired_shutter::Error::CalibrationTimeout(1000)),
        ];
        assert_eq!(
            Report::for_events(&failed, status).as_slice(),
            &[Report::CalibrationFailed { id: 3 }, status]
        );
    }
}
