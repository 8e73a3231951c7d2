//! Test doubles: relays and a delay that record what was done to them.

use core::convert::Infallible;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{OutputPin, PinState};

use crate::store::RamStorage;
use crate::{Config, Shutter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trace {
    Up(PinState),
    Down(PinState),
    Delay(u16),
}

#[derive(Default)]
struct Board {
    trace: Vec<Trace>,
    up: Option<PinState>,
    down: Option<PinState>,
}

/// Shared view of both relays and the delay.
#[derive(Clone, Default)]
pub struct Relays(Rc<RefCell<Board>>);

impl Relays {
    pub fn parts(&self) -> (Relay, Relay, NoDelay) {
        (
            Relay {
                up: true,
                board: self.clone(),
            },
            Relay {
                up: false,
                board: self.clone(),
            },
            NoDelay(self.clone()),
        )
    }

    pub fn trace(&self) -> Vec<Trace> {
        self.0.borrow().trace.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().trace.clear();
    }

    /// Current (UP, DOWN) output levels.
    pub fn levels(&self) -> (PinState, PinState) {
        let board = self.0.borrow();
        (
            board.up.expect("UP relay never switched"),
            board.down.expect("DOWN relay never switched"),
        )
    }
}

pub struct Relay {
    up: bool,
    board: Relays,
}

impl Relay {
    fn set(&mut self, level: PinState) {
        let mut board = self.board.0.borrow_mut();
        if self.up {
            board.up = Some(level);
            board.trace.push(Trace::Up(level));
        } else {
            board.down = Some(level);
            board.trace.push(Trace::Down(level));
        }
    }
}

impl OutputPin for Relay {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.set(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.set(PinState::High);
        Ok(())
    }
}

pub struct NoDelay(Relays);

impl DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.0 .0.borrow_mut().trace.push(Trace::Delay(ms));
    }
}

pub type TestShutter = Shutter<Relay, Relay, NoDelay, RamStorage<1024>>;

pub fn fixture(storage: RamStorage<1024>) -> (TestShutter, Relays) {
    fixture_with(storage, Config::default())
}

pub fn fixture_with(storage: RamStorage<1024>, config: Config) -> (TestShutter, Relays) {
    let relays = Relays::default();
    let (up, down, delay) = relays.parts();
    let shutter = Shutter::new(up, down, delay, storage, config).unwrap();
    (shutter, relays)
}
