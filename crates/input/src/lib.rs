//! Digital inputs: debounced levels and push buttons with a long-press
//! action.
//!
//! Everything here is polled. Read the pin, pass its level in together with
//! the current time, and act on whatever comes back. Nothing blocks while a
//! button is held down.

#![cfg_attr(not(feature = "std"), no_std)]

mod button;

pub use button::{Button, ButtonConfig, ButtonEvent};
pub use gowired_time::Millis;

/// Filters out contact bounce: a new level is only believed once it has
/// held for `debounce_ms`.
#[derive(Clone, Debug)]
pub struct Debouncer {
    debounce_ms: u32,
    stable: bool,
    candidate: bool,
    since: Millis,
}

impl Debouncer {
    pub fn new(debounce_ms: u32, initial: bool) -> Self {
        Debouncer {
            debounce_ms,
            stable: initial,
            candidate: initial,
            since: Millis::ZERO,
        }
    }

    /// The last level that was stable for long enough.
    pub fn level(&self) -> bool {
        self.stable
    }

    /// Feeds in a raw reading. Returns the new stable level when it changes.
    pub fn update(&mut self, now: Millis, level: bool) -> Option<bool> {
        if level != self.candidate {
            self.candidate = level;
            self.since = now;
        }
        if self.candidate != self.stable && now.since(self.since) >= self.debounce_ms {
            self.stable = self.candidate;
            return Some(self.stable);
        }
        None
    }
}
