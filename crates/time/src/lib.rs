//! Millisecond timestamps from a free-running counter.
//!
//! The boards this runs on only have a 32-bit millisecond counter, which
//! wraps after about 49 days. Every comparison between two readings goes
//! through [`Millis::since`], so intervals stay correct across the wrap as
//! long as they are shorter than the counter period.

#![cfg_attr(not(feature = "std"), no_std)]

use core::ops::Add;

use serde::{Deserialize, Serialize};

/// A reading of the millisecond counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Millis(pub u32);

impl Millis {
    pub const ZERO: Millis = Millis(0);

    /// Milliseconds elapsed from `earlier` to `self`.
    pub fn since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Has `deadline` been reached, assuming it was set less than half a
    /// counter period ago?
    pub fn is_reached(self, deadline: Millis) -> bool {
        // Reinterpreting the difference as signed tells us which side of the
        // deadline we're on, even if the counter wrapped in between.
        (self.0.wrapping_sub(deadline.0) as i32) >= 0
    }
}

impl Add<u32> for Millis {
    type Output = Millis;

    fn add(self, ms: u32) -> Millis {
        Millis(self.0.wrapping_add(ms))
    }
}

impl From<u32> for Millis {
    fn from(ms: u32) -> Self {
        Millis(ms)
    }
}

/// An interval that started at some instant and lasts a fixed number of
/// milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    pub start: Millis,
    pub duration_ms: u32,
}

impl Deadline {
    pub fn new(start: Millis, duration_ms: u32) -> Self {
        Self { start, duration_ms }
    }

    pub fn elapsed(&self, now: Millis) -> u32 {
        now.since(self.start)
    }

    pub fn remaining(&self, now: Millis) -> u32 {
        self.duration_ms.saturating_sub(self.elapsed(now))
    }

    pub fn expired(&self, now: Millis) -> bool {
        self.elapsed(now) >= self.duration_ms
    }
}
