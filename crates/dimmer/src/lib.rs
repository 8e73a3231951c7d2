//! Smooth dimming for LED strips with one to four PWM channels.
//!
//! A [`Dimmer`] has an overall level in percent and one value per channel
//! (the colour). Both fade towards their targets one `step` per
//! `interval_ms`, and the duty cycle of each channel is
//! `level * value / 100`. The dimmer only computes duties; writing them to
//! the PWM peripheral is up to the caller.

#![cfg_attr(not(feature = "std"), no_std)]

use gowired_time::Millis;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ColorError {
    #[error("expected RRGGBB or #RRGGBBWW, got {0} characters")]
    Length(usize),
    #[error("not a hex colour")]
    Digit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimmerConfig {
    pub step: u8,
    pub interval_ms: u32,
}

impl Default for DimmerConfig {
    fn default() -> Self {
        DimmerConfig {
            step: 1,
            interval_ms: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Dimmer<const N: usize> {
    config: DimmerConfig,
    on: bool,
    // Level to return to when switched on.
    level: u8,
    current_level: u8,
    values: [u8; N],
    targets: [u8; N],
    last_step: Option<Millis>,
}

impl<const N: usize> Dimmer<N> {
    /// A dimmer that is off, set to full level and full white.
    pub fn new(config: DimmerConfig) -> Self {
        Dimmer {
            config: DimmerConfig {
                step: config.step.max(1),
                ..config
            },
            on: false,
            level: 100,
            current_level: 0,
            values: [u8::MAX; N],
            targets: [u8::MAX; N],
            last_step: None,
        }
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// The level the dimmer is set to (or will return to when switched on).
    pub fn level(&self) -> u8 {
        self.level
    }

    /// The level right now, part way through a fade.
    pub fn current_level(&self) -> u8 {
        self.current_level
    }

    pub fn color(&self) -> [u8; N] {
        self.targets
    }

    /// Levels above 100 are treated as 100.
    pub fn set_level(&mut self, level: u8) {
        self.level = level.min(100);
    }

    /// Switching off fades to zero but remembers the level, so switching on
    /// again fades back to it.
    pub fn set_status(&mut self, on: bool) {
        self.on = on;
    }

    pub fn set_color(&mut self, color: [u8; N]) {
        self.targets = color;
    }

    /// Takes a colour in the form [`parse_color`] accepts. Channels beyond
    /// the dimmer's are ignored.
    pub fn set_color_hex(&mut self, hex: &str) -> Result<(), ColorError> {
        let rgbw = parse_color(hex)?;
        for (target, value) in self.targets.iter_mut().zip(rgbw) {
            *target = value;
        }
        log::debug!("new colour {:?}", self.targets);
        Ok(())
    }

    pub fn is_settled(&self) -> bool {
        self.current_level == self.target_level() && self.values == self.targets
    }

    /// Takes at most one fade step, if one is due. Returns the new duty of
    /// every channel when anything moved.
    pub fn poll(&mut self, now: Millis) -> Option<[u8; N]> {
        if self.is_settled() {
            self.last_step = None;
            return None;
        }
        if let Some(last) = self.last_step {
            if now.since(last) < self.config.interval_ms {
                return None;
            }
        }
        self.last_step = Some(now);

        let step = self.config.step;
        self.current_level = approach(self.current_level, self.target_level(), step);
        for (value, target) in self.values.iter_mut().zip(self.targets) {
            *value = approach(*value, target, step);
        }
        Some(self.duties())
    }

    pub fn duties(&self) -> [u8; N] {
        self.values
            .map(|v| (self.current_level as u16 * v as u16 / 100) as u8)
    }

    fn target_level(&self) -> u8 {
        if self.on {
            self.level
        } else {
            0
        }
    }
}

/// Parses `RRGGBB` (white set to 0) or `#RRGGBBWW` into RGBW values.
pub fn parse_color(hex: &str) -> Result<[u8; 4], ColorError> {
    let digits = match hex.len() {
        6 => hex,
        9 if hex.starts_with('#') => &hex[1..],
        len => return Err(ColorError::Length(len)),
    };
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ColorError::Digit);
    }

    let mut rgbw = [0u8; 4];
    for (i, byte) in rgbw.iter_mut().enumerate().take(digits.len() / 2) {
        *byte = u8::from_str_radix(&digits[2 * i..2 * i + 2], 16).map_err(|_| ColorError::Digit)?;
    }
    Ok(rgbw)
}

fn approach(from: u8, to: u8, step: u8) -> u8 {
    if from < to {
        from.saturating_add(step).min(to)
    } else {
        from.saturating_sub(step).max(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run<const N: usize>(dimmer: &mut Dimmer<N>, mut now: Millis) -> (Millis, [u8; N]) {
        let mut duties = dimmer.duties();
        while !dimmer.is_settled() {
            if let Some(d) = dimmer.poll(now) {
                duties = d;
            }
            now = now + 1;
        }
        (now, duties)
    }

    #[test]
    fn fades_in_one_step_per_interval() {
        let mut d = Dimmer::<1>::new(DimmerConfig::default());
        d.set_level(50);
        d.set_status(true);
        assert_eq!(d.poll(Millis(0)), Some([2]));
        assert_eq!(d.poll(Millis(19)), None);
        assert_eq!(d.poll(Millis(20)), Some([5]));
        let (end, duties) = run(&mut d, Millis(21));
        assert_eq!(duties, [127]);
        assert!(end.0 >= 49 * 20);
    }

    #[test]
    fn off_remembers_the_level() {
        let mut d = Dimmer::<3>::new(DimmerConfig { step: 10, interval_ms: 1 });
        d.set_level(40);
        d.set_status(true);
        run(&mut d, Millis(0));
        d.set_status(false);
        assert_eq!(run(&mut d, Millis(100)).1, [0; 3]);
        assert_eq!(d.level(), 40);
        d.set_status(true);
        assert_eq!(run(&mut d, Millis(200)).1, [102; 3]);
    }

    #[test]
    fn colour_from_hex() {
        let mut d = Dimmer::<4>::new(DimmerConfig::default());
        d.set_color_hex("FF8000").unwrap();
        assert_eq!(d.color(), [255, 128, 0, 0]);
        d.set_color_hex("#0a0B0c7f").unwrap();
        assert_eq!(d.color(), [10, 11, 12, 127]);

        assert_eq!(d.set_color_hex("FF80"), Err(ColorError::Length(4)));
        assert_eq!(d.set_color_hex("+F8000"), Err(ColorError::Digit));
        assert_eq!(d.set_color_hex("0A0B0C7F0"), Err(ColorError::Length(9)));
        assert_eq!(d.color(), [10, 11, 12, 127]);
    }

    #[test]
    fn rgb_dimmer_ignores_white() {
        let mut d = Dimmer::<3>::new(DimmerConfig::default());
        d.set_color_hex("#01020304").unwrap();
        assert_eq!(d.color(), [1, 2, 3]);
    }

    proptest! {
        #[test]
        fn fades_reach_their_targets(level in 0u8..=120, color: [u8; 3], step in 1u8..=50) {
            let mut d = Dimmer::<3>::new(DimmerConfig { step, interval_ms: 5 });
            d.set_level(level);
            d.set_color(color);
            d.set_status(true);
            let (_, duties) = run(&mut d, Millis(0));
            let level = level.min(100) as u16;
            for (duty, value) in duties.iter().zip(color) {
                prop_assert_eq!(*duty as u16, level * value as u16 / 100);
            }
        }
    }
}
