use gowired_time::Millis;
use serde::{Deserialize, Serialize};

use crate::Debouncer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonEvent {
    /// Pressed and released before the long-press time.
    Click,
    /// Held for the long-press time. Fires once per press, while the button
    /// is still down; the release that follows is not a click.
    LongPress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub debounce_ms: u32,
    pub long_press_ms: u32,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        ButtonConfig {
            debounce_ms: 50,
            long_press_ms: 1000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Button {
    debouncer: Debouncer,
    long_press_ms: u32,
    pressed_at: Option<Millis>,
    long_fired: bool,
}

impl Button {
    pub fn new(config: ButtonConfig) -> Self {
        Button {
            debouncer: Debouncer::new(config.debounce_ms, false),
            long_press_ms: config.long_press_ms,
            pressed_at: None,
            long_fired: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.debouncer.level()
    }

    /// `pressed` is the logical state of the button, so an active-low
    /// button wired to a pull-up should pass `pin.is_low()`.
    pub fn poll(&mut self, now: Millis, pressed: bool) -> Option<ButtonEvent> {
        match self.debouncer.update(now, pressed) {
            Some(true) => {
                self.pressed_at = Some(now);
                self.long_fired = false;
                None
            }
            Some(false) => {
                let was_pressed = self.pressed_at.take().is_some();
                (was_pressed && !self.long_fired).then_some(ButtonEvent::Click)
            }
            None => {
                let at = self.pressed_at?;
                if self.long_fired || now.since(at) < self.long_press_ms {
                    return None;
                }
                self.long_fired = true;
                log::debug!("long press after {} ms", now.since(at));
                Some(ButtonEvent::LongPress)
            }
        }
    }
}
