use embedded_hal::digital::v2::PinState;
use serde::{Deserialize, Serialize};

use crate::store::Layout;

/// Which output level switches a relay on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayPolarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl RelayPolarity {
    pub fn on_level(self) -> PinState {
        match self {
            RelayPolarity::ActiveHigh => PinState::High,
            RelayPolarity::ActiveLow => PinState::Low,
        }
    }

    pub fn off_level(self) -> PinState {
        !self.on_level()
    }
}

pub struct ConfigBuilder {
    polarity: RelayPolarity,
    layout: Layout,
    auto_calibrate: bool,
    calibration_samples: u8,
    current_threshold: f32,
    settle_ms: u16,
    inrush_ms: u32,
    stall_window_ms: u32,
    pause_ms: u32,
    calibration_timeout_ms: u32,
    uncalibrated_run_ms: u32,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            polarity: RelayPolarity::ActiveHigh,
            layout: Layout::default(),
            auto_calibrate: false,
            calibration_samples: 2,
            current_threshold: 0.2,
            settle_ms: 20,
            inrush_ms: 100,
            stall_window_ms: 300,
            pause_ms: 1000,
            calibration_timeout_ms: 255_000,
            uncalibrated_run_ms: 60_000,
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Config {
        Config {
            polarity: self.polarity,
            layout: self.layout,
            auto_calibrate: self.auto_calibrate,
            calibration_samples: self.calibration_samples.max(1),
            current_threshold: self.current_threshold,
            settle_ms: self.settle_ms,
            inrush_ms: self.inrush_ms,
            stall_window_ms: self.stall_window_ms,
            pause_ms: self.pause_ms,
            calibration_timeout_ms: self.calibration_timeout_ms,
            uncalibrated_run_ms: self.uncalibrated_run_ms,
        }
    }

    pub fn with_polarity(&mut self, polarity: RelayPolarity) -> &mut Self {
        self.polarity = polarity;
        self
    }

    pub fn with_layout(&mut self, layout: Layout) -> &mut Self {
        self.layout = layout;
        self
    }

    pub fn with_auto_calibration(&mut self, enabled: bool) -> &mut Self {
        self.auto_calibrate = enabled;
        self
    }

    pub fn with_calibration_samples(&mut self, samples: u8) -> &mut Self {
        self.calibration_samples = samples;
        self
    }

    pub fn with_current_threshold(&mut self, amps: f32) -> &mut Self {
        self.current_threshold = amps;
        self
    }

    pub fn with_settle_ms(&mut self, ms: u16) -> &mut Self {
        self.settle_ms = ms;
        self
    }

    pub fn with_inrush_ms(&mut self, ms: u32) -> &mut Self {
        self.inrush_ms = ms;
        self
    }

    pub fn with_stall_window_ms(&mut self, ms: u32) -> &mut Self {
        self.stall_window_ms = ms;
        self
    }

    pub fn with_pause_ms(&mut self, ms: u32) -> &mut Self {
        self.pause_ms = ms;
        self
    }

    pub fn with_calibration_timeout_ms(&mut self, ms: u32) -> &mut Self {
        self.calibration_timeout_ms = ms;
        self
    }

    pub fn with_uncalibrated_run_ms(&mut self, ms: u32) -> &mut Self {
        self.uncalibrated_run_ms = ms;
        self
    }
}

/// Per-shutter configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Output level that energizes the UP and DOWN relays.
    pub polarity: RelayPolarity,
    /// Where the calibration record lives in the store. Every shutter on a
    /// device needs its own layout.
    pub layout: Layout,
    /// Whether the current-sensing calibration may be used.
    pub auto_calibrate: bool,
    /// How many down/up round trips an auto calibration averages over.
    pub calibration_samples: u8,
    /// Motor current (in amps) below which the motor is considered stalled
    /// against an end stop.
    pub current_threshold: f32,
    /// Pause between switching one relay off and the other one on.
    pub settle_ms: u16,
    /// Current readings taken this soon after energizing a relay are
    /// ignored; the motor hasn't spun up yet.
    pub inrush_ms: u32,
    /// How long the current has to stay below the threshold before we
    /// believe the motor has stalled.
    pub stall_window_ms: u32,
    /// Rest between the legs of an auto calibration.
    pub pause_ms: u32,
    /// Upper bound on a single calibration leg.
    pub calibration_timeout_ms: u32,
    /// Advisory duration for moves requested before the shutter is
    /// calibrated. The motor's own limit switches end the travel.
    pub uncalibrated_run_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}
