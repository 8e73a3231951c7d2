/// Everything that can go wrong while controlling a shutter.
///
/// Failures of the hardware collaborators (relays, storage, current sensor)
/// are logged where they happen and then collapsed into a single variant
/// each, so that the controller doesn't need to be generic over their error
/// types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("the shutter has not been calibrated")]
    NotCalibrated,
    #[error("unknown directive {0}")]
    InvalidDirective(u8),
    #[error("position {0} is outside 0..=100")]
    InvalidPosition(u8),
    #[error("travel times must be between 1 and 254 seconds")]
    InvalidTravelTime,
    #[error("auto calibration is disabled in the configuration")]
    AutoCalibrationDisabled,
    #[error("auto calibration needs a current sensor")]
    NoCurrentSensor,
    #[error("a calibration is already running")]
    CalibrationInProgress,
    #[error("the shutter is moving")]
    Moving,
    #[error("the motor did not stall within {0} ms")]
    CalibrationTimeout(u32),
    #[error("calibration was aborted")]
    CalibrationAborted,
    #[error("current sensor failure")]
    Sensor,
    #[error("calibration store failure")]
    Storage,
    #[error("relay output failure")]
    Relay,
}

pub type Result<T> = core::result::Result<T, Error>;
