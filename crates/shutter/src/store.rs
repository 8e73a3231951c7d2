//! The persisted calibration record.
//!
//! Three single-byte fields survive a power loss: the travel time down, the
//! travel time up (both in whole seconds) and the last known position in
//! percent. An erased cell reads back as `0xFF`, which doubles as the
//! "never calibrated" sentinel.

use core::fmt::Debug;

use embedded_storage::{ReadStorage, Storage};
use serde::{Deserialize, Serialize};

use crate::{Direction, Error, Result};

/// Travel time value meaning "no calibration data".
pub const UNSET: u8 = 255;

/// Byte offsets of the three calibration fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub down_time: u32,
    pub up_time: u32,
    pub position: u32,
}

impl Layout {
    /// Three consecutive bytes starting at `base`, down time first.
    pub const fn at(base: u32) -> Self {
        Layout {
            down_time: base,
            up_time: base + 1,
            position: base + 2,
        }
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::at(512)
    }
}

/// Calibrated full-travel durations, in whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelTimes {
    up: u8,
    down: u8,
}

impl TravelTimes {
    pub fn new(up: u8, down: u8) -> Result<Self> {
        let valid = |t: u8| t != 0 && t != UNSET;
        if valid(up) && valid(down) {
            Ok(TravelTimes { up, down })
        } else {
            Err(Error::InvalidTravelTime)
        }
    }

    pub fn up(&self) -> u8 {
        self.up
    }

    pub fn down(&self) -> u8 {
        self.down
    }

    pub fn seconds(&self, direction: Direction) -> u8 {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Full travel in the given direction, in milliseconds.
    pub fn millis(&self, direction: Direction) -> u32 {
        self.seconds(direction) as u32 * 1000
    }
}

/// The raw record, as it sits in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub travel_time_up: u8,
    pub travel_time_down: u8,
    pub position: u8,
}

impl CalibrationData {
    pub const UNCALIBRATED: CalibrationData = CalibrationData {
        travel_time_up: UNSET,
        travel_time_down: UNSET,
        position: 0,
    };

    pub fn calibrated(times: TravelTimes, position: u8) -> Self {
        CalibrationData {
            travel_time_up: times.up,
            travel_time_down: times.down,
            position,
        }
    }

    /// The travel times, if the record holds a usable calibration.
    pub fn travel_times(&self) -> Option<TravelTimes> {
        TravelTimes::new(self.travel_time_up, self.travel_time_down).ok()
    }
}

/// Reads and writes a [`CalibrationData`] record at a fixed [`Layout`].
pub struct CalibrationStore<S> {
    storage: S,
    layout: Layout,
}

impl<S> CalibrationStore<S>
where
    S: Storage,
    S::Error: Debug,
{
    pub fn new(storage: S, layout: Layout) -> Self {
        Self { storage, layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    pub fn load(&mut self) -> Result<CalibrationData> {
        Ok(CalibrationData {
            travel_time_up: self.read_byte(self.layout.up_time)?,
            travel_time_down: self.read_byte(self.layout.down_time)?,
            position: self.read_byte(self.layout.position)?,
        })
    }

    /// Writes all three fields.
    pub fn save(&mut self, data: &CalibrationData) -> Result<()> {
        self.write_byte(self.layout.down_time, data.travel_time_down)?;
        self.write_byte(self.layout.up_time, data.travel_time_up)?;
        self.write_byte(self.layout.position, data.position)
    }

    pub fn save_position(&mut self, position: u8) -> Result<()> {
        self.write_byte(self.layout.position, position)
    }

    fn read_byte(&mut self, offset: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.storage.read(offset, &mut buf).map_err(|e| {
            log::error!("failed to read calibration byte at {offset}: {e:?}");
            Error::Storage
        })?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, offset: u32, value: u8) -> Result<()> {
        self.storage.write(offset, &[value]).map_err(|e| {
            log::error!("failed to write calibration byte at {offset}: {e:?}");
            Error::Storage
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutOfBounds;

/// Byte-addressed storage in RAM that starts out erased, like a fresh
/// EEPROM.
#[derive(Clone, Debug)]
pub struct RamStorage<const N: usize> {
    bytes: [u8; N],
}

impl<const N: usize> RamStorage<N> {
    pub fn new() -> Self {
        Self { bytes: [0xFF; N] }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn range(offset: u32, len: usize) -> core::result::Result<core::ops::Range<usize>, OutOfBounds> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(OutOfBounds)?;
        if end > N {
            return Err(OutOfBounds);
        }
        Ok(start..end)
    }
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReadStorage for RamStorage<N> {
    type Error = OutOfBounds;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> core::result::Result<(), OutOfBounds> {
        let range = Self::range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Storage for RamStorage<N> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> core::result::Result<(), OutOfBounds> {
        let range = Self::range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_store_is_uncalibrated() {
        let mut store = CalibrationStore::new(RamStorage::<1024>::new(), Layout::default());
        let data = store.load().unwrap();
        assert_eq!(data.travel_time_up, UNSET);
        assert_eq!(data.travel_time_down, UNSET);
        assert_eq!(data.travel_times(), None);
    }

    #[test]
    fn fields_land_at_their_offsets() {
        let mut store = CalibrationStore::new(RamStorage::<8>::new(), Layout::at(2));
        let times = TravelTimes::new(20, 22).unwrap();
        store.save(&CalibrationData::calibrated(times, 40)).unwrap();
        assert_eq!(&store.storage().as_bytes()[2..5], &[22, 20, 40]);

        store.save_position(41).unwrap();
        assert_eq!(store.load().unwrap().position, 41);
    }

    #[test]
    fn travel_time_bounds() {
        assert_eq!(TravelTimes::new(0, 10), Err(Error::InvalidTravelTime));
        assert_eq!(TravelTimes::new(10, UNSET), Err(Error::InvalidTravelTime));
        let t = TravelTimes::new(1, 254).unwrap();
        assert_eq!(t.millis(Direction::Up), 1000);
        assert_eq!(t.millis(Direction::Down), 254_000);
    }

    #[test]
    fn out_of_range_access_is_a_storage_error() {
        let mut store = CalibrationStore::new(RamStorage::<4>::new(), Layout::at(3));
        assert_eq!(store.load(), Err(Error::Storage));
    }

    #[test]
    fn half_written_record_is_not_calibrated() {
        // Power lost after the down time made it to the store.
        let mut store = CalibrationStore::new(RamStorage::<8>::new(), Layout::at(0));
        store.storage.write(0, &[22]).unwrap();
        assert_eq!(store.load().unwrap().travel_times(), None);
    }
}
