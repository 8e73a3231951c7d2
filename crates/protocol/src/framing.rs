use postcard::accumulator::{CobsAccumulator, FeedResult};
use serde::{de::DeserializeOwned, Serialize};

/// Longest encoded frame we expect on the bus, delimiter included.
pub const MAX_FRAME: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("message does not fit in the buffer")]
    Encode,
    #[error("malformed frame")]
    Decode,
    #[error("frame longer than the receive buffer")]
    Overflow,
}

/// Serializes `msg` into `buf` as one COBS frame, trailing zero included.
/// Returns the part of `buf` to send.
pub fn encode<'a, T: Serialize>(msg: &T, buf: &'a mut [u8]) -> Result<&'a mut [u8], Error> {
    postcard::to_slice_cobs(msg, buf).map_err(|e| {
        log::error!("failed to encode a message: {e}");
        Error::Encode
    })
}

/// Decodes a single frame in place. The trailing zero is optional.
pub fn decode<T: DeserializeOwned>(frame: &mut [u8]) -> Result<T, Error> {
    postcard::from_bytes_cobs(frame).map_err(|e| {
        log::debug!("dropping a frame: {e}");
        Error::Decode
    })
}

/// Collects bytes from a serial line and decodes a message each time a
/// frame is complete.
pub struct FrameReader<const N: usize> {
    acc: CobsAccumulator<N>,
    // Set after an overflow; the rest of that frame is skipped.
    skipping: bool,
}

impl<const N: usize> Default for FrameReader<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameReader<N> {
    pub fn new() -> Self {
        FrameReader {
            acc: CobsAccumulator::new(),
            skipping: false,
        }
    }

    /// Feeds one received byte. Returns something once the byte ends a
    /// frame, or when the frame being received has outgrown the buffer.
    pub fn push<T: DeserializeOwned>(&mut self, byte: u8) -> Option<Result<T, Error>> {
        if self.skipping {
            self.skipping = byte != 0;
            return None;
        }
        match self.acc.feed::<T>(&[byte]) {
            FeedResult::Consumed => None,
            FeedResult::Success { data, .. } => Some(Ok(data)),
            FeedResult::DeserError(_) => {
                log::debug!("dropping a malformed frame");
                Some(Err(Error::Decode))
            }
            FeedResult::OverFull(_) => {
                log::warn!("dropping a frame longer than {N} bytes");
                self.skipping = byte != 0;
                Some(Err(Error::Overflow))
            }
        }
    }
}
