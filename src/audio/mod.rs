//! Audio device adapters.
//!
//! Capture reads mono 16-bit samples from an [`AudioSource`]; playback writes 16-bit PCM
//! chunks to a [`ChunkPlayer`].  The `cpal`-backed implementations convert between the
//! fixed wire layouts (16 kHz capture, 24 kHz response) and whatever the default device
//! offers.

mod capture;
mod playback;

use std::time::Duration;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Error, Result};

pub use capture::{CaptureConfig, CaptureOutcome, MicrophoneSource, VoiceRecorder, capture};
pub use playback::{NullPlayer, StreamingOutput, play_wav};

/// The result of one read from an [`AudioSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRead {
    /// Up to the requested number of mono samples.
    Chunk(Vec<i16>),
    /// Nothing arrived within the wait.
    Pending,
    /// The source will produce no more samples.
    Closed,
}

/// A source of mono 16-bit samples at the capture rate.
pub trait AudioSource {
    /// Read up to `frames` samples, waiting at most `wait`.
    ///
    /// An error is a transient read failure; callers may keep reading.
    fn read_chunk(&mut self, frames: usize, wait: Duration) -> Result<SourceRead>;
}

/// A sink for 16-bit little-endian PCM chunks.
pub trait ChunkPlayer {
    /// Queue `pcm` behind every chunk written before it.
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<()>;

    /// Block until queued audio has played.
    fn finish(&mut self) {}

    /// Release the device.  Further writes may reopen it.
    fn teardown(&mut self) {}
}

impl<P: ChunkPlayer + ?Sized> ChunkPlayer for Box<P> {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<()> {
        (**self).write_chunk(pcm)
    }

    fn finish(&mut self) {
        (**self).finish()
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}

/// Frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 256;

/// Chunked mono sample-rate conversion.
///
/// Input is buffered until the resampler has a full chunk, so a stream converted piece by
/// piece keeps its filter state.  [`RateConverter::flush`] pads and drains the remainder.
pub(crate) struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl RateConverter {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let resampler = if from_rate == to_rate {
            None
        } else {
            let ratio = to_rate.max(1) as f64 / from_rate.max(1) as f64;
            let resampler =
                FastFixedIn::<f32>::new(ratio, 1.1, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
                    .map_err(|e| {
                        Error::device(
                            format!("failed to create resampler: {e}"),
                            Some(Box::new(e)),
                        )
                    })?;
            Some(resampler)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    /// Convert `input`, appending every complete output chunk to `out`.
    pub(crate) fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };
        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let frames = resampler
                .process(&[&self.pending[consumed..consumed + needed]], None)
                .map_err(resample_error)?;
            if let Some(channel) = frames.first() {
                out.extend_from_slice(channel);
            }
            consumed += needed;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Convert whatever is still buffered.
    pub(crate) fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let tail: [&[f32]; 1] = [&self.pending[..]];
        let frames = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(resample_error)?;
        if let Some(channel) = frames.first() {
            out.extend_from_slice(channel);
        }
        self.pending.clear();
        Ok(())
    }
}

fn resample_error(err: rubato::ResampleError) -> Error {
    Error::device(format!("resampling failed: {err}"), Some(Box::new(err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rates_pass_through() {
        let mut converter = RateConverter::new(24_000, 24_000).unwrap();
        let mut out = Vec::new();
        converter.process(&[0.1, 0.2, 0.3], &mut out).unwrap();
        converter.flush(&mut out).unwrap();
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn input_waits_for_a_full_chunk() {
        let mut converter = RateConverter::new(48_000, 16_000).unwrap();
        let mut out = Vec::new();
        converter.process(&[0.0; 100], &mut out).unwrap();
        assert!(out.is_empty());
        converter.flush(&mut out).unwrap();
        assert!(!out.is_empty());
    }

    #[test]
    fn upsampling_scales_length() {
        let mut converter = RateConverter::new(24_000, 48_000).unwrap();
        let input: Vec<f32> = (0..RESAMPLE_CHUNK * 8)
            .map(|i| (i as f32 / 50.0).sin() * 0.5)
            .collect();
        let mut out = Vec::new();
        for piece in input.chunks(100) {
            converter.process(piece, &mut out).unwrap();
        }
        let expected = input.len() * 2;
        assert!(out.len().abs_diff(expected) <= RESAMPLE_CHUNK * 2, "{}", out.len());
    }
}
