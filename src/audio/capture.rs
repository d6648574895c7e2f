use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::{AudioSource, RateConverter, SourceRead};
use crate::codec::{PcmSpec, wav_from_samples};
use crate::error::{Error, Result};
use crate::observability::{CAPTURE_CHUNKS, CAPTURE_READ_ERRORS};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period past the recording cap before a stalled source is abandoned.
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Parameters of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Samples per second.
    pub sample_rate: u32,
    /// Samples per read.
    pub chunk_frames: usize,
    /// Recording cap.
    pub max_duration: Duration,
}

impl CaptureConfig {
    /// 16 kHz mono in 1024-frame chunks, capped at `max_duration`.
    pub fn new(max_duration: Duration) -> Self {
        Self {
            sample_rate: PcmSpec::CAPTURE.sample_rate,
            chunk_frames: 1024,
            max_duration,
        }
    }

    /// The most chunks a recording can hold.
    pub fn max_chunks(&self) -> usize {
        let per_second = self.sample_rate as f64 / self.chunk_frames.max(1) as f64;
        (per_second * self.max_duration.as_secs_f64()) as usize
    }

    fn chunks_per_second(&self) -> usize {
        (self.sample_rate as usize / self.chunk_frames.max(1)).max(1)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// What a recording produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Mono samples at `sample_rate`.
    pub samples: Vec<i16>,
    /// Sample rate of `samples`.
    pub sample_rate: u32,
    /// Chunks read.
    pub chunks: usize,
    /// True if the recording was stopped before the cap.
    pub cancelled: bool,
    /// Transient read failures that were skipped.
    pub read_errors: usize,
}

impl CaptureOutcome {
    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the captured audio.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }

    /// Frame the recording as a 16-bit mono WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        wav_from_samples(
            &self.samples,
            PcmSpec {
                sample_rate: self.sample_rate,
                channels: 1,
            },
        )
    }
}

/// Record from `source` until the cap is reached, the source closes, or `cancel` is set.
///
/// `on_progress(elapsed, remaining)` is called about once per second of captured audio.
/// Read errors are logged and skipped.  Setting `cancel` keeps what was already captured.
pub fn capture<S: AudioSource + ?Sized>(
    source: &mut S,
    config: &CaptureConfig,
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(Duration, Duration),
) -> CaptureOutcome {
    let mut outcome = CaptureOutcome {
        sample_rate: config.sample_rate,
        ..CaptureOutcome::default()
    };
    let max_chunks = config.max_chunks();
    let deadline = Instant::now() + config.max_duration + STALL_GRACE;
    let mut announced = usize::MAX;

    while outcome.chunks < max_chunks {
        if cancel.load(Ordering::Relaxed) {
            outcome.cancelled = true;
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(chunks = outcome.chunks, "audio source stalled; ending recording");
            break;
        }
        if outcome.chunks % config.chunks_per_second() == 0 && announced != outcome.chunks {
            announced = outcome.chunks;
            let elapsed = outcome.duration();
            on_progress(elapsed, config.max_duration.saturating_sub(elapsed));
        }
        match source.read_chunk(config.chunk_frames, POLL_INTERVAL) {
            Ok(SourceRead::Chunk(samples)) => {
                if samples.is_empty() {
                    continue;
                }
                CAPTURE_CHUNKS.click();
                outcome.samples.extend_from_slice(&samples);
                outcome.chunks += 1;
            }
            Ok(SourceRead::Pending) => {}
            Ok(SourceRead::Closed) => break,
            Err(err) => {
                CAPTURE_READ_ERRORS.click();
                outcome.read_errors += 1;
                tracing::warn!(error = %err, "audio read failed; continuing");
            }
        }
    }

    tracing::debug!(
        chunks = outcome.chunks,
        cancelled = outcome.cancelled,
        seconds = outcome.duration().as_secs_f64(),
        "recording finished"
    );
    outcome
}

/// Voice recording for one session.
///
/// The first device failure disables recording.  Later attempts are refused with a
/// precondition error and never touch the device again.
#[derive(Debug, Default)]
pub struct VoiceRecorder {
    unavailable: Option<String>,
}

impl VoiceRecorder {
    /// A recorder that has not failed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false once a device failure has disabled recording.
    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    /// Open a source with `open` and record from it as [`capture`] does.
    pub fn record<S, F>(
        &mut self,
        open: F,
        config: &CaptureConfig,
        cancel: &AtomicBool,
        on_progress: impl FnMut(Duration, Duration),
    ) -> Result<CaptureOutcome>
    where
        S: AudioSource,
        F: FnOnce() -> Result<S>,
    {
        if let Some(reason) = &self.unavailable {
            return Err(Error::precondition(format!(
                "voice input is disabled for this session ({reason})"
            )));
        }
        let mut source = match open() {
            Ok(source) => source,
            Err(err) => {
                if err.is_device() {
                    tracing::warn!(error = %err, "disabling voice input");
                    self.unavailable = Some(err.to_string());
                }
                return Err(err);
            }
        };
        Ok(capture(&mut source, config, cancel, on_progress))
    }
}

/// The default input device, converted to mono at the capture rate.
///
/// The device stream is owned by this value and stops when it is dropped.
pub struct MicrophoneSource {
    _stream: cpal::Stream,
    samples: Receiver<Vec<i16>>,
    errors: Receiver<String>,
    pending: VecDeque<i16>,
}

impl MicrophoneSource {
    /// Open the default input device and start capturing at `sample_rate`.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::device("no input device available", None))?;
        let supported = device.default_input_config().map_err(|e| {
            Error::device(
                format!("failed to query input config: {e}"),
                Some(Box::new(e)),
            )
        })?;
        let config = supported.config();
        tracing::debug!(
            device = %device.name().unwrap_or_default(),
            rate = config.sample_rate.0,
            channels = config.channels,
            "opening input device"
        );

        let (sample_tx, samples) = mpsc::channel();
        let (error_tx, errors) = mpsc::channel();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_input::<f32>(&device, &config, sample_rate, sample_tx, error_tx)?
            }
            cpal::SampleFormat::I16 => {
                build_input::<i16>(&device, &config, sample_rate, sample_tx, error_tx)?
            }
            cpal::SampleFormat::U16 => {
                build_input::<u16>(&device, &config, sample_rate, sample_tx, error_tx)?
            }
            other => {
                return Err(Error::device(
                    format!("unsupported input sample format: {other:?}"),
                    None,
                ));
            }
        };
        stream.play().map_err(|e| {
            Error::device(
                format!("failed to start input stream: {e}"),
                Some(Box::new(e)),
            )
        })?;

        Ok(Self {
            _stream: stream,
            samples,
            errors,
            pending: VecDeque::new(),
        })
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    target_rate: u32,
    sample_tx: mpsc::Sender<Vec<i16>>,
    error_tx: mpsc::Sender<String>,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let mut converter = RateConverter::new(config.sample_rate.0, target_rate)?;
    let mut mono = Vec::new();
    let mut resampled = Vec::new();
    let conversion_errors = error_tx.clone();
    let data_callback = move |data: &[T], _: &cpal::InputCallbackInfo| {
        mono.clear();
        mono.extend(data.chunks(channels).map(|frame| {
            frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
        }));
        resampled.clear();
        if let Err(err) = converter.process(&mono, &mut resampled) {
            let _ = conversion_errors.send(err.to_string());
            return;
        }
        if resampled.is_empty() {
            return;
        }
        let chunk: Vec<i16> = resampled.iter().map(|s| s.to_sample::<i16>()).collect();
        let _ = sample_tx.send(chunk);
    };
    let error_callback = move |err: cpal::StreamError| {
        let _ = error_tx.send(err.to_string());
    };
    device
        .build_input_stream(config, data_callback, error_callback, None)
        .map_err(|e| {
            Error::device(
                format!("failed to build input stream: {e}"),
                Some(Box::new(e)),
            )
        })
}

impl AudioSource for MicrophoneSource {
    fn read_chunk(&mut self, frames: usize, wait: Duration) -> Result<SourceRead> {
        if let Ok(message) = self.errors.try_recv() {
            return Err(Error::device(message, None));
        }
        let deadline = Instant::now() + wait;
        while self.pending.len() < frames {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.samples.recv_timeout(remaining) {
                Ok(samples) => self.pending.extend(samples),
                Err(RecvTimeoutError::Timeout) => return Ok(SourceRead::Pending),
                Err(RecvTimeoutError::Disconnected) => {
                    if self.pending.is_empty() {
                        return Ok(SourceRead::Closed);
                    }
                    return Ok(SourceRead::Chunk(self.pending.drain(..).collect()));
                }
            }
        }
        Ok(SourceRead::Chunk(self.pending.drain(..frames).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_wav;

    struct ScriptedSource {
        reads: VecDeque<Result<SourceRead>>,
        cancel_after: Option<(usize, &'static AtomicBool)>,
        served: usize,
    }

    impl ScriptedSource {
        fn new(reads: Vec<Result<SourceRead>>) -> Self {
            Self {
                reads: reads.into(),
                cancel_after: None,
                served: 0,
            }
        }
    }

    impl AudioSource for ScriptedSource {
        fn read_chunk(&mut self, frames: usize, _: Duration) -> Result<SourceRead> {
            self.served += 1;
            if let Some((after, flag)) = self.cancel_after {
                if self.served >= after {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            match self.reads.pop_front() {
                Some(read) => read,
                None => Ok(SourceRead::Chunk(vec![7; frames])),
            }
        }
    }

    fn quick_config(seconds: u64) -> CaptureConfig {
        CaptureConfig {
            sample_rate: 16_000,
            chunk_frames: 1600,
            max_duration: Duration::from_secs(seconds),
        }
    }

    #[test]
    fn default_config_matches_capture_layout() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.chunk_frames, 1024);
        assert_eq!(config.max_chunks(), 937);
    }

    #[test]
    fn stops_at_cap() {
        let mut source = ScriptedSource::new(vec![]);
        let cancel = AtomicBool::new(false);
        let mut progress = Vec::new();
        let outcome = capture(&mut source, &quick_config(1), &cancel, |elapsed, remaining| {
            progress.push((elapsed, remaining))
        });
        assert_eq!(outcome.chunks, 10);
        assert_eq!(outcome.samples.len(), 16_000);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.duration(), Duration::from_secs(1));
        assert_eq!(progress, vec![(Duration::ZERO, Duration::from_secs(1))]);
    }

    #[test]
    fn cancellation_keeps_captured_audio() {
        static CANCEL: AtomicBool = AtomicBool::new(false);
        let mut source = ScriptedSource::new(vec![]);
        source.cancel_after = Some((3, &CANCEL));
        let outcome = capture(&mut source, &quick_config(60), &CANCEL, |_, _| {});
        assert!(outcome.cancelled);
        assert_eq!(outcome.chunks, 3);
        assert!(!outcome.is_empty());
    }

    #[test]
    fn closed_source_yields_empty_outcome() {
        let mut source = ScriptedSource::new(vec![Ok(SourceRead::Closed)]);
        let cancel = AtomicBool::new(false);
        let outcome = capture(&mut source, &quick_config(60), &cancel, |_, _| {});
        assert!(outcome.is_empty());
        assert_eq!(outcome.chunks, 0);
        assert!(!outcome.cancelled);
    }

    #[test]
    fn read_errors_are_skipped() {
        let mut source = ScriptedSource::new(vec![
            Ok(SourceRead::Chunk(vec![1; 1600])),
            Err(Error::device("input overflowed", None)),
            Ok(SourceRead::Pending),
            Ok(SourceRead::Chunk(vec![2; 1600])),
            Ok(SourceRead::Closed),
        ]);
        let cancel = AtomicBool::new(false);
        let outcome = capture(&mut source, &quick_config(60), &cancel, |_, _| {});
        assert_eq!(outcome.chunks, 2);
        assert_eq!(outcome.read_errors, 1);
        assert_eq!(outcome.samples[0], 1);
        assert_eq!(outcome.samples[1600], 2);
    }

    #[test]
    fn failed_input_device_disables_recording() {
        let mut recorder = VoiceRecorder::new();
        let cancel = AtomicBool::new(false);
        let mut opens = 0;
        let mut open = || {
            opens += 1;
            Err::<ScriptedSource, _>(Error::device("no input device available", None))
        };
        let err = recorder
            .record(&mut open, &quick_config(1), &cancel, |_, _| {})
            .unwrap_err();
        assert!(err.is_device());
        assert!(!recorder.is_available());

        let err = recorder
            .record(&mut open, &quick_config(1), &cancel, |_, _| {})
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("no input device available"), "{err}");
        assert_eq!(opens, 1);
    }

    #[test]
    fn recorder_captures_from_opened_source() {
        let mut recorder = VoiceRecorder::new();
        let cancel = AtomicBool::new(false);
        let outcome = recorder
            .record(
                || Ok(ScriptedSource::new(vec![])),
                &quick_config(1),
                &cancel,
                |_, _| {},
            )
            .unwrap();
        assert_eq!(outcome.chunks, 10);
        assert!(recorder.is_available());
    }

    #[test]
    fn outcome_frames_as_wav() {
        let outcome = CaptureOutcome {
            samples: vec![0, 100, -100],
            sample_rate: 16_000,
            chunks: 1,
            ..CaptureOutcome::default()
        };
        let decoded = decode_wav(&outcome.to_wav().unwrap()).unwrap();
        assert_eq!(decoded.spec, PcmSpec::CAPTURE);
        assert_eq!(decoded.samples, vec![0, 100, -100]);
    }
}
