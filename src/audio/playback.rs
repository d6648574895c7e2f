use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};

use super::{ChunkPlayer, RateConverter};
use crate::codec::{PcmSpec, decode_wav, pcm_to_samples, samples_to_pcm};
use crate::error::{Error, Result};
use crate::observability::{PLAYBACK_CHUNKS, PLAYBACK_FAILURES};

const DRAIN_POLL: Duration = Duration::from_millis(20);
const DRAIN_SLACK: Duration = Duration::from_secs(1);

type SampleQueue = Arc<Mutex<VecDeque<f32>>>;

/// A player that discards everything written to it.
#[derive(Debug, Default)]
pub struct NullPlayer {
    /// Bytes written so far.
    pub bytes: usize,
}

impl ChunkPlayer for NullPlayer {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<()> {
        self.bytes += pcm.len();
        Ok(())
    }
}

/// Chunked playback on the default output device.
///
/// The device is opened on the first write and held until [`ChunkPlayer::teardown`] or drop.
/// Chunks play strictly in the order they were written.  After a device failure the first
/// error is returned and later writes are dropped silently for the life of the value, even
/// across teardown.  Keep one value per session so a missing device is reported once.
pub struct StreamingOutput {
    spec: PcmSpec,
    open: fn(PcmSpec) -> Result<OutputDevice>,
    device: Option<OutputDevice>,
    disabled: bool,
}

struct OutputDevice {
    queue: SampleQueue,
    failed: Arc<AtomicBool>,
    converter: ChunkConverter,
    device_rate: u32,
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamingOutput {
    /// A player for PCM laid out as `spec`.
    pub fn new(spec: PcmSpec) -> Self {
        Self::with_opener(spec, OutputDevice::open)
    }

    fn with_opener(spec: PcmSpec, open: fn(PcmSpec) -> Result<OutputDevice>) -> Self {
        Self {
            spec,
            open,
            device: None,
            disabled: false,
        }
    }

    /// A player for response audio (24 kHz mono).
    pub fn for_responses() -> Self {
        Self::new(PcmSpec::RESPONSE)
    }

    /// Returns true if the output device is currently held.
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Returns true if a device failure disabled this player.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn disable(&mut self, err: Error) -> Error {
        PLAYBACK_FAILURES.click();
        tracing::warn!(error = %err, "disabling audio playback");
        self.teardown();
        self.disabled = true;
        err
    }
}

impl ChunkPlayer for StreamingOutput {
    fn write_chunk(&mut self, pcm: &[u8]) -> Result<()> {
        if self.disabled || pcm.is_empty() {
            return Ok(());
        }
        if self.device.is_none() {
            match (self.open)(self.spec) {
                Ok(device) => self.device = Some(device),
                Err(err) => return Err(self.disable(err)),
            }
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };
        if device.failed.load(Ordering::Relaxed) {
            return Err(self.disable(Error::device("output stream failed", None)));
        }
        let samples = match device.converter.convert(pcm) {
            Ok(samples) => samples,
            Err(err) => return Err(self.disable(err)),
        };
        device.enqueue(samples);
        PLAYBACK_CHUNKS.click();
        Ok(())
    }

    fn finish(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.converter.flush() {
            Ok(tail) => device.enqueue(tail),
            Err(err) => tracing::warn!(error = %err, "dropping unconverted audio tail"),
        }
        let queued = device
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        let frames = queued / device.converter.channels.max(1);
        let deadline = Instant::now()
            + Duration::from_secs_f64(frames as f64 / device.device_rate.max(1) as f64)
            + DRAIN_SLACK;
        while Instant::now() < deadline && !device.failed.load(Ordering::Relaxed) {
            let empty = device
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .is_empty();
            if empty {
                break;
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
            tracing::debug!("released output device");
        }
    }
}

impl Drop for StreamingOutput {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl OutputDevice {
    /// Open the default output device on a dedicated thread that owns the stream.
    fn open(spec: PcmSpec) -> Result<Self> {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u16, u32)>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_queue = Arc::clone(&queue);
        let thread_failed = Arc::clone(&failed);
        let thread = thread::Builder::new()
            .name("omnichat-playback".to_string())
            .spawn(move || {
                let stream = match build_output(thread_queue, thread_failed) {
                    Ok((stream, channels, rate)) => {
                        let _ = ready_tx.send(Ok((channels, rate)));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                // Hold the stream until the owner hangs up.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::io("failed to spawn playback thread", e))?;

        let (channels, device_rate) = match ready_rx.recv() {
            Ok(Ok(layout)) => layout,
            Ok(Err(err)) => {
                let _ = thread.join();
                return Err(err);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::device("playback thread exited early", None));
            }
        };
        let converter = match ChunkConverter::new(spec, device_rate, channels as usize) {
            Ok(converter) => converter,
            Err(err) => {
                drop(shutdown_tx);
                let _ = thread.join();
                return Err(err);
            }
        };
        tracing::debug!(channels, rate = device_rate, "opened output device");

        Ok(Self {
            queue,
            failed,
            converter,
            device_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn enqueue(&self, samples: Vec<f32>) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(samples);
    }

    fn close(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_output(queue: SampleQueue, failed: Arc<AtomicBool>) -> Result<(cpal::Stream, u16, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::device("no output device available", None))?;
    let supported = device.default_output_config().map_err(|e| {
        Error::device(
            format!("failed to query output config: {e}"),
            Some(Box::new(e)),
        )
    })?;
    let config = supported.config();
    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_output_stream::<f32>(&device, &config, queue, failed)?,
        cpal::SampleFormat::I16 => build_output_stream::<i16>(&device, &config, queue, failed)?,
        cpal::SampleFormat::U16 => build_output_stream::<u16>(&device, &config, queue, failed)?,
        other => {
            return Err(Error::device(
                format!("unsupported output sample format: {other:?}"),
                None,
            ));
        }
    };
    stream.play().map_err(|e| {
        Error::device(
            format!("failed to start output stream: {e}"),
            Some(Box::new(e)),
        )
    })?;
    Ok((stream, config.channels, config.sample_rate.0))
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: SampleQueue,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let data_callback = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let mut queue = queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for sample in data.iter_mut() {
            *sample = <T as Sample>::from_sample(queue.pop_front().unwrap_or(0.0));
        }
    };
    let error_callback = move |err: cpal::StreamError| {
        tracing::warn!(error = %err, "output stream error");
        failed.store(true, Ordering::Relaxed);
    };
    device
        .build_output_stream(config, data_callback, error_callback, None)
        .map_err(|e| {
            Error::device(
                format!("failed to build output stream: {e}"),
                Some(Box::new(e)),
            )
        })
}

/// Converts PCM chunks in one layout to interleaved float frames in the device layout.
struct ChunkConverter {
    source_channels: usize,
    channels: usize,
    rate: RateConverter,
    scratch: Vec<f32>,
}

impl ChunkConverter {
    fn new(spec: PcmSpec, device_rate: u32, device_channels: usize) -> Result<Self> {
        Ok(Self {
            source_channels: spec.channels.max(1) as usize,
            channels: device_channels.max(1),
            rate: RateConverter::new(spec.sample_rate, device_rate)?,
            scratch: Vec::new(),
        })
    }

    fn convert(&mut self, pcm: &[u8]) -> Result<Vec<f32>> {
        let samples = pcm_to_samples(pcm);
        let mono: Vec<f32> = samples
            .chunks(self.source_channels)
            .map(|frame| {
                frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
            })
            .collect();
        self.scratch.clear();
        self.rate.process(&mono, &mut self.scratch)?;
        Ok(self.interleave())
    }

    /// Drain the samples still held by the rate converter.
    fn flush(&mut self) -> Result<Vec<f32>> {
        self.scratch.clear();
        self.rate.flush(&mut self.scratch)?;
        Ok(self.interleave())
    }

    fn interleave(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.scratch.len() * self.channels);
        for sample in &self.scratch {
            out.extend(std::iter::repeat_n(*sample, self.channels));
        }
        out
    }
}

/// Decode a WAV buffer and play it to completion on `player`.
///
/// The player must expect PCM in the layout the WAV was written with.
pub fn play_wav<P: ChunkPlayer + ?Sized>(player: &mut P, wav: &[u8]) -> Result<()> {
    let decoded = decode_wav(wav)?;
    if decoded.samples.is_empty() {
        return Ok(());
    }
    player.write_chunk(&samples_to_pcm(&decoded.samples))?;
    player.finish();
    Ok(())
}
