//! Transport and container encodings for media payloads.
//!
//! Audio, image and video payloads travel to the endpoint as base64 inside data URLs, and
//! audio comes back as base64-encoded 16-bit little-endian PCM.  WAV framing goes through
//! `hound`.

use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Fallback MIME subtype for images with an unrecognized extension.
pub const DEFAULT_IMAGE_SUBTYPE: &str = "png";

/// Fallback MIME subtype for videos with an unrecognized extension.
pub const DEFAULT_VIDEO_SUBTYPE: &str = "mp4";

/// Sample layout of a raw 16-bit PCM stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PcmSpec {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl PcmSpec {
    /// Microphone capture layout: 16 kHz mono.
    pub const CAPTURE: PcmSpec = PcmSpec {
        sample_rate: 16_000,
        channels: 1,
    };

    /// Layout of audio returned by the omni models: 24 kHz mono.
    pub const RESPONSE: PcmSpec = PcmSpec {
        sample_rate: 24_000,
        channels: 1,
    };

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Encode bytes with the standard base64 alphabet.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, accepting (and stripping) a `data:...;base64,` prefix.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = parse_data_url(data).map(|(_, p)| p).unwrap_or(data);
    Ok(STANDARD.decode(payload.trim())?)
}

/// Build a `data:` URL around an already-encoded base64 payload.
///
/// An empty `mime` yields `data:;base64,...`, which is what the endpoint expects for
/// `input_audio`.
pub fn data_url(mime: &str, payload: &str) -> String {
    format!("data:{mime};base64,{payload}")
}

/// Split a base64 `data:` URL into its MIME type and payload.
pub fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    rest.split_once(";base64,")
}

/// MIME subtype for an image file, derived from its extension.
pub fn image_subtype(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("png") => "png",
        Some("jpg") | Some("jpeg") => "jpeg",
        Some("gif") => "gif",
        Some("bmp") => "bmp",
        Some("webp") => "webp",
        _ => DEFAULT_IMAGE_SUBTYPE,
    }
}

/// MIME subtype for a video file, derived from its extension.
pub fn video_subtype(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("mp4") => "mp4",
        Some("webm") => "webm",
        Some("mov") => "quicktime",
        Some("avi") => "x-msvideo",
        Some("mkv") => "x-matroska",
        _ => DEFAULT_VIDEO_SUBTYPE,
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Reinterpret little-endian PCM bytes as samples.  A trailing odd byte is dropped.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize samples as little-endian PCM bytes.
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Frame samples as an in-memory WAV file.
pub fn wav_from_samples(samples: &[i16], spec: PcmSpec) -> Result<Vec<u8>> {
    let mut wav = Vec::with_capacity(44 + samples.len() * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut wav), spec.wav_spec())?;
        for sample in samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(wav)
}

/// Frame raw little-endian PCM bytes as an in-memory WAV file.
pub fn wav_from_pcm(pcm: &[u8], spec: PcmSpec) -> Result<Vec<u8>> {
    wav_from_samples(&pcm_to_samples(pcm), spec)
}

/// Write raw PCM bytes to `path` as a WAV file.
pub fn write_wav_file(path: &Path, pcm: &[u8], spec: PcmSpec) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, spec.wav_spec())?;
    for sample in pcm_to_samples(pcm) {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// A decoded 16-bit WAV buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedWav {
    /// Interleaved samples.
    pub samples: Vec<i16>,
    /// Layout of `samples`.
    pub spec: PcmSpec,
}

impl DecodedWav {
    /// Playback length of the buffer.
    pub fn duration(&self) -> std::time::Duration {
        let frames = self.samples.len() as f64 / self.spec.channels.max(1) as f64;
        std::time::Duration::from_secs_f64(frames / self.spec.sample_rate.max(1) as f64)
    }
}

/// Decode an in-memory 16-bit integer WAV file.
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::encoding(
            format!(
                "unsupported WAV layout: {} bits, {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
            None,
        ));
    }
    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(DecodedWav {
        samples,
        spec: PcmSpec {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip_for_each_media_kind() {
        let audio = wav_from_samples(&[0, 1, -1, i16::MAX, i16::MIN], PcmSpec::CAPTURE).unwrap();
        let image = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0xff];
        let video: Vec<u8> = (0..=255u8).cycle().take(4099).collect();
        for payload in [audio, image, video] {
            let encoded = encode_base64(&payload);
            assert_eq!(decode_base64(&encoded).unwrap(), payload);
        }
    }

    #[test]
    fn decode_accepts_data_url_prefix() {
        let url = data_url("", &encode_base64(b"RIFF"));
        assert_eq!(url, "data:;base64,UklGRg==");
        assert_eq!(decode_base64(&url).unwrap(), b"RIFF");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_base64("not*base64").unwrap_err();
        assert!(err.is_encoding());
    }

    #[test]
    fn parse_data_url_splits_mime() {
        assert_eq!(
            parse_data_url("data:image/png;base64,AAAA"),
            Some(("image/png", "AAAA"))
        );
        assert_eq!(parse_data_url("https://example.com/cat.png"), None);
    }

    #[test]
    fn subtypes_from_extensions() {
        assert_eq!(image_subtype(Path::new("cat.PNG")), "png");
        assert_eq!(image_subtype(Path::new("cat.jpg")), "jpeg");
        assert_eq!(image_subtype(Path::new("cat.tiff")), DEFAULT_IMAGE_SUBTYPE);
        assert_eq!(image_subtype(Path::new("cat")), DEFAULT_IMAGE_SUBTYPE);
        assert_eq!(video_subtype(Path::new("clip.mov")), "quicktime");
        assert_eq!(video_subtype(Path::new("clip.webm")), "webm");
        assert_eq!(video_subtype(Path::new("clip.flv")), DEFAULT_VIDEO_SUBTYPE);
    }

    #[test]
    fn pcm_conversion_is_little_endian() {
        assert_eq!(pcm_to_samples(&[0x01, 0x00, 0xff, 0xff, 0x7f]), vec![1, -1]);
        assert_eq!(samples_to_pcm(&[1, -1]), vec![0x01, 0x00, 0xff, 0xff]);
    }

    #[test]
    fn wav_framing_preserves_samples_and_spec() {
        let samples: Vec<i16> = (0..2400).map(|i| (i * 13 % 2000) as i16 - 1000).collect();
        let wav = wav_from_pcm(&samples_to_pcm(&samples), PcmSpec::RESPONSE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.spec, PcmSpec::RESPONSE);
        assert_eq!(decoded.samples, samples);
        assert_eq!(decoded.duration(), std::time::Duration::from_millis(100));
    }

    #[test]
    fn write_wav_file_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("response.wav");
        write_wav_file(&path, &samples_to_pcm(&[5, 6, 7]), PcmSpec::RESPONSE).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(decode_wav(&bytes).unwrap().samples, vec![5, 6, 7]);
    }
}
