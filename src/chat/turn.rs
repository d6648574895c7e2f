//! Assembly of user turns from one input event.

use std::fs;
use std::path::Path;

use crate::audio::CaptureOutcome;
use crate::codec::{encode_base64, image_subtype, video_subtype};
use crate::error::{Error, Result};
use crate::types::{ContentPart, Turn};

use super::config::InputMode;

/// Text sent alongside a recording when the user typed nothing.
pub const VOICE_PROMPT: &str = "What did I just say? Please answer my question or request.";

/// Media captured or loaded for a single user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAttachment {
    /// A WAV recording.
    Audio {
        /// WAV file bytes.
        wav: Vec<u8>,
    },
    /// An image file.
    Image {
        /// Raw file bytes.
        bytes: Vec<u8>,
        /// MIME subtype, e.g. `jpeg`.
        subtype: String,
    },
    /// A video file.
    Video {
        /// Raw file bytes.
        bytes: Vec<u8>,
        /// MIME subtype, e.g. `mp4`.
        subtype: String,
    },
}

impl MediaAttachment {
    /// Load an image from disk, deriving its subtype from the extension.
    pub fn image_from_file(path: &Path) -> Result<Self> {
        let bytes = read_media(path)?;
        Ok(MediaAttachment::Image {
            bytes,
            subtype: image_subtype(path).to_string(),
        })
    }

    /// Load a video from disk, deriving its subtype from the extension.
    pub fn video_from_file(path: &Path) -> Result<Self> {
        let bytes = read_media(path)?;
        Ok(MediaAttachment::Video {
            bytes,
            subtype: video_subtype(path).to_string(),
        })
    }

    /// Frame a finished recording as WAV.  An empty recording yields `None`, which the turn
    /// builder then rejects.
    pub fn recording(outcome: &CaptureOutcome) -> Result<Option<Self>> {
        if outcome.is_empty() {
            return Ok(None);
        }
        Ok(Some(MediaAttachment::Audio {
            wav: outcome.to_wav()?,
        }))
    }

    /// The input mode this attachment belongs to.
    pub fn mode(&self) -> InputMode {
        match self {
            MediaAttachment::Audio { .. } => InputMode::Voice,
            MediaAttachment::Image { .. } => InputMode::Image,
            MediaAttachment::Video { .. } => InputMode::Video,
        }
    }

    /// Returns true if the attachment carries no bytes.
    pub fn is_empty(&self) -> bool {
        match self {
            MediaAttachment::Audio { wav } => wav.is_empty(),
            MediaAttachment::Image { bytes, .. } | MediaAttachment::Video { bytes, .. } => {
                bytes.is_empty()
            }
        }
    }

    fn into_part(self) -> ContentPart {
        match self {
            MediaAttachment::Audio { wav } => ContentPart::InputAudio {
                data: encode_base64(&wav),
                format: "wav".to_string(),
            },
            MediaAttachment::Image { bytes, subtype } => ContentPart::Image {
                data: encode_base64(&bytes),
                mime_subtype: subtype,
            },
            MediaAttachment::Video { bytes, subtype } => ContentPart::Video {
                data: encode_base64(&bytes),
                mime_subtype: subtype,
            },
        }
    }
}

fn read_media(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(Error::precondition(format!(
            "file not found: {}",
            path.display()
        )));
    }
    fs::read(path).map_err(|e| Error::io(format!("failed to read {}", path.display()), e))
}

/// Build the user turn for one input event.
///
/// Plain text becomes a plain-text turn.  Media turns carry the media part first and the
/// text part second.  Missing media or a missing caption is a precondition failure, and no
/// turn is produced.
///
/// In text mode an attachment (from an inline `record`, `image` or `video` command) decides
/// the kind of turn.
pub fn build_user_turn(
    mode: InputMode,
    text: &str,
    attachment: Option<MediaAttachment>,
) -> Result<Turn> {
    let text = text.trim();
    let mode = match (&attachment, mode) {
        (Some(attachment), InputMode::Text) => attachment.mode(),
        _ => mode,
    };

    match mode {
        InputMode::Text => {
            if text.is_empty() {
                return Err(Error::precondition("message is empty"));
            }
            Ok(Turn::user(text))
        }
        InputMode::Voice => {
            let attachment = require(attachment, mode, "no audio was recorded")?;
            let text = if text.is_empty() { VOICE_PROMPT } else { text };
            Ok(Turn::user_parts(vec![
                attachment.into_part(),
                ContentPart::text(text),
            ]))
        }
        InputMode::Image | InputMode::Video => {
            let attachment = require(attachment, mode, &format!("no {mode} was provided"))?;
            require_question(mode, text)?;
            Ok(Turn::user_parts(vec![
                attachment.into_part(),
                ContentPart::text(text),
            ]))
        }
    }
}

/// Check that an image or video turn comes with a question.  Other modes accept any text.
pub fn require_question(mode: InputMode, text: &str) -> Result<()> {
    let needs_text = matches!(mode, InputMode::Image | InputMode::Video);
    if needs_text && text.trim().is_empty() {
        return Err(Error::precondition(format!(
            "a question about the {mode} is required"
        )));
    }
    Ok(())
}

fn require(
    attachment: Option<MediaAttachment>,
    mode: InputMode,
    missing: &str,
) -> Result<MediaAttachment> {
    match attachment {
        Some(attachment) if attachment.mode() != mode => Err(Error::precondition(format!(
            "{mode} input needs {mode} media, got {}",
            attachment.mode()
        ))),
        Some(attachment) if attachment.is_empty() => Err(Error::precondition(missing)),
        Some(attachment) => Ok(attachment),
        None => Err(Error::precondition(missing)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnContent;

    fn image() -> MediaAttachment {
        MediaAttachment::Image {
            bytes: vec![1, 2, 3],
            subtype: "png".to_string(),
        }
    }

    #[test]
    fn text_turn_is_plain_string() {
        let turn = build_user_turn(InputMode::Text, "  hello ", None).unwrap();
        assert_eq!(turn, Turn::user("hello"));
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = build_user_turn(InputMode::Text, "   ", None).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn voice_turn_uses_fixed_prompt() {
        let wav = MediaAttachment::Audio { wav: vec![b'R'; 8] };
        let turn = build_user_turn(InputMode::Voice, "", Some(wav)).unwrap();
        let TurnContent::Parts(parts) = &turn.content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ContentPart::InputAudio { format, .. } if format == "wav"));
        assert_eq!(parts[1], ContentPart::text(VOICE_PROMPT));
    }

    #[test]
    fn voice_without_audio_is_rejected() {
        assert!(
            build_user_turn(InputMode::Voice, "", None)
                .unwrap_err()
                .is_precondition()
        );
        let empty = MediaAttachment::Audio { wav: vec![] };
        assert!(
            build_user_turn(InputMode::Voice, "hi", Some(empty))
                .unwrap_err()
                .is_precondition()
        );
    }

    #[test]
    fn image_turn_orders_media_first() {
        let turn = build_user_turn(InputMode::Image, "what is this", Some(image())).unwrap();
        assert_eq!(
            turn.content,
            TurnContent::Parts(vec![
                ContentPart::Image {
                    data: "AQID".to_string(),
                    mime_subtype: "png".to_string(),
                },
                ContentPart::text("what is this"),
            ])
        );
    }

    #[test]
    fn image_requires_caption_and_media() {
        assert!(
            build_user_turn(InputMode::Image, "", Some(image()))
                .unwrap_err()
                .is_precondition()
        );
        assert!(
            build_user_turn(InputMode::Image, "what is this", None)
                .unwrap_err()
                .is_precondition()
        );
        assert!(
            build_user_turn(InputMode::Video, "what is this", Some(image()))
                .unwrap_err()
                .is_precondition()
        );
    }

    #[test]
    fn text_mode_attachment_decides_kind() {
        let turn = build_user_turn(InputMode::Text, "describe", Some(image())).unwrap();
        assert!(turn.content.is_parts());
    }

    #[test]
    fn empty_recording_is_rejected() {
        let outcome = CaptureOutcome {
            sample_rate: 16_000,
            ..CaptureOutcome::default()
        };
        let attachment = MediaAttachment::recording(&outcome).unwrap();
        assert!(attachment.is_none());
        let err = build_user_turn(InputMode::Voice, "", attachment).unwrap_err();
        assert!(err.is_precondition());

        let outcome = CaptureOutcome {
            samples: vec![0; 160],
            sample_rate: 16_000,
            chunks: 1,
            ..CaptureOutcome::default()
        };
        let attachment = MediaAttachment::recording(&outcome).unwrap();
        assert!(matches!(
            attachment,
            Some(MediaAttachment::Audio { ref wav }) if wav.starts_with(b"RIFF")
        ));
    }

    #[test]
    fn media_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.MOV");
        std::fs::write(&path, b"moov").unwrap();
        let video = MediaAttachment::video_from_file(&path).unwrap();
        assert_eq!(
            video,
            MediaAttachment::Video {
                bytes: b"moov".to_vec(),
                subtype: "quicktime".to_string(),
            }
        );

        let missing = MediaAttachment::image_from_file(&dir.path().join("nope.png"));
        assert!(missing.unwrap_err().is_precondition());
    }

    #[test]
    fn media_questions_are_required() {
        let err = require_question(InputMode::Image, "  ").unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("a question about the image is required"), "{err}");
        assert!(require_question(InputMode::Video, "").is_err());
        assert!(require_question(InputMode::Video, "what happens?").is_ok());
        assert!(require_question(InputMode::Voice, "").is_ok());
    }
}
