use serde::{Deserialize, Serialize};

use crate::codec::{data_url, parse_data_url};

/// Role type for a conversation turn.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

/// The content of a turn: plain text, or the parts of a not-yet-normalized user turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TurnContent {
    /// A simple string content.
    Text(String),

    /// An ordered sequence of content parts.
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    /// The text of this content: the string itself, or the value of the first text part.
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnContent::Text(text) => Some(text),
            TurnContent::Parts(parts) => parts.iter().find_map(ContentPart::as_text),
        }
    }

    /// Returns true if this content still carries parts.
    pub fn is_parts(&self) -> bool {
        matches!(self, TurnContent::Parts(_))
    }
}

/// One entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    /// The role of the turn.
    pub role: Role,

    /// The content of the turn.
    pub content: TurnContent,
}

impl Turn {
    /// Create a new `Turn` with the given content and role.
    pub fn new(content: TurnContent, role: Role) -> Self {
        Self { role, content }
    }

    /// Create a new user `Turn` with a string content.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnContent::Text(content.into()), Role::User)
    }

    /// Create a new user `Turn` with content parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::new(TurnContent::Parts(parts), Role::User)
    }

    /// Create a new assistant `Turn` with a string content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnContent::Text(content.into()), Role::Assistant)
    }
}

/// One typed component of a multi-part user turn.
///
/// Media payloads are held base64-encoded, exactly as they travel.  On the wire each part
/// uses the OpenAI-compatible shape (`text`, `input_audio`, `image_url`, `video_url`), with
/// media carried in `data:` URLs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "WirePart", try_from = "WirePart")]
pub enum ContentPart {
    /// Text.
    Text {
        /// The text value.
        value: String,
    },

    /// Recorded audio.
    InputAudio {
        /// Base64 audio bytes.
        data: String,
        /// Container format, e.g. `wav`.
        format: String,
    },

    /// An image.
    Image {
        /// Base64 image bytes.
        data: String,
        /// MIME subtype, e.g. `png`.
        mime_subtype: String,
    },

    /// A video.
    Video {
        /// Base64 video bytes.
        data: String,
        /// MIME subtype, e.g. `mp4`.
        mime_subtype: String,
    },
}

impl ContentPart {
    /// Create a text part.
    pub fn text(value: impl Into<String>) -> Self {
        ContentPart::Text {
            value: value.into(),
        }
    }

    /// The text value, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { value } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    InputAudio { input_audio: WireAudio },
    ImageUrl { image_url: WireUrl },
    VideoUrl { video_url: WireUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireAudio {
    data: String,
    format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireUrl {
    url: String,
}

impl From<ContentPart> for WirePart {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text { value } => WirePart::Text { text: value },
            ContentPart::InputAudio { data, format } => WirePart::InputAudio {
                input_audio: WireAudio {
                    data: data_url("", &data),
                    format,
                },
            },
            ContentPart::Image { data, mime_subtype } => WirePart::ImageUrl {
                image_url: WireUrl {
                    url: data_url(&format!("image/{mime_subtype}"), &data),
                },
            },
            ContentPart::Video { data, mime_subtype } => WirePart::VideoUrl {
                video_url: WireUrl {
                    url: data_url(&format!("video/{mime_subtype}"), &data),
                },
            },
        }
    }
}

impl TryFrom<WirePart> for ContentPart {
    type Error = String;

    fn try_from(part: WirePart) -> Result<Self, Self::Error> {
        match part {
            WirePart::Text { text } => Ok(ContentPart::Text { value: text }),
            WirePart::InputAudio { input_audio } => {
                let data = parse_data_url(&input_audio.data)
                    .map(|(_, payload)| payload.to_string())
                    .unwrap_or(input_audio.data);
                Ok(ContentPart::InputAudio {
                    data,
                    format: input_audio.format,
                })
            }
            WirePart::ImageUrl { image_url } => {
                let (data, mime_subtype) = split_media_url(&image_url.url, "image/")?;
                Ok(ContentPart::Image { data, mime_subtype })
            }
            WirePart::VideoUrl { video_url } => {
                let (data, mime_subtype) = split_media_url(&video_url.url, "video/")?;
                Ok(ContentPart::Video { data, mime_subtype })
            }
        }
    }
}

fn split_media_url(url: &str, prefix: &str) -> Result<(String, String), String> {
    let (mime, payload) =
        parse_data_url(url).ok_or_else(|| format!("expected a base64 data URL, got {url:.32}"))?;
    let subtype = mime
        .strip_prefix(prefix)
        .ok_or_else(|| format!("expected a {prefix}* MIME type, got {mime}"))?;
    Ok((payload.to_string(), subtype.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn text_turn_serializes_as_string() {
        let turn = Turn::user("hello");
        assert_eq!(
            to_value(&turn).unwrap(),
            json!({"role": "user", "content": "hello"})
        );
    }

    #[test]
    fn audio_part_wire_shape() {
        let turn = Turn::user_parts(vec![
            ContentPart::InputAudio {
                data: "UklGRg==".to_string(),
                format: "wav".to_string(),
            },
            ContentPart::text("What did I just say?"),
        ]);
        assert_eq!(
            to_value(&turn).unwrap(),
            json!({
                "role": "user",
                "content": [
                    {
                        "type": "input_audio",
                        "input_audio": {"data": "data:;base64,UklGRg==", "format": "wav"}
                    },
                    {"type": "text", "text": "What did I just say?"}
                ]
            })
        );
    }

    #[test]
    fn image_and_video_part_wire_shape() {
        let image = ContentPart::Image {
            data: "AAAA".to_string(),
            mime_subtype: "jpeg".to_string(),
        };
        assert_eq!(
            to_value(&image).unwrap(),
            json!({"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAAA"}})
        );

        let video = ContentPart::Video {
            data: "BBBB".to_string(),
            mime_subtype: "mp4".to_string(),
        };
        assert_eq!(
            to_value(&video).unwrap(),
            json!({"type": "video_url", "video_url": {"url": "data:video/mp4;base64,BBBB"}})
        );
    }

    #[test]
    fn parts_deserialize_from_wire_shape() {
        let turn: Turn = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "text", "text": "what is this"}
            ]
        }))
        .unwrap();
        assert_eq!(
            turn.content,
            TurnContent::Parts(vec![
                ContentPart::Image {
                    data: "AAAA".to_string(),
                    mime_subtype: "png".to_string(),
                },
                ContentPart::text("what is this"),
            ])
        );
        assert_eq!(turn.content.text(), Some("what is this"));
    }

    #[test]
    fn non_data_url_is_rejected() {
        let result: Result<ContentPart, _> = serde_json::from_value(json!({
            "type": "image_url",
            "image_url": {"url": "https://example.com/cat.png"}
        }));
        assert!(result.is_err());
    }
}
