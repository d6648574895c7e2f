use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// One `data:` payload of a streamed chat completion.
///
/// Every field is optional on the wire: content chunks carry `choices`, and the terminal
/// chunk (requested with `include_usage`) carries `usage` with empty `choices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Deltas for each choice.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,

    /// Usage for the whole completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The delta for one choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Index of the choice.
    #[serde(default)]
    pub index: u32,

    /// New content.
    #[serde(default)]
    pub delta: Delta,

    /// Why generation stopped, on the last content chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Incremental content of a choice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Role, on the first chunk only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// A text delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// An audio delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioDelta>,
}

/// A slice of spoken output and/or its transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDelta {
    /// Base64-encoded 16-bit PCM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Transcript text for this slice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// Audio identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Expiry of the server-side audio, in unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// The normalized content of one chunk: what the reducer actually consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    /// A text delta.
    pub text: Option<String>,
    /// An audio delta.
    pub audio: Option<AudioDelta>,
    /// A usage record.
    pub usage: Option<Usage>,
}

impl Fragment {
    /// A text-only fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// An audio fragment carrying base64 `data`.
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            audio: Some(AudioDelta {
                data: Some(data.into()),
                ..AudioDelta::default()
            }),
            ..Self::default()
        }
    }

    /// A usage-only fragment.
    pub fn usage(usage: Usage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    /// Returns true if the fragment carries text or audio.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
            || self
                .audio
                .as_ref()
                .is_some_and(|a| a.data.is_some() || a.transcript.is_some())
    }
}

impl From<ChatCompletionChunk> for Fragment {
    fn from(chunk: ChatCompletionChunk) -> Self {
        let mut fragment = Fragment {
            usage: chunk.usage,
            ..Fragment::default()
        };
        // Only the first choice is rendered; the client never asks for n > 1.
        if let Some(choice) = chunk.choices.into_iter().next() {
            fragment.text = choice.delta.content;
            fragment.audio = choice.delta.audio;
        }
        fragment
    }
}

impl From<Fragment> for ChatCompletionChunk {
    fn from(fragment: Fragment) -> Self {
        let choices = if fragment.text.is_some() || fragment.audio.is_some() {
            vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: fragment.text,
                    audio: fragment.audio,
                },
                finish_reason: None,
            }]
        } else {
            vec![]
        };
        ChatCompletionChunk {
            id: None,
            choices,
            usage: fragment.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunk() {
        let json = r#"{"id":"chatcmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}],"model":"qwen-omni-turbo"}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(json).unwrap();
        let fragment = Fragment::from(chunk);
        assert_eq!(fragment.text.as_deref(), Some("Hi"));
        assert!(fragment.audio.is_none());
        assert!(fragment.usage.is_none());
    }

    #[test]
    fn audio_chunk() {
        let json = r#"{"choices":[{"index":0,"delta":{"audio":{"data":"AAEC","expires_at":1745000000,"id":"audio_1"}}}]}"#;
        let fragment = Fragment::from(serde_json::from_str::<ChatCompletionChunk>(json).unwrap());
        let audio = fragment.audio.unwrap();
        assert_eq!(audio.data.as_deref(), Some("AAEC"));
        assert_eq!(audio.expires_at, Some(1745000000));
        assert!(fragment.text.is_none());
    }

    #[test]
    fn transcript_chunk() {
        let json = r#"{"choices":[{"delta":{"audio":{"transcript":"Hello"}}}]}"#;
        let fragment = Fragment::from(serde_json::from_str::<ChatCompletionChunk>(json).unwrap());
        assert_eq!(
            fragment.audio.and_then(|a| a.transcript).as_deref(),
            Some("Hello")
        );
    }

    #[test]
    fn usage_chunk_with_empty_choices() {
        let json = r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#;
        let fragment = Fragment::from(serde_json::from_str::<ChatCompletionChunk>(json).unwrap());
        assert_eq!(fragment.usage, Some(Usage::new(5, 2).with_total_tokens(7)));
        assert!(!fragment.has_content());
    }

    #[test]
    fn empty_chunk_is_not_an_error() {
        let chunk: ChatCompletionChunk = serde_json::from_str("{}").unwrap();
        assert_eq!(Fragment::from(chunk), Fragment::default());
    }

    #[test]
    fn fragment_to_chunk_and_back() {
        let fragment = Fragment::text("Hi");
        let chunk = ChatCompletionChunk::from(fragment.clone());
        assert_eq!(chunk.choices.len(), 1);
        assert_eq!(Fragment::from(chunk), fragment);

        let usage_only = ChatCompletionChunk::from(Fragment::usage(Usage::new(1, 1)));
        assert!(usage_only.choices.is_empty());
    }
}
