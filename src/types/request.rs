use serde::{Deserialize, Serialize};

use crate::types::{Model, Turn};

/// An output modality requested from the model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text output.
    Text,
    /// Spoken audio output.
    Audio,
}

/// Voice and container for audio output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    /// Voice name, e.g. `Cherry`.
    pub voice: String,
    /// Container format, e.g. `wav`.
    pub format: String,
}

impl AudioOutputConfig {
    /// Create a new `AudioOutputConfig`.
    pub fn new(voice: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            format: format.into(),
        }
    }
}

/// Options for the streamed response.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Ask the server to attach a usage record to the terminal chunk.
    pub include_usage: bool,
}

/// A streaming chat completion request.
///
/// The request is an owned snapshot of the conversation at submission time; the worker
/// that sends it never touches the live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model that will complete the conversation.
    pub model: Model,

    /// The conversation so far, ending with the user turn being sent.
    pub messages: Vec<Turn>,

    /// Requested output modalities.
    pub modalities: Vec<Modality>,

    /// Always true; the client only speaks the streaming protocol.
    pub stream: bool,

    /// Streaming options.
    pub stream_options: StreamOptions,

    /// Audio output configuration, present when `modalities` includes audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutputConfig>,
}

impl ChatCompletionRequest {
    /// Create a new streaming request for text output.
    pub fn new(model: impl Into<Model>, messages: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            messages,
            modalities: vec![Modality::Text],
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            audio: None,
        }
    }

    /// Request spoken output with the given voice and container alongside text.
    pub fn with_audio(mut self, audio: AudioOutputConfig) -> Self {
        self.modalities = vec![Modality::Text, Modality::Audio];
        self.audio = Some(audio);
        self
    }

    /// Returns true if the request asks for audio.
    pub fn wants_audio(&self) -> bool {
        self.modalities.contains(&Modality::Audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn text_only_request() {
        let request = ChatCompletionRequest::new("qwen-omni-turbo", vec![Turn::user("hello")]);
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "model": "qwen-omni-turbo",
                "messages": [{"role": "user", "content": "hello"}],
                "modalities": ["text"],
                "stream": true,
                "stream_options": {"include_usage": true}
            })
        );
        assert!(!request.wants_audio());
    }

    #[test]
    fn audio_request() {
        let request = ChatCompletionRequest::new(Model::default(), vec![Turn::user("hi")])
            .with_audio(AudioOutputConfig::new("Cherry", "wav"));
        let json = to_value(&request).unwrap();
        assert_eq!(json["model"], "qwen-omni-turbo-2025-03-26");
        assert_eq!(json["modalities"], json!(["text", "audio"]));
        assert_eq!(json["audio"], json!({"voice": "Cherry", "format": "wav"}));
        assert!(request.wants_audio());
    }
}
