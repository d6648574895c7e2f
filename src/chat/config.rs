//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg`, the input and output modes a
//! session can be in, and the resolved configuration a session runs with.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::error::Error;
use crate::types::{AudioOutputConfig, Modality, Model};

/// Default voice for spoken responses.
pub const DEFAULT_VOICE: &str = "Cherry";

/// Default container for spoken responses.
pub const DEFAULT_AUDIO_FORMAT: &str = "wav";

/// Default directory for saved response audio.
pub const DEFAULT_AUDIO_DIR: &str = "audio_output";

/// Default cap on a single voice recording.
pub const DEFAULT_RECORD_SECONDS: u32 = 60;

/// Command-line arguments for the omnichat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: qwen-omni-turbo-2025-03-26)", "MODEL")]
    pub model: Option<String>,

    /// Output mode.
    #[arrrg(optional, "Output mode: text, audio or stream", "MODE")]
    pub output: Option<String>,

    /// Input mode.
    #[arrrg(optional, "Input mode: text, voice, image or video", "MODE")]
    pub input: Option<String>,

    /// Voice for spoken responses.
    #[arrrg(optional, "Voice for spoken responses (default: Cherry)", "VOICE")]
    pub voice: Option<String>,

    /// Endpoint root.
    #[arrrg(optional, "OpenAI-compatible endpoint root", "URL")]
    pub base_url: Option<String>,

    /// API key.
    #[arrrg(optional, "API key (default: $DASHSCOPE_API_KEY or saved settings)", "KEY")]
    pub api_key: Option<String>,

    /// Settings file.
    #[arrrg(optional, "Settings file holding the API key and model", "PATH")]
    pub config: Option<String>,

    /// Directory for saved response audio.
    #[arrrg(optional, "Directory for response audio (default: audio_output)", "DIR")]
    pub audio_dir: Option<String>,

    /// Recording cap in seconds.
    #[arrrg(optional, "Maximum recording length in seconds (default: 60)", "SECONDS")]
    pub record_seconds: Option<u32>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Play buffered audio from memory without writing it to disk.
    #[arrrg(flag, "Do not save response audio to disk")]
    pub no_save_audio: bool,
}

/// How the assistant's response is delivered.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// Text only; audio deltas are ignored.
    #[default]
    TextOnly,
    /// Text streamed; audio collected and played once the response completes.
    BufferedAudio,
    /// Text and audio both played as they arrive.
    StreamingAudio,
}

impl OutputMode {
    /// Every output mode, in menu order.
    pub const ALL: [OutputMode; 3] = [
        OutputMode::TextOnly,
        OutputMode::BufferedAudio,
        OutputMode::StreamingAudio,
    ];

    /// Returns true if the model should be asked for audio.
    pub fn wants_audio(&self) -> bool {
        !matches!(self, OutputMode::TextOnly)
    }

    /// The modalities requested for this mode.
    pub fn modalities(&self) -> Vec<Modality> {
        if self.wants_audio() {
            vec![Modality::Text, Modality::Audio]
        } else {
            vec![Modality::Text]
        }
    }

    /// Human-readable description for menus.
    pub fn describe(&self) -> &'static str {
        match self {
            OutputMode::TextOnly => "text only",
            OutputMode::BufferedAudio => "text + audio (played when complete)",
            OutputMode::StreamingAudio => "text + audio (played while streaming)",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMode::TextOnly => "text",
            OutputMode::BufferedAudio => "audio",
            OutputMode::StreamingAudio => "stream",
        })
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "text-only" | "1" => Ok(OutputMode::TextOnly),
            "audio" | "buffered" | "2" => Ok(OutputMode::BufferedAudio),
            "stream" | "streaming" | "3" => Ok(OutputMode::StreamingAudio),
            other => Err(format!(
                "unknown output mode '{other}' (expected text, audio or stream)"
            )),
        }
    }
}

/// What kind of input the next user turn is built from.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum InputMode {
    /// Typed text.
    #[default]
    Text,
    /// A microphone recording.
    Voice,
    /// An image file plus a caption.
    Image,
    /// A video file plus a caption.
    Video,
}

impl InputMode {
    /// Every input mode, in menu order.
    pub const ALL: [InputMode; 4] = [
        InputMode::Text,
        InputMode::Voice,
        InputMode::Image,
        InputMode::Video,
    ];
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputMode::Text => "text",
            InputMode::Voice => "voice",
            InputMode::Image => "image",
            InputMode::Video => "video",
        })
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "1" => Ok(InputMode::Text),
            "voice" | "audio" | "2" => Ok(InputMode::Voice),
            "image" | "3" => Ok(InputMode::Image),
            "video" | "4" => Ok(InputMode::Video),
            other => Err(format!(
                "unknown input mode '{other}' (expected text, voice, image or video)"
            )),
        }
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: Model,

    /// How responses are delivered.
    pub output_mode: OutputMode,

    /// How user turns are built.
    pub input_mode: InputMode,

    /// Voice for spoken responses.
    pub voice: String,

    /// Container for spoken responses.
    pub audio_format: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Endpoint root; `None` uses the client default.
    pub base_url: Option<String>,

    /// API key given on the command line.
    pub api_key: Option<String>,

    /// Settings file override.
    pub config_path: Option<PathBuf>,

    /// Directory for saved response audio.
    pub audio_dir: PathBuf,

    /// Maximum length of one recording.
    pub record_limit: Duration,

    /// Whether buffered response audio is written to `audio_dir`.
    pub save_audio: bool,

    /// Whether the model/output/input were given on the command line.
    pub model_given: bool,
    /// See `model_given`.
    pub output_given: bool,
    /// See `model_given`.
    pub input_given: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: qwen-omni-turbo-2025-03-26
    /// - Output: text only
    /// - Input: text
    /// - Voice: Cherry, wav
    /// - Recording cap: 60 seconds
    pub fn new() -> Self {
        Self {
            model: Model::default(),
            output_mode: OutputMode::default(),
            input_mode: InputMode::default(),
            voice: DEFAULT_VOICE.to_string(),
            audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            use_color: true,
            base_url: None,
            api_key: None,
            config_path: None,
            audio_dir: PathBuf::from(DEFAULT_AUDIO_DIR),
            record_limit: Duration::from_secs(DEFAULT_RECORD_SECONDS as u64),
            save_audio: true,
            model_given: false,
            output_given: false,
            input_given: false,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Sets the output mode.
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    /// Sets the input mode.
    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    /// Sets the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the directory for saved response audio.
    pub fn with_audio_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audio_dir = dir.into();
        self
    }

    /// Sets the recording cap.
    pub fn with_record_limit(mut self, limit: Duration) -> Self {
        self.record_limit = limit;
        self
    }

    /// Sets whether buffered response audio is saved.
    pub fn with_save_audio(mut self, save: bool) -> Self {
        self.save_audio = save;
        self
    }

    /// Audio output configuration for requests, when the output mode wants audio.
    pub fn audio_output(&self) -> Option<AudioOutputConfig> {
        self.output_mode
            .wants_audio()
            .then(|| AudioOutputConfig::new(&self.voice, &self.audio_format))
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    fn try_from(args: ChatArgs) -> Result<Self, Self::Error> {
        let invalid = |param: &str| {
            let param = param.to_string();
            move |message: String| Error::validation(message, Some(param))
        };
        let mut config = ChatConfig::new();
        if let Some(model) = args.model {
            config.model = model.parse().map_err(invalid("--model"))?;
            config.model_given = true;
        }
        if let Some(output) = args.output {
            config.output_mode = output.parse().map_err(invalid("--output"))?;
            config.output_given = true;
        }
        if let Some(input) = args.input {
            config.input_mode = input.parse().map_err(invalid("--input"))?;
            config.input_given = true;
        }
        if let Some(voice) = args.voice {
            config.voice = voice;
        }
        if let Some(seconds) = args.record_seconds {
            if seconds == 0 {
                return Err(Error::validation(
                    "must be positive",
                    Some("--record-seconds".to_string()),
                ));
            }
            config.record_limit = Duration::from_secs(seconds as u64);
        }
        if let Some(dir) = args.audio_dir {
            config.audio_dir = PathBuf::from(dir);
        }
        config.base_url = args.base_url;
        config.api_key = args.api_key;
        config.config_path = args.config.map(PathBuf::from);
        config.use_color = !args.no_color;
        config.save_audio = !args.no_save_audio;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownModel;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.model, Model::Known(KnownModel::QwenOmniTurbo20250326));
        assert_eq!(config.output_mode, OutputMode::TextOnly);
        assert_eq!(config.input_mode, InputMode::Text);
        assert_eq!(config.voice, "Cherry");
        assert_eq!(config.audio_format, "wav");
        assert_eq!(config.record_limit, Duration::from_secs(60));
        assert_eq!(config.audio_dir, PathBuf::from("audio_output"));
        assert!(config.use_color);
        assert!(config.save_audio);
        assert!(config.audio_output().is_none());
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::try_from(ChatArgs::default()).unwrap();
        assert_eq!(config, ChatConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            model: Some("qwen-omni-turbo".to_string()),
            output: Some("stream".to_string()),
            input: Some("voice".to_string()),
            voice: Some("Ethan".to_string()),
            record_seconds: Some(10),
            no_color: true,
            no_save_audio: true,
            ..ChatArgs::default()
        };
        let config = ChatConfig::try_from(args).unwrap();
        assert_eq!(config.model, Model::Known(KnownModel::QwenOmniTurbo));
        assert_eq!(config.output_mode, OutputMode::StreamingAudio);
        assert_eq!(config.input_mode, InputMode::Voice);
        assert!(config.model_given && config.output_given && config.input_given);
        assert_eq!(config.record_limit, Duration::from_secs(10));
        assert!(!config.use_color);
        assert!(!config.save_audio);
        assert_eq!(
            config.audio_output(),
            Some(AudioOutputConfig::new("Ethan", "wav"))
        );
    }

    #[test]
    fn config_from_args_rejects_bad_modes() {
        let args = ChatArgs {
            output: Some("loud".to_string()),
            ..ChatArgs::default()
        };
        let err = ChatConfig::try_from(args).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("--output"), "{err}");

        let args = ChatArgs {
            record_seconds: Some(0),
            ..ChatArgs::default()
        };
        let err = ChatConfig::try_from(args).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Validation error: must be positive (parameter: --record-seconds)"
        );
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Audio".parse::<OutputMode>(), Ok(OutputMode::BufferedAudio));
        assert_eq!("3".parse::<OutputMode>(), Ok(OutputMode::StreamingAudio));
        assert_eq!("image".parse::<InputMode>(), Ok(InputMode::Image));
        assert!("smell".parse::<InputMode>().is_err());
        for mode in OutputMode::ALL {
            assert_eq!(mode.to_string().parse::<OutputMode>(), Ok(mode));
        }
        for mode in InputMode::ALL {
            assert_eq!(mode.to_string().parse::<InputMode>(), Ok(mode));
        }
    }

    #[test]
    fn modalities_follow_output_mode() {
        assert_eq!(OutputMode::TextOnly.modalities(), vec![Modality::Text]);
        assert_eq!(
            OutputMode::BufferedAudio.modalities(),
            vec![Modality::Text, Modality::Audio]
        );
    }

    #[test]
    fn config_builder_pattern() {
        let config = ChatConfig::new()
            .with_model(Model::Known(KnownModel::Qwen25Omni7b))
            .with_output_mode(OutputMode::BufferedAudio)
            .with_input_mode(InputMode::Image)
            .with_voice("Serena")
            .without_color()
            .with_audio_dir("/tmp/out")
            .with_record_limit(Duration::from_secs(5))
            .with_save_audio(false);
        assert_eq!(config.model.to_string(), "qwen2.5-omni-7b");
        assert_eq!(config.output_mode, OutputMode::BufferedAudio);
        assert_eq!(config.input_mode, InputMode::Image);
        assert_eq!(config.voice, "Serena");
        assert!(!config.use_color);
        assert_eq!(config.audio_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.record_limit, Duration::from_secs(5));
        assert!(!config.save_audio);
    }
}
