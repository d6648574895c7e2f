//! Command parsing for the chat application.
//!
//! Two forms are recognized.  Slash commands start with `/` and control the session.  Bare
//! keywords (`exit`, `record`, `image`, `video` and their Chinese equivalents) are accepted
//! only when they make up the whole line, so ordinary messages that merely start with one of
//! those words are still sent to the model.

use crate::chat::config::{InputMode, OutputMode};

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the API.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Clear the conversation history.
    Clear,

    /// Change the model.
    Model(String),

    /// List the known models.
    Models,

    /// Change how responses are delivered.
    Output(OutputMode),

    /// Change how user turns are built.
    Input(InputMode),

    /// Record a voice turn, optionally with a maximum duration in seconds.
    Record(Option<u32>),

    /// Attach an image; without a path the user is prompted for one.
    Image(Option<String>),

    /// Attach a video; without a path the user is prompted for one.
    Video(Option<String>),

    /// Resubmit the turn that failed last.
    Retry,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Display session statistics (message count, current model, etc.).
    Stats,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use omnichat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("record").is_some());
/// assert!(parse_command("/model qwen-omni-turbo").is_some());
/// assert!(parse_command("record this for me").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if let Some(command) = parse_keyword(input) {
        return Some(command);
    }
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "clear" => ChatCommand::Clear,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model name".to_string()),
        },
        "models" => ChatCommand::Models,
        "output" => match argument {
            Some(arg) => match arg.parse::<OutputMode>() {
                Ok(mode) => ChatCommand::Output(mode),
                Err(err) => ChatCommand::Invalid(format!("/output {err}")),
            },
            None => ChatCommand::Invalid("/output expects text, audio, or stream".to_string()),
        },
        "input" => match argument {
            Some(arg) => match arg.parse::<InputMode>() {
                Ok(mode) => ChatCommand::Input(mode),
                Err(err) => ChatCommand::Invalid(format!("/input {err}")),
            },
            None => ChatCommand::Invalid(
                "/input expects text, voice, image, or video".to_string(),
            ),
        },
        "record" => match argument {
            Some(arg) => match arg.parse::<u32>() {
                Ok(seconds) if seconds > 0 => ChatCommand::Record(Some(seconds)),
                _ => ChatCommand::Invalid(
                    "/record expects a positive number of seconds".to_string(),
                ),
            },
            None => ChatCommand::Record(None),
        },
        "image" => ChatCommand::Image(argument.map(|s| s.to_string())),
        "video" => ChatCommand::Video(argument.map(|s| s.to_string())),
        "retry" => ChatCommand::Retry,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "stats" | "status" => ChatCommand::Stats,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_keyword(input: &str) -> Option<ChatCommand> {
    match input.to_lowercase().as_str() {
        "exit" | "quit" | "退出" => Some(ChatCommand::Quit),
        "record" | "录音" => Some(ChatCommand::Record(None)),
        "image" | "图片" => Some(ChatCommand::Image(None)),
        "video" | "视频" => Some(ChatCommand::Video(None)),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  record | 录音            Record a voice message (Ctrl+C stops early)
  image | 图片             Ask about an image file
  video | 视频             Ask about a video file
  exit | 退出              Exit the chat
  /record [seconds]      Record with a custom maximum duration
  /image [path]          Ask about the image at path
  /video [path]          Ask about the video at path
  /model <name>          Change the model (e.g., /model qwen-omni-turbo)
  /models                List known models
  /output <mode>         Response delivery: text, audio, or stream
  /input <mode>          Input kind: text, voice, image, or video
  /retry                 Resend the message that failed last
  /clear                 Clear conversation history
  /stats                 Show session statistics
  /help                  Show this help message
  /quit                  Exit the chat"#
}
