//! Chat application module for interactive multimodal conversations.
//!
//! This module provides the session logic shared by front ends.  It supports:
//!
//! - Text, voice, image and video user turns
//! - Streaming text responses with spoken audio, buffered or streamed
//! - Slash commands for session control
//! - Persisted credentials and model selection
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Conversation state and the single in-flight exchange
//! - [`worker`]: Background task that performs the remote call
//! - [`exchange`]: Foreground dispatch of worker events
//! - [`commands`]: Slash command and keyword parsing

mod commands;
mod config;
mod exchange;
mod history;
mod session;
mod settings;
mod turn;
mod worker;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    ChatArgs, ChatConfig, DEFAULT_AUDIO_DIR, DEFAULT_AUDIO_FORMAT, DEFAULT_RECORD_SECONDS,
    DEFAULT_VOICE, InputMode, OutputMode,
};
pub use exchange::{ExchangeOutcome, drive_exchange};
pub use history::{complete_exchange, normalize_last_user_turn};
pub use session::{ChatSession, SessionStats};
pub use settings::PersistedSettings;
pub use turn::{MediaAttachment, VOICE_PROMPT, build_user_turn, require_question};
pub use worker::ChatWorker;
