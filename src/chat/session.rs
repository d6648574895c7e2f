//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which owns the conversation state.  The
//! session never performs I/O: it hands out request snapshots for a worker to send and
//! takes back the reduced result.  Only one exchange may be in flight at a time.

use crate::audio::ChunkPlayer;
use crate::chat::config::{ChatConfig, InputMode, OutputMode};
use crate::chat::history::complete_exchange;
use crate::chat::turn::{MediaAttachment, build_user_turn};
use crate::error::{Error, Result};
use crate::observability::{EXCHANGES_COMPLETED, EXCHANGES_FAILED, SUBMISSIONS_REJECTED};
use crate::reducer::ReducedTurn;
use crate::types::{ChatCompletionRequest, Model, Role, Turn, Usage};

/// Conversation state for one interactive session.
#[derive(Debug, Clone)]
pub struct ChatSession {
    config: ChatConfig,
    history: Vec<Turn>,
    in_flight: bool,
    usage_totals: Usage,
    last_turn_usage: Option<Usage>,
    request_count: u64,
    failed_count: u64,
    pending_retry: Option<Turn>,
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// The model used for the session.
    pub model: Model,
    /// How responses are delivered.
    pub output_mode: OutputMode,
    /// How user turns are built.
    pub input_mode: InputMode,
    /// Voice for spoken responses.
    pub voice: String,
    /// The number of turns in the conversation.
    pub message_count: usize,
    /// Total number of requests made.
    pub total_requests: u64,
    /// Requests that failed.
    pub failed_requests: u64,
    /// Total prompt tokens across all requests.
    pub total_prompt_tokens: u64,
    /// Total completion tokens across all requests.
    pub total_completion_tokens: u64,
    /// Usage of the last completed exchange, if reported.
    pub last_turn_usage: Option<Usage>,
    /// Whether a failed turn is waiting for `/retry`.
    pub retry_pending: bool,
}

impl ChatSession {
    /// Creates a new chat session with the given configuration.
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            in_flight: false,
            usage_totals: Usage::default(),
            last_turn_usage: None,
            request_count: 0,
            failed_count: 0,
            pending_retry: None,
        }
    }

    /// Build a user turn from one input event, append it, and return the request to send.
    ///
    /// The turn is built according to the current input mode.  A rejected submission
    /// (busy, or missing media/text) leaves the history untouched.
    pub fn submit(
        &mut self,
        text: &str,
        attachment: Option<MediaAttachment>,
    ) -> Result<ChatCompletionRequest> {
        self.submit_as(self.config.input_mode, text, attachment)
    }

    /// Like [`ChatSession::submit`], but builds the turn for `mode` without changing the
    /// configured input mode.  Used by one-off `record`, `image` and `video` commands.
    pub fn submit_as(
        &mut self,
        mode: InputMode,
        text: &str,
        attachment: Option<MediaAttachment>,
    ) -> Result<ChatCompletionRequest> {
        self.ensure_idle()?;
        let turn = build_user_turn(mode, text, attachment).inspect_err(|_| {
            SUBMISSIONS_REJECTED.click();
        })?;
        Ok(self.begin(turn))
    }

    /// Resubmit the user turn parked by the last failed exchange.
    pub fn retry(&mut self) -> Result<ChatCompletionRequest> {
        self.ensure_idle()?;
        let turn = self
            .pending_retry
            .take()
            .ok_or_else(|| Error::precondition("nothing to retry"))?;
        Ok(self.begin(turn))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.in_flight {
            SUBMISSIONS_REJECTED.click();
            return Err(Error::busy("a response is still streaming"));
        }
        Ok(())
    }

    fn begin(&mut self, turn: Turn) -> ChatCompletionRequest {
        self.history.push(turn);
        self.in_flight = true;
        self.pending_retry = None;
        self.request_count = self.request_count.saturating_add(1);
        self.request()
    }

    /// A request snapshot of the current history and configuration.
    pub fn request(&self) -> ChatCompletionRequest {
        let request = ChatCompletionRequest::new(self.config.model.clone(), self.history.clone());
        match self.config.audio_output() {
            Some(audio) => request.with_audio(audio),
            None => request,
        }
    }

    /// Record a completed exchange: normalize the user turn and append the reply.
    pub fn complete(&mut self, reduced: &ReducedTurn) {
        complete_exchange(&mut self.history, reduced.to_turn());
        if self.in_flight {
            EXCHANGES_COMPLETED.click();
            self.record_usage(reduced.usage);
        }
        self.in_flight = false;
    }

    /// Record a failed exchange: the pending user turn leaves the history and is parked for
    /// [`ChatSession::retry`].
    pub fn fail(&mut self) {
        if !self.in_flight {
            return;
        }
        EXCHANGES_FAILED.click();
        self.failed_count = self.failed_count.saturating_add(1);
        if self.history.last().is_some_and(|t| t.role == Role::User) {
            self.pending_retry = self.history.pop();
        }
        self.in_flight = false;
    }

    /// Returns true while an exchange is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Returns true if a failed turn can be retried.
    pub fn has_pending_retry(&self) -> bool {
        self.pending_retry.is_some()
    }

    /// Clears the conversation history.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.history.clear();
        self.pending_retry = None;
        Ok(())
    }

    /// The conversation so far.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Returns the number of turns in the conversation.
    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    /// The active configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Changes the model used for responses.
    pub fn set_model(&mut self, model: Model) {
        self.config.model = model;
    }

    /// Returns the current model.
    pub fn model(&self) -> &Model {
        &self.config.model
    }

    /// Changes how responses are delivered.
    ///
    /// Leaving streaming-audio mode releases `player`, the device that mode played through.
    pub fn set_output_mode(&mut self, mode: OutputMode, player: &mut dyn ChunkPlayer) {
        if self.config.output_mode == OutputMode::StreamingAudio
            && mode != OutputMode::StreamingAudio
        {
            player.teardown();
        }
        self.config.output_mode = mode;
    }

    /// Returns the current output mode.
    pub fn output_mode(&self) -> OutputMode {
        self.config.output_mode
    }

    /// Changes how user turns are built.
    pub fn set_input_mode(&mut self, mode: InputMode) {
        self.config.input_mode = mode;
    }

    /// Returns the current input mode.
    pub fn input_mode(&self) -> InputMode {
        self.config.input_mode
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            model: self.config.model.clone(),
            output_mode: self.config.output_mode,
            input_mode: self.config.input_mode,
            voice: self.config.voice.clone(),
            message_count: self.message_count(),
            total_requests: self.request_count,
            failed_requests: self.failed_count,
            total_prompt_tokens: self.usage_totals.prompt_tokens,
            total_completion_tokens: self.usage_totals.completion_tokens,
            last_turn_usage: self.last_turn_usage,
            retry_pending: self.has_pending_retry(),
        }
    }

    fn record_usage(&mut self, usage: Option<Usage>) {
        self.last_turn_usage = usage;
        if let Some(usage) = usage {
            self.usage_totals = self.usage_totals + usage;
        }
    }
}
