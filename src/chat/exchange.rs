//! Foreground side of one exchange: drain worker events in order and apply them.

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::audio::ChunkPlayer;
use crate::chat::session::ChatSession;
use crate::chat::worker::ChatWorker;
use crate::error::{Error, Result};
use crate::reducer::{ChatEvent, ReducedTurn, StreamFailure};
use crate::render::Renderer;

/// How an exchange ended.
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The assistant turn was appended to history.
    Completed(ReducedTurn),
    /// The exchange failed; the user turn was parked for retry.
    Failed(StreamFailure),
}

impl ExchangeOutcome {
    /// Returns true if the exchange completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, ExchangeOutcome::Completed(_))
    }
}

/// Submit the session's pending request to `worker` and drive it to its terminal event.
///
/// Text deltas are rendered as they arrive and streamed audio is written to `player` in
/// arrival order.  A playback failure is reported once and the exchange continues.
pub async fn drive_exchange(
    session: &mut ChatSession,
    worker: &mut ChatWorker,
    renderer: &mut dyn Renderer,
    player: &mut dyn ChunkPlayer,
) -> Result<ExchangeOutcome> {
    if let Err(err) = worker.submit(session.request(), session.output_mode()) {
        session.fail();
        return Err(err);
    }
    let mut playback_failed = false;
    let mut responded = false;
    while let Some(event) = worker.next_event().await {
        match event {
            ChatEvent::TextDelta(text) => {
                if !responded {
                    renderer.start_response();
                    responded = true;
                }
                renderer.print_text(&text);
            }
            ChatEvent::AudioDelta(pcm) => {
                if playback_failed {
                    continue;
                }
                if let Err(err) = player.write_chunk(&pcm) {
                    renderer.print_error(&format!("audio playback failed: {err}"));
                    playback_failed = true;
                }
            }
            ChatEvent::Diagnostic(message) => renderer.print_diagnostic(&message),
            ChatEvent::UsageReport(usage) => {
                renderer.finish_response();
                renderer.print_usage(&usage);
            }
            ChatEvent::StreamComplete(reduced) => {
                renderer.finish_response();
                finish_playback(player);
                session.complete(&reduced);
                return Ok(ExchangeOutcome::Completed(reduced));
            }
            ChatEvent::StreamFailed(failure) => {
                renderer.finish_response();
                finish_playback(player);
                session.fail();
                renderer.print_error(&failure.to_string());
                if session.has_pending_retry() {
                    renderer.print_info("Use /retry to send the message again.");
                }
                return Ok(ExchangeOutcome::Failed(failure));
            }
        }
    }
    // The event channel closed without a terminal event.
    session.fail();
    Ok(ExchangeOutcome::Failed(StreamFailure {
        error: Error::streaming("response worker stopped unexpectedly", None),
        partial_text: String::new(),
        partial_audio: Vec::new(),
    }))
}

/// Wait for queued audio without stalling other tasks on a multi-threaded runtime.
fn finish_playback(player: &mut dyn ChunkPlayer) {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| player.finish()),
        _ => player.finish(),
    }
}
