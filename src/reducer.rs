//! Reduction of a streamed completion into events and a finished assistant turn.
//!
//! Each chunk of the response is normalized into a [`Fragment`] and demultiplexed: text goes
//! to the caller as it arrives and into the text buffer, audio is either handed on for
//! immediate playback or buffered for playback after completion, and the terminal usage
//! record is captured once.

use std::fmt;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedSender;

use crate::chat::OutputMode;
use crate::codec::decode_base64;
use crate::error::{Error, Result};
use crate::observability::{
    REDUCER_AUDIO_BYTES, REDUCER_DECODE_FAILURES, REDUCER_TEXT_DELTAS, STREAM_DURATION,
};
use crate::types::{ChatCompletionChunk, Fragment, Turn, Usage};

/// An event produced while an exchange is in flight.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A text delta to render.
    TextDelta(String),
    /// Decoded 16-bit PCM to hand to the streaming player.
    AudioDelta(Vec<u8>),
    /// A non-fatal anomaly worth showing the user.
    Diagnostic(String),
    /// The usage record of the response.
    UsageReport(Usage),
    /// The remote call failed; no assistant turn was produced.
    StreamFailed(StreamFailure),
    /// The response completed.
    StreamComplete(ReducedTurn),
}

impl ChatEvent {
    /// Returns true for the events that end an exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::StreamFailed(_) | ChatEvent::StreamComplete(_)
        )
    }
}

/// Receives events in the order they were produced.
pub trait EventSink {
    /// Deliver one event.
    fn emit(&mut self, event: ChatEvent);
}

impl EventSink for Vec<ChatEvent> {
    fn emit(&mut self, event: ChatEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<ChatEvent> {
    fn emit(&mut self, event: ChatEvent) {
        if self.send(event).is_err() {
            tracing::debug!("event receiver dropped; discarding event");
        }
    }
}

/// Per-call accumulation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAccumulator {
    /// Concatenated text deltas.
    pub text: String,
    /// Concatenated PCM, in buffered-audio mode only.
    pub audio: Vec<u8>,
    /// Concatenated audio transcript deltas.
    pub transcript: String,
    /// The usage record, set at most once.
    pub usage: Option<Usage>,
    /// Bytes of PCM handed on for streaming playback.
    pub streamed_audio_bytes: usize,
}

/// The finished assistant response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReducedTurn {
    /// Full response text; may be empty.
    pub text: String,
    /// Buffered PCM (24 kHz mono 16-bit), empty unless in buffered-audio mode.
    pub audio: Vec<u8>,
    /// Transcript of the spoken response.
    pub transcript: String,
    /// Usage, if the server reported it.
    pub usage: Option<Usage>,
}

impl ReducedTurn {
    /// The assistant turn to append to history.
    pub fn to_turn(&self) -> Turn {
        Turn::assistant(self.text.clone())
    }

    /// Returns true if buffered audio was collected.
    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }
}

/// A failed exchange and whatever had arrived before it failed.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    /// What went wrong.
    pub error: Error,
    /// Text delivered before the failure.
    pub partial_text: String,
    /// Buffered PCM collected before the failure.
    pub partial_audio: Vec<u8>,
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Stateful reducer for one remote call.
#[derive(Debug, Clone)]
pub struct StreamReducer {
    mode: OutputMode,
    acc: StreamAccumulator,
}

impl StreamReducer {
    /// Create a reducer for a response delivered in `mode`.
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            acc: StreamAccumulator::default(),
        }
    }

    /// The state accumulated so far.
    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.acc
    }

    /// Apply one fragment, emitting events to `sink` in text, audio, usage order.
    pub fn apply(&mut self, fragment: Fragment, sink: &mut impl EventSink) {
        if self.acc.usage.is_some() && fragment.has_content() {
            sink.emit(ChatEvent::Diagnostic(
                "response content arrived after the usage report".to_string(),
            ));
        }

        if let Some(text) = fragment.text.filter(|t| !t.is_empty()) {
            REDUCER_TEXT_DELTAS.click();
            self.acc.text.push_str(&text);
            sink.emit(ChatEvent::TextDelta(text));
        }

        if let Some(audio) = fragment.audio.filter(|_| self.mode.wants_audio()) {
            if let Some(transcript) = audio.transcript.as_deref() {
                self.acc.transcript.push_str(transcript);
            }
            if let Some(data) = audio.data.as_deref() {
                self.apply_audio(data, audio.transcript.as_deref(), sink);
            }
        }

        if let Some(usage) = fragment.usage {
            if self.acc.usage.is_none() {
                self.acc.usage = Some(usage);
                sink.emit(ChatEvent::UsageReport(usage));
            } else {
                sink.emit(ChatEvent::Diagnostic(
                    "ignoring a second usage report".to_string(),
                ));
            }
        }
    }

    /// Apply one raw chunk.
    pub fn apply_chunk(&mut self, chunk: ChatCompletionChunk, sink: &mut impl EventSink) {
        self.apply(Fragment::from(chunk), sink);
    }

    fn apply_audio(&mut self, data: &str, transcript: Option<&str>, sink: &mut impl EventSink) {
        let pcm = match decode_base64(data) {
            Ok(pcm) => pcm,
            Err(err) => {
                REDUCER_DECODE_FAILURES.click();
                tracing::warn!(error = %err, "skipping undecodable audio chunk");
                let message = match transcript {
                    Some(transcript) if !transcript.is_empty() => {
                        format!("could not decode an audio chunk ({err}); transcript: {transcript}")
                    }
                    _ => format!("could not decode an audio chunk ({err})"),
                };
                sink.emit(ChatEvent::Diagnostic(message));
                return;
            }
        };
        if pcm.is_empty() {
            return;
        }
        REDUCER_AUDIO_BYTES.count(pcm.len() as u64);
        match self.mode {
            OutputMode::StreamingAudio => {
                self.acc.streamed_audio_bytes += pcm.len();
                sink.emit(ChatEvent::AudioDelta(pcm));
            }
            OutputMode::BufferedAudio => self.acc.audio.extend_from_slice(&pcm),
            OutputMode::TextOnly => {}
        }
    }

    /// Finish a response that completed normally.
    pub fn finish(self) -> ReducedTurn {
        ReducedTurn {
            text: self.acc.text,
            audio: self.acc.audio,
            transcript: self.acc.transcript,
            usage: self.acc.usage,
        }
    }

    /// Finish a response that failed.
    pub fn fail(self, error: Error) -> StreamFailure {
        StreamFailure {
            error,
            partial_text: self.acc.text,
            partial_audio: self.acc.audio,
        }
    }
}

/// Drive `stream` to completion, emitting events to `sink` as fragments arrive.
///
/// The first error ends the reduction.  Terminal events are left to the caller.
pub async fn reduce_stream<S, K>(
    mut stream: S,
    mode: OutputMode,
    sink: &mut K,
) -> std::result::Result<ReducedTurn, StreamFailure>
where
    S: Stream<Item = Result<ChatCompletionChunk>> + Unpin,
    K: EventSink,
{
    let start = Instant::now();
    let mut reducer = StreamReducer::new(mode);
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => reducer.apply_chunk(chunk, sink),
            Err(err) => {
                tracing::warn!(error = %err, "response stream failed");
                return Err(reducer.fail(err));
            }
        }
    }
    STREAM_DURATION.add(start.elapsed().as_secs_f64());
    Ok(reducer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_base64;
    use crate::types::AudioDelta;
    use futures::stream;

    fn texts(events: &[ChatEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::TextDelta(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_and_usage() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::TextOnly);
        reducer.apply(Fragment::text("Hi"), &mut events);
        reducer.apply(Fragment::text(" there"), &mut events);
        reducer.apply(Fragment::usage(Usage::new(5, 2)), &mut events);
        let turn = reducer.finish();

        assert_eq!(turn.text, "Hi there");
        assert_eq!(turn.usage, Some(Usage::new(5, 2)));
        assert_eq!(turn.to_turn(), Turn::assistant("Hi there"));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], ChatEvent::UsageReport(u) if u == Usage::new(5, 2)));
    }

    #[test]
    fn text_only_ignores_audio() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::TextOnly);
        reducer.apply(Fragment::audio(encode_base64(&[1, 0, 2, 0])), &mut events);
        assert!(events.is_empty());
        assert!(reducer.finish().audio.is_empty());
    }

    #[test]
    fn buffered_audio_concatenates_in_arrival_order() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::BufferedAudio);
        reducer.apply(Fragment::audio(encode_base64(&[1, 2])), &mut events);
        reducer.apply(Fragment::text("ok"), &mut events);
        reducer.apply(Fragment::audio(encode_base64(&[3, 4, 5, 6])), &mut events);
        let turn = reducer.finish();
        assert_eq!(turn.audio, vec![1, 2, 3, 4, 5, 6]);
        assert!(turn.has_audio());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn streaming_audio_emits_each_chunk() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::StreamingAudio);
        reducer.apply(Fragment::audio(encode_base64(&[1, 2])), &mut events);
        reducer.apply(Fragment::audio(encode_base64(&[3, 4])), &mut events);
        assert_eq!(reducer.accumulator().streamed_audio_bytes, 4);
        let turn = reducer.finish();
        assert!(turn.audio.is_empty());
        let chunks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::AudioDelta(pcm) => Some(pcm.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn undecodable_audio_is_a_diagnostic() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::BufferedAudio);
        reducer.apply(
            Fragment {
                audio: Some(AudioDelta {
                    data: Some("@@not base64@@".to_string()),
                    transcript: Some("hello".to_string()),
                    ..AudioDelta::default()
                }),
                ..Fragment::default()
            },
            &mut events,
        );
        reducer.apply(Fragment::audio(encode_base64(&[9, 9])), &mut events);
        assert!(matches!(&events[0], ChatEvent::Diagnostic(m) if m.contains("hello")));
        let turn = reducer.finish();
        assert_eq!(turn.audio, vec![9, 9]);
        assert_eq!(turn.transcript, "hello");
    }

    #[test]
    fn second_usage_and_late_content_are_diagnostics() {
        let mut events = Vec::new();
        let mut reducer = StreamReducer::new(OutputMode::TextOnly);
        reducer.apply(Fragment::usage(Usage::new(1, 1)), &mut events);
        reducer.apply(Fragment::text("late"), &mut events);
        reducer.apply(Fragment::usage(Usage::new(9, 9)), &mut events);
        let turn = reducer.finish();
        assert_eq!(turn.usage, Some(Usage::new(1, 1)));
        assert_eq!(turn.text, "late");
        assert_eq!(texts(&events), "late");
        let diagnostics = events
            .iter()
            .filter(|e| matches!(e, ChatEvent::Diagnostic(_)))
            .count();
        assert_eq!(diagnostics, 2);
    }

    #[test]
    fn empty_response_is_valid() {
        let turn = StreamReducer::new(OutputMode::TextOnly).finish();
        assert_eq!(turn.text, "");
        assert_eq!(turn.to_turn(), Turn::assistant(""));
    }

    #[test]
    fn text_events_concatenate_to_final_text() {
        // Deterministic pseudo-random fragment sequences.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let alphabet = ["a", "bc", "", "é", " ", "日本", "\n", "xyz"];
        for _ in 0..200 {
            let mut events = Vec::new();
            let mut reducer = StreamReducer::new(OutputMode::BufferedAudio);
            let mut expected = String::new();
            for _ in 0..(next() % 20) {
                let fragment = match next() % 4 {
                    0 | 1 => {
                        let text = alphabet[(next() % alphabet.len() as u64) as usize];
                        expected.push_str(text);
                        Fragment::text(text)
                    }
                    2 => Fragment::audio(encode_base64(&[1, 2])),
                    _ => Fragment::usage(Usage::new(next() % 10, next() % 10)),
                };
                reducer.apply(fragment, &mut events);
            }
            let turn = reducer.finish();
            assert_eq!(texts(&events), turn.text);
            assert_eq!(turn.text, expected);
        }
    }

    #[tokio::test]
    async fn reduce_stream_stops_at_first_error() {
        let items: Vec<Result<ChatCompletionChunk>> = vec![
            Ok(Fragment::text("one ").into()),
            Ok(Fragment::text("two").into()),
            Err(Error::streaming("connection reset", None)),
            Ok(Fragment::text("three").into()),
        ];
        let mut events = Vec::new();
        let failure = reduce_stream(stream::iter(items), OutputMode::TextOnly, &mut events)
            .await
            .unwrap_err();
        assert_eq!(failure.partial_text, "one two");
        assert_eq!(texts(&events), "one two");
        assert!(failure.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn reduce_stream_over_channel() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let items: Vec<Result<ChatCompletionChunk>> = vec![
            Ok(Fragment::text("Hi").into()),
            Ok(Fragment::usage(Usage::new(5, 2)).into()),
        ];
        let turn = reduce_stream(stream::iter(items), OutputMode::TextOnly, &mut tx)
            .await
            .unwrap();
        assert_eq!(turn.text, "Hi");
        drop(tx);
        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(received.len(), 2);
    }
}
