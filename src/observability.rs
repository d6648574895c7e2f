use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("omnichat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("omnichat.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("omnichat.client.request_duration_seconds");

pub(crate) static STREAM_EVENTS: Counter = Counter::new("omnichat.stream.events");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("omnichat.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("omnichat.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("omnichat.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("omnichat.stream.duration_seconds");

pub(crate) static REDUCER_TEXT_DELTAS: Counter = Counter::new("omnichat.reducer.text_deltas");
pub(crate) static REDUCER_AUDIO_BYTES: Counter = Counter::new("omnichat.reducer.audio_bytes");
pub(crate) static REDUCER_DECODE_FAILURES: Counter =
    Counter::new("omnichat.reducer.decode_failures");

pub(crate) static CAPTURE_CHUNKS: Counter = Counter::new("omnichat.capture.chunks");
pub(crate) static CAPTURE_READ_ERRORS: Counter = Counter::new("omnichat.capture.read_errors");
pub(crate) static PLAYBACK_CHUNKS: Counter = Counter::new("omnichat.playback.chunks");
pub(crate) static PLAYBACK_FAILURES: Counter = Counter::new("omnichat.playback.failures");

pub(crate) static EXCHANGES_COMPLETED: Counter = Counter::new("omnichat.session.exchanges");
pub(crate) static EXCHANGES_FAILED: Counter = Counter::new("omnichat.session.failed_exchanges");
pub(crate) static SUBMISSIONS_REJECTED: Counter =
    Counter::new("omnichat.session.rejected_submissions");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_EVENTS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&REDUCER_TEXT_DELTAS);
    collector.register_counter(&REDUCER_AUDIO_BYTES);
    collector.register_counter(&REDUCER_DECODE_FAILURES);

    collector.register_counter(&CAPTURE_CHUNKS);
    collector.register_counter(&CAPTURE_READ_ERRORS);
    collector.register_counter(&PLAYBACK_CHUNKS);
    collector.register_counter(&PLAYBACK_FAILURES);

    collector.register_counter(&EXCHANGES_COMPLETED);
    collector.register_counter(&EXCHANGES_FAILED);
    collector.register_counter(&SUBMISSIONS_REJECTED);
}
