// Public modules
pub mod audio;
pub mod chat;
pub mod client;
pub mod codec;
pub mod error;
pub mod observability;
pub mod reducer;
pub mod render;
pub mod sse;
pub mod types;

// Re-exports
pub use client::{ChatTransport, ChunkStream, OmniClient};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use reducer::{ChatEvent, EventSink, ReducedTurn, StreamFailure, StreamReducer, reduce_stream};
pub use types::*;
