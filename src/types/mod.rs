// Public modules
pub mod chunk;
pub mod model;
pub mod request;
pub mod turn;
pub mod usage;

// Re-exports
pub use chunk::{AudioDelta, ChatCompletionChunk, ChunkChoice, Delta, Fragment};
pub use model::{KnownModel, Model};
pub use request::{AudioOutputConfig, ChatCompletionRequest, Modality, StreamOptions};
pub use turn::{ContentPart, Role, Turn, TurnContent};
pub use usage::Usage;
