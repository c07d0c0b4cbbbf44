use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for worker streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Default per-stream buffer bound.  Producers block (backpressure) rather
/// than buffering past this many undelivered chunks.
pub const STREAM_BUFFER_CHUNKS: usize = 64;

/// Token usage for a completed exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}
