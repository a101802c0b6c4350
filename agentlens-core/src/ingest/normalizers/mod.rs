//! Provider normalizer implementations
//!
//! One stateful normalizer per supported provider. Each consumes raw parsed
//! objects for its provider and emits zero or more canonical events,
//! maintaining whatever per-session state asynchronous call pairing and
//! model tracking require.

mod claude;
mod codex;
mod gemini;

pub use claude::ClaudeCodeNormalizer;
pub use codex::CodexNormalizer;
pub use gemini::GeminiNormalizer;
