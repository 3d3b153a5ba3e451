//! LLM module - chat backend integrations
//!
//! Ollama is the primary backend; the embedded engine and the OpenAI-compatible
//! cloud client live under `provider`.

pub mod abort;
pub mod ollama;
pub mod provider;
pub mod stream;
pub mod traits;

pub use ollama::OllamaClient;
pub use provider::embedded::EmbeddedEngine;
pub use provider::openai::OpenAiClient;
pub use provider::{create_providers, ProviderSet};
pub use traits::{
    ChatProvider, Finish, LoadProgress, Probe, ProgressSink, StreamOutcome, TokenSink,
};
