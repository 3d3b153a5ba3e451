//! quillmind - local-first chat assistant engine
//!
//! Picks a chat backend for a notes application and streams replies from it:
//! a locally running Ollama server when one has models, otherwise an embedded
//! model run on a worker thread, or an OpenAI-compatible cloud API when the
//! user has configured one.
//!
//! # Architecture
//!
//! - **Core**: Shared types, settings, and error handling
//! - **LLM**: The `ChatProvider` trait and its Ollama, embedded and cloud clients
//! - **Engine**: Backend detection, fallback and the observable engine state
//! - **Chat**: Message list, single-flight sends and abort routing
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quillmind::{ChatSession, EngineContext, SettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> quillmind::Result<()> {
//!     let ctx = EngineContext::new(Arc::new(SettingsStore::load()))?;
//!     ctx.start().await;
//!
//!     let session = ChatSession::new(ctx);
//!     session
//!         .send_message("Summarize my meeting notes", &|token: &str| print!("{}", token))
//!         .await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod cli;
pub mod core;
pub mod engine;
pub mod llm;

// Re-export commonly used items
pub use chat::{ChatSession, SendOutcome};
pub use cli::Repl;
pub use core::{ChatMessage, ProviderKind, QuillError, Result, Settings, SettingsStore};
pub use engine::{EngineContext, EnginePhase, EngineStatus};
