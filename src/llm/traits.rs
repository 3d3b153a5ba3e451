//! Chat provider trait shared by every backend
//!
//! The engine and the chat session only ever talk to a `dyn ChatProvider`;
//! Ollama, the embedded engine and the cloud client each implement it once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{ChatMessage, ProviderKind, Result, Settings};

/// Callback invoked for every streamed token, in arrival order
pub type TokenSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Callback invoked while a provider prepares its model
pub type ProgressSink<'a> = dyn Fn(LoadProgress) + Send + Sync + 'a;

/// Model load progress, for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    /// Percentage, 0-100
    pub progress: u8,
    /// Human-readable stage description
    pub text: String,
}

impl LoadProgress {
    /// Build from a fractional value in 0.0..=1.0
    pub fn from_fraction(fraction: f32, text: impl Into<String>) -> Self {
        let clamped = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            progress: (clamped * 100.0).round() as u8,
            text: text.into(),
        }
    }
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// The backend sent its terminal signal
    Done,
    /// The user stopped the generation
    Aborted,
}

/// Result of a completed (or user-stopped) streaming call
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// Everything delivered through the token sink
    pub content: String,
    pub finish: Finish,
}

impl StreamOutcome {
    pub fn done(content: String) -> Self {
        Self {
            content,
            finish: Finish::Done,
        }
    }

    pub fn aborted(content: String) -> Self {
        Self {
            content,
            finish: Finish::Aborted,
        }
    }
}

/// What probing a backend found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Unreachable, timed out, or answered with an error status
    Offline,
    /// Reachable; the models it can serve (possibly none)
    Online(Vec<String>),
}

/// A chat backend
///
/// `stream_chat` returning `Ok` plays the role of "complete", `Err` is the single
/// error notification. A user abort is reported as `Ok` with [`Finish::Aborted`].
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> ProviderKind;

    /// Display name
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Prepare `model` for generation
    async fn initialize(&self, model: &str, on_progress: &ProgressSink<'_>) -> Result<()>;

    /// Whether `initialize` has succeeded
    fn is_ready(&self) -> bool;

    /// Models this backend can serve
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Check whether the backend is there at all
    async fn probe(&self) -> Probe {
        match self.list_models().await {
            Ok(models) => Probe::Online(models),
            Err(e) => {
                tracing::debug!(provider = %self.kind(), reason = %e, "Backend not reachable");
                Probe::Offline
            }
        }
    }

    /// Stream a reply to `history`, calling `on_token` for every piece of text
    async fn stream_chat(
        &self,
        model: &str,
        history: &[ChatMessage],
        on_token: &TokenSink<'_>,
    ) -> Result<StreamOutcome>;

    /// Stop the generation this provider is currently running, if any
    fn abort(&self);

    /// Validate connectivity/credentials without a real generation
    async fn test_connection(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }

    /// Pick up changed settings (hosts, keys)
    fn reconfigure(&self, _settings: &Settings) {}
}
