//! Ollama client implementation
//!
//! Async HTTP client for the Ollama API: model discovery with a short probe
//! timeout, and streaming chat over newline-delimited JSON.

use async_trait::async_trait;
use futures::future::Abortable;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::{ChatMessage, ProviderKind, QuillError, Result, Settings};
use crate::llm::abort::AbortSlot;
use crate::llm::stream::{parse_ndjson_line, LineBuffer};
use crate::llm::traits::{ChatProvider, ProgressSink, Probe, StreamOutcome, TokenSink};

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: RwLock<String>,
    probe_timeout: Duration,
    ready: AtomicBool,
    abort: AbortSlot,
}

/// Ollama chat request
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

/// Ollama message format
#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Ollama streaming chunk response
#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Message in streaming response
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

/// Ollama models list response
#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Model information
#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.ollama.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: RwLock::new(settings.ollama_url()),
            probe_timeout: Duration::from_millis(settings.ollama.probe_timeout_ms),
            ready: AtomicBool::new(false),
            abort: AbortSlot::new(),
        })
    }

    /// Create a client with custom base URL and probe timeout
    pub fn with_base_url(base_url: impl Into<String>, probe_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            base_url: RwLock::new(base_url.into()),
            probe_timeout,
            ready: AtomicBool::new(false),
            abort: AbortSlot::new(),
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.read().clone()
    }

    /// Check whether `model` is installed; a bare name matches any tag
    pub async fn is_model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(model_matches(&models, model))
    }

    /// Pull/download a model
    pub async fn pull_model(&self, model: &str) -> Result<()> {
        #[derive(Serialize)]
        struct PullRequest<'a> {
            name: &'a str,
            stream: bool,
        }

        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url()))
            .json(&PullRequest {
                name: model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            return Err(QuillError::ollama(format!(
                "Failed to pull model: {}",
                model
            )));
        }

        tracing::info!(model, "Model pulled");
        Ok(())
    }

    fn connect_error(&self, e: reqwest::Error) -> QuillError {
        if e.is_connect() {
            QuillError::ollama(format!(
                "Cannot connect to Ollama at {}. Is it running?",
                self.base_url()
            ))
        } else {
            QuillError::from(e)
        }
    }

    /// Internal streaming implementation; appends delivered text to `content`
    async fn chat_stream_internal(
        &self,
        model: &str,
        history: &[ChatMessage],
        on_token: &TokenSink<'_>,
        content: &mut String,
    ) -> Result<()> {
        let request = ChatRequest {
            model,
            messages: history
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        tracing::debug!(model, messages = history.len(), "Ollama chat request");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 404 && error_text.contains("not found") {
                return Err(QuillError::ModelNotFound(model.to_string()));
            }

            return Err(QuillError::ollama(format!(
                "Ollama API error ({}): {}",
                status, error_text
            )));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk =
                chunk_result.map_err(|e| QuillError::ollama(format!("Stream error: {}", e)))?;

            for line in lines.push(&chunk) {
                if apply_chunk(&line, on_token, content)? {
                    return Ok(());
                }
            }
        }

        // Body ended without a trailing newline
        if let Some(line) = lines.finish() {
            apply_chunk(&line, on_token, content)?;
        }

        Ok(())
    }
}

/// Apply one NDJSON line; returns `true` once the terminal chunk is seen
fn apply_chunk(line: &str, on_token: &TokenSink<'_>, content: &mut String) -> Result<bool> {
    let Some(chunk) = parse_ndjson_line::<StreamChunkResponse>(line) else {
        return Ok(false);
    };

    if let Some(error) = chunk.error {
        return Err(QuillError::ollama(error));
    }

    if let Some(msg) = chunk.message {
        if !msg.content.is_empty() {
            content.push_str(&msg.content);
            on_token(&msg.content);
        }
    }

    Ok(chunk.done)
}

fn model_matches(models: &[String], model: &str) -> bool {
    models
        .iter()
        .any(|m| m == model || (!model.contains(':') && m.split(':').next() == Some(model)))
}

#[async_trait]
impl ChatProvider for OllamaClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    async fn initialize(&self, model: &str, _on_progress: &ProgressSink<'_>) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        if !self.is_model_available(model).await? {
            return Err(QuillError::ModelNotFound(model.to_string()));
        }

        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(model, url = %self.base_url(), "Ollama ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// `/api/tags` under the probe timeout; absence is a normal answer
    async fn probe(&self) -> Probe {
        match self.list_models().await {
            Ok(models) => Probe::Online(models),
            Err(e) => {
                tracing::info!(url = %self.base_url(), reason = %e, "Ollama not detected");
                Probe::Offline
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url()))
            .send();

        let response = tokio::time::timeout(self.probe_timeout, request)
            .await
            .map_err(|_| {
                QuillError::ollama(format!(
                    "Timed out after {}ms waiting for {}",
                    self.probe_timeout.as_millis(),
                    self.base_url()
                ))
            })?
            .map_err(|e| self.connect_error(e))?;

        if !response.status().is_success() {
            return Err(QuillError::ollama(format!(
                "Failed to list models ({})",
                response.status()
            )));
        }

        let models_response: ModelsResponse =
            tokio::time::timeout(self.probe_timeout, response.json())
                .await
                .map_err(|_| QuillError::ollama("Timed out reading model list"))??;
        Ok(models_response.models.into_iter().map(|m| m.name).collect())
    }

    async fn stream_chat(
        &self,
        model: &str,
        history: &[ChatMessage],
        on_token: &TokenSink<'_>,
    ) -> Result<StreamOutcome> {
        if !self.is_ready() {
            return Err(QuillError::NotReady(self.name().to_string()));
        }

        let registration = self.abort.begin();
        let mut content = String::new();
        let result = Abortable::new(
            self.chat_stream_internal(model, history, on_token, &mut content),
            registration,
        )
        .await;
        self.abort.clear();

        match result {
            Ok(Ok(())) => Ok(StreamOutcome::done(content)),
            Ok(Err(e)) => Err(e),
            Err(_aborted) => {
                tracing::debug!(model, "Ollama generation aborted");
                Ok(StreamOutcome::aborted(content))
            }
        }
    }

    fn abort(&self) {
        self.abort.abort();
    }

    fn reconfigure(&self, settings: &Settings) {
        let url = settings.ollama_url();
        let mut base_url = self.base_url.write();
        if *base_url != url {
            tracing::info!(from = %*base_url, to = %url, "Ollama endpoint changed");
            *base_url = url;
            self.ready.store(false, Ordering::SeqCst);
        }
    }
}
