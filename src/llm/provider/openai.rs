//! OpenAI-compatible cloud provider
//!
//! Streams `/chat/completions` over Server-Sent-Events. Works against OpenAI,
//! OpenRouter, Groq, DeepSeek, or any server speaking the same protocol.

use async_trait::async_trait;
use futures::future::Abortable;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::config::CloudConfig;
use crate::core::{ChatMessage, ProviderKind, QuillError, Result, Settings};
use crate::llm::abort::AbortSlot;
use crate::llm::stream::{parse_sse_line, LineBuffer, SseEvent};
use crate::llm::traits::{ChatProvider, ProgressSink, StreamOutcome, TokenSink};

pub struct OpenAiClient {
    client: Client,
    config: RwLock<CloudConfig>,
    ready: AtomicBool,
    abort: AbortSlot,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.cloud.clone())
    }

    pub fn new(config: CloudConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            config: RwLock::new(config),
            ready: AtomicBool::new(false),
            abort: AbortSlot::new(),
        })
    }

    pub fn config(&self) -> CloudConfig {
        self.config.read().clone()
    }

    fn base_url(&self) -> Result<String> {
        self.config
            .read()
            .resolved_base_url()
            .ok_or_else(|| QuillError::config("Cloud base URL is not set"))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.config.read().api_key.clone();
        if key.trim().is_empty() {
            builder
        } else {
            builder.bearer_auth(key.trim())
        }
    }

    fn status_error(status: StatusCode, body: &str) -> QuillError {
        let detail = serde_json::from_str::<CompletionChunk>(body)
            .ok()
            .and_then(|c| c.error)
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                QuillError::cloud(format!("Invalid API key ({}): {}", status, detail))
            }
            StatusCode::NOT_FOUND => {
                QuillError::cloud(format!("Endpoint or model not found: {}", detail))
            }
            _ => QuillError::cloud(format!("API error ({}): {}", status, detail)),
        }
    }

    /// Cheapest possible completion, used when `/models` is not served
    async fn minimal_completion(&self, base_url: &str) -> Result<()> {
        let model = self.config.read().resolved_model();
        let request = CompletionRequest {
            model: &model,
            messages: vec![WireMessage {
                role: "user",
                content: "hi",
            }],
            stream: false,
            max_tokens: Some(1),
        };

        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", base_url)))
            .json(&request)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Self::status_error(status, &body))
        }
    }

    async fn chat_stream_internal(
        &self,
        model: &str,
        history: &[ChatMessage],
        on_token: &TokenSink<'_>,
        content: &mut String,
    ) -> Result<()> {
        let base_url = self.base_url()?;
        let request = CompletionRequest {
            model,
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            max_tokens: None,
        };

        tracing::debug!(model, messages = history.len(), "Cloud chat request");

        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", base_url)))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk =
                chunk_result.map_err(|e| QuillError::cloud(format!("Stream error: {}", e)))?;

            for line in lines.push(&chunk) {
                if apply_sse_line(&line, on_token, content)? {
                    return Ok(());
                }
            }
        }

        if let Some(line) = lines.finish() {
            apply_sse_line(&line, on_token, content)?;
        }

        Ok(())
    }
}

/// Apply one SSE line; returns `true` on `[DONE]`
fn apply_sse_line(line: &str, on_token: &TokenSink<'_>, content: &mut String) -> Result<bool> {
    let data = match parse_sse_line(line) {
        Some(SseEvent::Done) => return Ok(true),
        Some(SseEvent::Data(data)) => data,
        None => return Ok(false),
    };

    let chunk: CompletionChunk = match serde_json::from_str(&data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed SSE payload");
            return Ok(false);
        }
    };

    if let Some(error) = chunk.error {
        return Err(QuillError::cloud(error.message));
    }

    for choice in chunk.choices {
        if let Some(text) = choice.delta.and_then(|d| d.content) {
            if !text.is_empty() {
                content.push_str(&text);
                on_token(&text);
            }
        }
    }

    Ok(false)
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    async fn initialize(&self, model: &str, _on_progress: &ProgressSink<'_>) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        let config = self.config();
        if config.api_key.trim().is_empty() {
            return Err(QuillError::config("Cloud API key is not set"));
        }
        if config.resolved_base_url().is_none() {
            return Err(QuillError::config(
                "Cloud base URL is required for the custom provider",
            ));
        }

        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(model, provider = ?config.provider, "Cloud provider ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let base_url = self.base_url()?;
        let response = self
            .authorized(self.client.get(format!("{}/models", base_url)))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, &body));
        }

        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
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
            Err(_aborted) => Ok(StreamOutcome::aborted(content)),
        }
    }

    fn abort(&self) {
        self.abort.abort();
    }

    /// `GET /models`, falling back to a 1-token completion
    async fn test_connection(&self) -> Result<()> {
        let base_url = self.base_url()?;
        match self.list_models().await {
            Ok(models) => {
                tracing::info!(count = models.len(), "Cloud connection verified via /models");
                Ok(())
            }
            Err(QuillError::Cloud(msg)) if msg.starts_with("Invalid API key") => {
                Err(QuillError::Cloud(msg))
            }
            Err(e) => {
                tracing::debug!(error = %e, "/models unavailable, trying a minimal completion");
                self.minimal_completion(&base_url).await
            }
        }
    }

    fn reconfigure(&self, settings: &Settings) {
        let mut config = self.config.write();
        if *config != settings.cloud {
            *config = settings.cloud.clone();
            self.ready.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn run(lines: &[&str]) -> (Vec<String>, bool) {
        let seen = Mutex::new(Vec::new());
        let sink = |t: &str| seen.lock().unwrap().push(t.to_string());
        let mut content = String::new();
        let mut done = false;
        for line in lines {
            if apply_sse_line(line, &sink, &mut content).unwrap() {
                done = true;
                break;
            }
        }
        (seen.into_inner().unwrap(), done)
    }

    #[test]
    fn test_sse_tokens_until_done() {
        let (tokens, done) = run(&[
            ": processing",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}",
            "data: [DONE]",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}",
        ]);
        assert_eq!(tokens, vec!["Hel", "lo"]);
        assert!(done);
    }

    #[test]
    fn test_malformed_sse_payload_is_skipped() {
        let (tokens, done) = run(&[
            "data: {\"choices\":[{\"delta\"",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}",
        ]);
        assert_eq!(tokens, vec!["ok"]);
        assert!(!done);
    }

    #[test]
    fn test_error_payload_fails() {
        let sink = |_: &str| {};
        let mut content = String::new();
        let err = apply_sse_line(
            "data: {\"error\":{\"message\":\"quota exceeded\"}}",
            &sink,
            &mut content,
        )
        .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_status_error_messages() {
        let err = OpenAiClient::status_error(
            StatusCode::UNAUTHORIZED,
            "{\"error\":{\"message\":\"bad key\"}}",
        );
        assert!(err.to_string().contains("Invalid API key"));
        assert!(err.to_string().contains("bad key"));

        let err = OpenAiClient::status_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn test_initialize_requires_key() {
        let client = OpenAiClient::new(CloudConfig {
            api_key: String::new(),
            base_url: String::new(),
            model_name: String::new(),
            provider: Default::default(),
        })
        .unwrap();
        let progress = |_: crate::llm::traits::LoadProgress| {};
        assert!(client.initialize("gpt-4o-mini", &progress).await.is_err());
        assert!(!client.is_ready());
    }
}
