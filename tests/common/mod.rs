//! Shared helpers for integration tests: a scripted chat provider and a
//! throwaway HTTP server.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use quillmind::core::{ChatMessage, ProviderKind, QuillError, Result, Settings, SettingsStore};
use quillmind::engine::EngineContext;
use quillmind::llm::{ChatProvider, LoadProgress, ProgressSink, ProviderSet, StreamOutcome, TokenSink};

/// What the scripted provider does after its tokens run out
#[derive(Debug, Clone)]
pub enum Ending {
    Complete,
    Fail(String),
    /// Never finish on its own; only an abort ends the stream
    Hang,
}

/// A `ChatProvider` driven entirely by test configuration
pub struct ScriptedProvider {
    kind: ProviderKind,
    models: Mutex<std::result::Result<Vec<String>, String>>,
    init_failures: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    ending: Mutex<Ending>,
    token_delay: Duration,
    ready: AtomicBool,
    aborted: AtomicBool,
    abort_notify: Notify,
    pub list_calls: AtomicUsize,
    pub init_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub histories: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            models: Mutex::new(Ok(vec![format!("{}-model", kind)])),
            init_failures: AtomicUsize::new(0),
            tokens: Mutex::new(vec!["Hello".into(), ", ".into(), "world".into()]),
            ending: Mutex::new(Ending::Complete),
            token_delay: Duration::from_millis(0),
            ready: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            abort_notify: Notify::new(),
            list_calls: AtomicUsize::new(0),
            init_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(self, models: &[&str]) -> Self {
        *self.models.lock() = Ok(models.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn offline(self) -> Self {
        *self.models.lock() = Err("connection refused".to_string());
        self
    }

    /// Fail the next `count` initializations
    pub fn failing_init(self, count: usize) -> Self {
        self.init_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_tokens(self, tokens: &[&str]) -> Self {
        *self.tokens.lock() = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn ending(self, ending: Ending) -> Self {
        *self.ending.lock() = ending;
        self
    }

    pub fn token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    pub fn set_ending(&self, ending: Ending) {
        *self.ending.lock() = ending;
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn initialize(&self, model: &str, on_progress: &ProgressSink<'_>) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        on_progress(LoadProgress::from_fraction(0.5, format!("loading {}", model)));

        let remaining = self.init_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures.store(remaining - 1, Ordering::SeqCst);
            self.ready.store(false, Ordering::SeqCst);
            return Err(QuillError::embedded(format!("cannot load {}", model)));
        }

        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().clone().map_err(QuillError::ollama)
    }

    async fn stream_chat(
        &self,
        _model: &str,
        history: &[ChatMessage],
        on_token: &TokenSink<'_>,
    ) -> Result<StreamOutcome> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().push(history.to_vec());
        self.aborted.store(false, Ordering::SeqCst);

        let tokens = self.tokens.lock().clone();
        let mut content = String::new();
        for token in tokens {
            if self.aborted.load(Ordering::SeqCst) {
                return Ok(StreamOutcome::aborted(content));
            }
            content.push_str(&token);
            on_token(&token);
            if !self.token_delay.is_zero() {
                tokio::time::sleep(self.token_delay).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        let ending = self.ending.lock().clone();
        match ending {
            Ending::Complete => Ok(StreamOutcome::done(content)),
            Ending::Fail(message) => Err(QuillError::cloud(message)),
            Ending::Hang => loop {
                if self.aborted.load(Ordering::SeqCst) {
                    return Ok(StreamOutcome::aborted(content));
                }
                self.abort_notify.notified().await;
            },
        }
    }

    fn abort(&self) {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        self.aborted.store(true, Ordering::SeqCst);
        self.abort_notify.notify_one();
    }
}

/// The three scripted providers behind an engine context
pub struct Harness {
    pub ctx: Arc<EngineContext>,
    pub settings: Arc<SettingsStore>,
    pub ollama: Arc<ScriptedProvider>,
    pub embedded: Arc<ScriptedProvider>,
    pub cloud: Arc<ScriptedProvider>,
}

pub fn harness(
    settings: Settings,
    ollama: ScriptedProvider,
    embedded: ScriptedProvider,
    cloud: ScriptedProvider,
) -> Harness {
    let settings = Arc::new(SettingsStore::in_memory(settings));
    let ollama = Arc::new(ollama);
    let embedded = Arc::new(embedded);
    let cloud = Arc::new(cloud);
    let providers = ProviderSet::new(
        ollama.clone() as Arc<dyn ChatProvider>,
        embedded.clone() as Arc<dyn ChatProvider>,
        cloud.clone() as Arc<dyn ChatProvider>,
    );

    Harness {
        ctx: EngineContext::with_providers(Arc::clone(&settings), providers),
        settings,
        ollama,
        embedded,
        cloud,
    }
}

/// Canned HTTP reply
#[derive(Debug, Clone)]
pub struct StubReply {
    pub status: u16,
    pub content_type: &'static str,
    /// Written one after another, flushed individually
    pub chunks: Vec<String>,
    pub chunk_delay: Duration,
    /// Keep the connection open after the chunks instead of closing it
    pub hold_open: bool,
}

impl StubReply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body.into()],
            chunk_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn stream(content_type: &'static str, chunks: &[&str]) -> Self {
        Self {
            status: 200,
            content_type,
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            chunk_delay: Duration::from_millis(5),
            hold_open: false,
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Accept the request but never answer
    pub fn silent() -> Self {
        Self {
            status: 0,
            content_type: "",
            chunks: Vec::new(),
            chunk_delay: Duration::ZERO,
            hold_open: true,
        }
    }
}

/// A request the stub received
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct StubServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<StubRequest>>>,
}

/// Serve `handler`'s replies on a random local port
pub async fn spawn_stub<F>(handler: F) -> StubServer
where
    F: Fn(&StubRequest) -> StubReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let log = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let _ = read_request(stream, handler.as_ref(), &log).await;
            });
        }
    });

    StubServer { url, requests }
}

async fn read_request<F>(
    mut stream: TcpStream,
    handler: &F,
    log: &Mutex<Vec<StubRequest>>,
) -> Option<()>
where
    F: Fn(&StubRequest) -> StubReply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let request = StubRequest {
        method,
        path,
        headers,
        body,
    };
    let reply = handler(&request);
    log.lock().push(request);

    if reply.status != 0 {
        let head = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
            reply.status, reply.content_type
        );
        stream.write_all(head.as_bytes()).await.ok()?;
        for part in &reply.chunks {
            stream.write_all(part.as_bytes()).await.ok()?;
            stream.flush().await.ok()?;
            if !reply.chunk_delay.is_zero() {
                tokio::time::sleep(reply.chunk_delay).await;
            }
        }
    }

    if reply.hold_open {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    let _ = stream.shutdown().await;
    Some(())
}

/// Settings with every file-backed location pointed somewhere harmless
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedded.model_dir = Some(
        std::env::temp_dir().join(format!("quillmind-models-{}", uuid::Uuid::new_v4())),
    );
    settings
}
