//! Embedded (in-process) chat provider
//!
//! The fallback used when no Ollama server is around. Loading and inference run
//! on a worker thread; this side only sends requests and folds the worker's
//! events back into the `ChatProvider` contract.

pub mod backend;
#[cfg(feature = "llama")]
pub mod llama;
pub mod protocol;
pub mod worker;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use crate::core::{ChatMessage, ProviderKind, QuillError, Result, Settings};
use crate::llm::traits::{ChatProvider, LoadProgress, ProgressSink, StreamOutcome, TokenSink};

pub use backend::{default_backend, InferenceBackend, ModelCache, UnavailableBackend};
pub use protocol::{WorkerEvent, WorkerRequest};

pub struct EmbeddedEngine {
    requests: UnboundedSender<WorkerRequest>,
    /// Held for the whole of an init or chat exchange
    events: Mutex<UnboundedReceiver<WorkerEvent>>,
    cache: ModelCache,
    default_model: String,
    loaded_model: RwLock<Option<String>>,
    ready: AtomicBool,
    generating: AtomicBool,
    abort_requested: AtomicBool,
    next_request_id: AtomicU64,
}

impl EmbeddedEngine {
    /// Spawn a worker around the backend chosen by the enabled features
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::with_backend(settings, default_backend(settings))
    }

    /// Spawn a worker around a specific backend
    pub fn with_backend(settings: &Settings, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let channels = worker::spawn_worker(backend)?;

        Ok(Self {
            requests: channels.requests,
            events: Mutex::new(channels.events),
            cache: ModelCache::from_settings(settings),
            default_model: settings.embedded.model_id.clone(),
            loaded_model: RwLock::new(None),
            ready: AtomicBool::new(false),
            generating: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
        })
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn loaded_model(&self) -> Option<String> {
        self.loaded_model.read().clone()
    }

    fn send(&self, request: WorkerRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| QuillError::embedded("worker thread has stopped"))
    }
}

/// Discard events left over from an exchange whose caller went away
fn drain_stale(events: &mut UnboundedReceiver<WorkerEvent>) {
    while let Ok(event) = events.try_recv() {
        tracing::debug!(event = ?event, "Discarding stale worker event");
    }
}

/// Marks a generation as running; if the chat future is dropped before the
/// worker finished, the worker is told to stop.
struct GenerationGuard<'a> {
    engine: &'a EmbeddedEngine,
    finished: bool,
}

impl<'a> GenerationGuard<'a> {
    fn start(engine: &'a EmbeddedEngine) -> Self {
        engine.generating.store(true, Ordering::SeqCst);
        Self {
            engine,
            finished: false,
        }
    }
}

impl Drop for GenerationGuard<'_> {
    fn drop(&mut self) {
        self.engine.generating.store(false, Ordering::SeqCst);
        if !self.finished {
            let _ = self.engine.send(WorkerRequest::Abort);
        }
    }
}

#[async_trait]
impl ChatProvider for EmbeddedEngine {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Embedded
    }

    async fn initialize(&self, model: &str, on_progress: &ProgressSink<'_>) -> Result<()> {
        let mut events = self.events.lock().await;
        drain_stale(&mut events);

        self.ready.store(false, Ordering::SeqCst);
        self.send(WorkerRequest::Init {
            model_id: model.to_string(),
        })?;

        on_progress(LoadProgress::from_fraction(0.0, "Starting model load"));

        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Progress { progress, text } => {
                    on_progress(LoadProgress::from_fraction(progress, text));
                }
                WorkerEvent::Ready { model_id } if model_id == model => {
                    *self.loaded_model.write() = Some(model_id);
                    self.ready.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                WorkerEvent::Error {
                    request_id: None,
                    message,
                } => {
                    *self.loaded_model.write() = None;
                    return Err(QuillError::embedded(message));
                }
                other => {
                    tracing::debug!(event = ?other, "Ignoring event during model load");
                }
            }
        }

        Err(QuillError::embedded("worker thread has stopped"))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let mut models = vec![self.default_model.clone()];
        for cached in self.cache.cached_models() {
            if !models.contains(&cached) {
                models.push(cached);
            }
        }
        Ok(models)
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

        let mut events = self.events.lock().await;
        drain_stale(&mut events);

        if let Some(loaded) = self.loaded_model() {
            if loaded != model {
                tracing::warn!(requested = model, loaded = %loaded, "Chat requested for a model that is not loaded");
            }
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        self.abort_requested.store(false, Ordering::SeqCst);
        let mut guard = GenerationGuard::start(self);
        self.send(WorkerRequest::Chat {
            request_id,
            messages: history.to_vec(),
        })?;

        let mut content = String::new();
        let result = loop {
            let Some(event) = events.recv().await else {
                break Err(QuillError::embedded("worker thread has stopped"));
            };

            match event {
                WorkerEvent::Token { request_id: id, text } if id == request_id => {
                    content.push_str(&text);
                    on_token(&text);
                }
                WorkerEvent::Complete { request_id: id } if id == request_id => break Ok(()),
                WorkerEvent::Error {
                    request_id: Some(id),
                    message,
                } if id == request_id => break Err(QuillError::embedded(message)),
                other => {
                    tracing::debug!(event = ?other, "Ignoring event from another exchange");
                }
            }
        };

        guard.finished = true;
        drop(guard);
        let aborted = self.abort_requested.swap(false, Ordering::SeqCst);

        match result {
            Ok(()) if aborted => Ok(StreamOutcome::aborted(content)),
            Ok(()) => Ok(StreamOutcome::done(content)),
            Err(_) if aborted => Ok(StreamOutcome::aborted(content)),
            Err(e) => Err(e),
        }
    }

    fn abort(&self) {
        if self.generating.load(Ordering::SeqCst) {
            self.abort_requested.store(true, Ordering::SeqCst);
            if self.send(WorkerRequest::Abort).is_err() {
                tracing::warn!("Abort requested but the embedded worker has stopped");
            }
        }
    }

    async fn test_connection(&self) -> Result<()> {
        if self.requests.is_closed() {
            Err(QuillError::embedded("worker thread has stopped"))
        } else {
            Ok(())
        }
    }
}
