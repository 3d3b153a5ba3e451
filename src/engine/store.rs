//! Engine state store
//!
//! Holds which provider is active, what it is doing, and the model choices that
//! survive restarts. State is published through a `watch` channel so front ends
//! can render load progress without polling.

use std::sync::Arc;
use tokio::sync::watch;

use crate::core::{ProviderKind, QuillError, Result, SettingsStore};
use crate::llm::LoadProgress;

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Probing backends / preparing a non-embedded provider
    Detecting,
    OllamaReady,
    /// Embedded model is downloading or loading
    EmbeddedLoading,
    EmbeddedReady,
    CloudReady,
    /// The active provider failed to initialize; `retry` is possible
    Error,
}

/// Coarse status shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Detecting,
    Loading,
    Ready,
    Error,
}

impl EnginePhase {
    pub fn status(&self) -> EngineStatus {
        match self {
            EnginePhase::Detecting => EngineStatus::Detecting,
            EnginePhase::EmbeddedLoading => EngineStatus::Loading,
            EnginePhase::OllamaReady | EnginePhase::EmbeddedReady | EnginePhase::CloudReady => {
                EngineStatus::Ready
            }
            EnginePhase::Error => EngineStatus::Error,
        }
    }

    /// Phase reached once `kind` has initialized
    pub fn ready_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Ollama => EnginePhase::OllamaReady,
            ProviderKind::Embedded => EnginePhase::EmbeddedReady,
            ProviderKind::Cloud => EnginePhase::CloudReady,
        }
    }

    /// Phase shown while `kind` initializes
    pub fn loading_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Embedded => EnginePhase::EmbeddedLoading,
            ProviderKind::Ollama | ProviderKind::Cloud => EnginePhase::Detecting,
        }
    }
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EnginePhase::Detecting => "detecting",
            EnginePhase::OllamaReady => "ollama-ready",
            EnginePhase::EmbeddedLoading => "embedded-loading",
            EnginePhase::EmbeddedReady => "embedded-ready",
            EnginePhase::CloudReady => "cloud-ready",
            EnginePhase::Error => "error",
        };
        f.write_str(label)
    }
}

/// Readiness per provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyFlags {
    pub ollama: bool,
    pub embedded: bool,
    pub cloud: bool,
}

impl ReadyFlags {
    pub fn get(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Ollama => self.ollama,
            ProviderKind::Embedded => self.embedded,
            ProviderKind::Cloud => self.cloud,
        }
    }

    pub fn set(&mut self, kind: ProviderKind, ready: bool) {
        match kind {
            ProviderKind::Ollama => self.ollama = ready,
            ProviderKind::Embedded => self.embedded = ready,
            ProviderKind::Cloud => self.cloud = ready,
        }
    }
}

/// Snapshot of the engine, rebuilt on every launch
#[derive(Debug, Clone, PartialEq)]
pub struct EngineState {
    pub phase: EnginePhase,
    pub active: Option<ProviderKind>,
    pub selected_model: Option<String>,
    pub available_models: Vec<String>,
    pub ready: ReadyFlags,
    pub progress: Option<LoadProgress>,
    pub last_error: Option<String>,
    /// Whether the last probe found a running Ollama server
    pub ollama_detected: bool,
    /// Whether the embedded model file was already on disk before loading
    pub embedded_cached: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            phase: EnginePhase::Detecting,
            active: None,
            selected_model: None,
            available_models: Vec::new(),
            ready: ReadyFlags::default(),
            progress: None,
            last_error: None,
            ollama_detected: false,
            embedded_cached: false,
        }
    }
}

impl EngineState {
    pub fn status(&self) -> EngineStatus {
        self.phase.status()
    }
}

pub struct EngineStore {
    settings: Arc<SettingsStore>,
    state: watch::Sender<EngineState>,
}

impl EngineStore {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        let (state, _) = watch::channel(EngineState::default());
        Self { settings, state }
    }

    pub fn snapshot(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.borrow().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase().status() == EngineStatus::Ready
    }

    pub fn active(&self) -> Option<ProviderKind> {
        self.state.borrow().active
    }

    pub fn selected_model(&self) -> Option<String> {
        self.state.borrow().selected_model.clone()
    }

    pub(crate) fn begin_detection(&self) {
        self.state.send_modify(|s| {
            s.phase = EnginePhase::Detecting;
            s.active = None;
            s.selected_model = None;
            s.available_models.clear();
            s.progress = None;
            s.last_error = None;
        });
    }

    pub(crate) fn set_phase(&self, phase: EnginePhase) {
        self.state.send_modify(|s| s.phase = phase);
        tracing::debug!(%phase, "Engine phase");
    }

    pub(crate) fn set_progress(&self, progress: LoadProgress) {
        self.state.send_modify(|s| s.progress = Some(progress));
    }

    pub(crate) fn set_ollama_detected(&self, detected: bool) {
        self.state.send_modify(|s| s.ollama_detected = detected);
    }

    pub(crate) fn set_embedded_cached(&self, cached: bool) {
        self.state.send_modify(|s| s.embedded_cached = cached);
    }

    /// Make `kind` the active provider with `model` selected, and persist both
    pub(crate) fn activate(&self, kind: ProviderKind, model: &str, models: Vec<String>) {
        self.state.send_modify(|s| {
            s.active = Some(kind);
            s.selected_model = Some(model.to_string());
            s.available_models = models;
            s.last_error = None;
        });
        self.persist(|settings| {
            settings.active_engine = Some(kind);
            settings.selected_models.set(kind, model);
        });
        tracing::info!(provider = %kind, model, "Provider selected");
    }

    pub(crate) fn mark_ready(&self, kind: ProviderKind) {
        self.state.send_modify(|s| {
            for other in ProviderKind::ALL {
                s.ready.set(other, other == kind);
            }
            s.phase = EnginePhase::ready_for(kind);
            s.progress = None;
            s.last_error = None;
        });
        tracing::info!(provider = %kind, "Engine ready");
    }

    pub(crate) fn fail(&self, kind: ProviderKind, error: impl Into<String>) {
        let error = error.into();
        tracing::warn!(provider = %kind, error = %error, "Provider initialization failed");
        self.state.send_modify(|s| {
            s.ready.set(kind, false);
            s.phase = EnginePhase::Error;
            s.progress = None;
            s.last_error = Some(error);
        });
    }

    /// Persisted preference if it is still available, else the first option
    pub fn resolve_model(&self, kind: ProviderKind, available: &[String]) -> Option<String> {
        let settings = self.settings.snapshot();
        match settings.selected_models.get(kind) {
            Some(saved) if available.iter().any(|m| m == saved) => Some(saved.to_string()),
            Some(saved) => {
                if let Some(first) = available.first() {
                    tracing::info!(provider = %kind, saved, fallback = %first, "Saved model no longer available");
                }
                available.first().cloned()
            }
            None => available.first().cloned(),
        }
    }

    /// Choose a different model for the active provider
    pub(crate) fn select_model(&self, model: &str) -> Result<ProviderKind> {
        let state = self.snapshot();
        let kind = state
            .active
            .ok_or_else(|| QuillError::NoProvider("no provider is active".to_string()))?;

        if !state.available_models.is_empty() && !state.available_models.iter().any(|m| m == model)
        {
            return Err(QuillError::config(format!(
                "Model '{}' is not available for {}. Available: {}",
                model,
                kind,
                state.available_models.join(", ")
            )));
        }

        self.state
            .send_modify(|s| s.selected_model = Some(model.to_string()));
        self.persist(|settings| settings.selected_models.set(kind, model));
        Ok(kind)
    }

    fn persist<F>(&self, f: F)
    where
        F: FnOnce(&mut crate::core::Settings),
    {
        if let Err(e) = self.settings.update(f) {
            tracing::warn!(error = %e, "Failed to persist engine settings");
        }
    }
}
