//! Provider detection and fallback
//!
//! Startup order: a configured cloud choice wins, then a running Ollama server
//! with at least one model, then the embedded engine. Absence of a backend is
//! never an error; only a failed initialization puts the engine in `Error`.

use std::sync::Arc;

use crate::core::{ProviderKind, QuillError, Result};
use crate::llm::provider::embedded::ModelCache;
use crate::llm::{ChatProvider, LoadProgress, Probe};

use super::store::EnginePhase;
use super::EngineContext;

impl EngineContext {
    /// Run detection from scratch and settle on a provider
    pub async fn detect_and_select(&self) -> EnginePhase {
        self.store.begin_detection();
        let settings = self.settings.snapshot();

        if settings.active_engine == Some(ProviderKind::Cloud) && settings.cloud.is_configured() {
            match self.activate(ProviderKind::Cloud).await {
                Ok(()) => return self.store.phase(),
                Err(e) => {
                    tracing::warn!(error = %e, "Saved cloud engine failed, probing local backends");
                }
            }
        }

        if self.try_ollama().await {
            return self.store.phase();
        }

        if let Err(e) = self.activate(ProviderKind::Embedded).await {
            tracing::warn!(error = %e, "Embedded engine unavailable");
        }
        self.store.phase()
    }

    /// Probe Ollama and initialize it if it has models.
    /// Returns false when the engine should fall back to the embedded model.
    async fn try_ollama(&self) -> bool {
        let ollama = self.providers.get(ProviderKind::Ollama);
        let Probe::Online(models) = ollama.probe().await else {
            self.store.set_ollama_detected(false);
            return false;
        };

        self.store.set_ollama_detected(true);
        if models.is_empty() {
            tracing::info!("Ollama is running but has no models");
            return false;
        }

        match self.select(ProviderKind::Ollama, models).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Ollama initialization failed, falling back to embedded");
                false
            }
        }
    }

    /// Switch the active provider at runtime
    pub async fn switch_provider(&self, kind: ProviderKind) -> Result<()> {
        if let Some(current) = self.store.active() {
            if current != kind {
                self.providers.get(current).abort();
            }
        }
        self.activate(kind).await
    }

    /// Re-run initialization for the active provider, or full detection if none
    pub async fn retry(&self) -> Result<()> {
        let state = self.store.snapshot();
        match (state.active, state.selected_model) {
            (Some(kind), Some(model)) => self.initialize_provider(kind, &model).await,
            (Some(kind), None) => self.activate(kind).await,
            (None, _) => match self.detect_and_select().await {
                EnginePhase::Error => Err(QuillError::NotReady(
                    self.store
                        .snapshot()
                        .last_error
                        .unwrap_or_else(|| "no provider".to_string()),
                )),
                _ => Ok(()),
            },
        }
    }

    /// Choose a different model for the active provider and load it
    pub async fn select_model(&self, model: &str) -> Result<()> {
        let kind = self.store.select_model(model)?;
        self.initialize_provider(kind, model).await
    }

    /// List models for `kind`, resolve the preferred one, make it active
    async fn activate(&self, kind: ProviderKind) -> Result<()> {
        let provider = self.providers.get(kind);
        let models = self.available_models(kind, provider.as_ref()).await?;
        self.select(kind, models).await
    }

    async fn available_models(
        &self,
        kind: ProviderKind,
        provider: &dyn ChatProvider,
    ) -> Result<Vec<String>> {
        match provider.list_models().await {
            Ok(models) => Ok(models),
            // Not every OpenAI-compatible endpoint implements /models
            Err(e) if kind == ProviderKind::Cloud => {
                let model = self.settings.snapshot().cloud.resolved_model();
                tracing::debug!(error = %e, model = %model, "Model listing failed, using configured cloud model");
                Ok(vec![model])
            }
            Err(e) => {
                self.store.fail(kind, e.to_string());
                Err(e)
            }
        }
    }

    async fn select(&self, kind: ProviderKind, models: Vec<String>) -> Result<()> {
        let Some(model) = self.store.resolve_model(kind, &models) else {
            let error = QuillError::NoProvider(format!("{} has no models available", kind));
            self.store.fail(kind, error.to_string());
            return Err(error);
        };

        if kind == ProviderKind::Embedded {
            let cache = ModelCache::from_settings(&self.settings.snapshot());
            self.store.set_embedded_cached(cache.is_cached(&model));
        }

        self.store.activate(kind, &model, models);
        self.initialize_provider(kind, &model).await
    }

    /// Initialize `kind` with `model`, reporting progress into the store
    pub(crate) async fn initialize_provider(&self, kind: ProviderKind, model: &str) -> Result<()> {
        let provider: Arc<dyn ChatProvider> = self.providers.get(kind);
        self.store.set_phase(EnginePhase::loading_for(kind));

        let store = &self.store;
        let on_progress = move |progress: LoadProgress| store.set_progress(progress);

        match provider.initialize(model, &on_progress).await {
            Ok(()) => {
                self.store.mark_ready(kind);
                if kind == ProviderKind::Embedded {
                    self.mark_first_run_done();
                }
                Ok(())
            }
            Err(e) => {
                self.store.fail(kind, e.to_string());
                Err(e)
            }
        }
    }

    fn mark_first_run_done(&self) {
        if self.settings.snapshot().embedded.first_run_done {
            return;
        }
        if let Err(e) = self
            .settings
            .update(|settings| settings.embedded.first_run_done = true)
        {
            tracing::warn!(error = %e, "Failed to record embedded first run");
        }
    }
}
