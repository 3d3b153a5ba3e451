//! Engine module - provider selection and shared state
//!
//! [`EngineContext`] is built once at startup and handed to the chat session
//! and the CLI. It owns the settings, one client per backend and the state
//! store.

pub mod selection;
pub mod store;

use std::sync::Arc;

use crate::core::{ProviderKind, Result, Settings, SettingsStore};
use crate::llm::{create_providers, ChatProvider, ProviderSet};

pub use store::{EnginePhase, EngineState, EngineStatus, EngineStore, ReadyFlags};

pub struct EngineContext {
    settings: Arc<SettingsStore>,
    providers: ProviderSet,
    store: EngineStore,
}

/// The provider a chat should go to, resolved at send time
#[derive(Clone)]
pub struct ActiveProvider {
    pub kind: ProviderKind,
    pub provider: Arc<dyn ChatProvider>,
    pub model: String,
}

impl EngineContext {
    /// Build the real clients from the stored settings
    pub fn new(settings: Arc<SettingsStore>) -> Result<Arc<Self>> {
        let providers = create_providers(&settings.snapshot())?;
        Ok(Self::with_providers(settings, providers))
    }

    pub fn with_providers(settings: Arc<SettingsStore>, providers: ProviderSet) -> Arc<Self> {
        let store = EngineStore::new(Arc::clone(&settings));
        Arc::new(Self {
            settings,
            providers,
            store,
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    /// Detect backends and settle on one; call once after construction
    pub async fn start(&self) -> EnginePhase {
        tracing::info!("Detecting chat backends");
        self.detect_and_select().await
    }

    /// The active provider, if the engine is ready to chat
    pub fn ready_provider(&self) -> Option<ActiveProvider> {
        let state = self.store.snapshot();
        if state.status() != EngineStatus::Ready {
            return None;
        }
        let kind = state.active?;
        let model = state.selected_model?;
        let provider = self.providers.get(kind);
        if !provider.is_ready() {
            return None;
        }
        Some(ActiveProvider {
            kind,
            provider,
            model,
        })
    }

    /// Mutate and persist settings, then push them to every client.
    ///
    /// A client that drops its readiness while active (new host or key) is
    /// initialized again; a failure leaves the engine in `Error`.
    pub async fn update_settings<F>(&self, f: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        self.settings.update(f)?;
        let settings = self.settings.snapshot();
        self.providers.reconfigure(&settings);

        let state = self.store.snapshot();
        if let (Some(kind), Some(model)) = (state.active, state.selected_model.clone()) {
            if state.status() == EngineStatus::Ready && !self.providers.get(kind).is_ready() {
                tracing::info!(provider = %kind, "Settings changed, reinitializing provider");
                self.initialize_provider(kind, &model).await?;
            }
        }
        Ok(settings)
    }
}
