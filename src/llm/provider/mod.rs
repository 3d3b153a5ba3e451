//! Provider implementations and factory
//!
//! Submodules implement the non-Ollama backends. [`ProviderSet`] holds one
//! instance of each and is the single point where a [`ProviderKind`] is turned
//! into a concrete client.

pub mod embedded;
pub mod openai;

use std::sync::Arc;

use crate::core::{ProviderKind, Result, Settings};
use crate::llm::traits::ChatProvider;
use crate::llm::OllamaClient;

use self::embedded::EmbeddedEngine;
use self::openai::OpenAiClient;

/// One client per backend, constructed once per process
#[derive(Clone)]
pub struct ProviderSet {
    ollama: Arc<dyn ChatProvider>,
    embedded: Arc<dyn ChatProvider>,
    cloud: Arc<dyn ChatProvider>,
}

impl ProviderSet {
    /// Assemble from arbitrary implementations
    pub fn new(
        ollama: Arc<dyn ChatProvider>,
        embedded: Arc<dyn ChatProvider>,
        cloud: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            ollama,
            embedded,
            cloud,
        }
    }

    /// Dispatch a provider kind to its client
    pub fn get(&self, kind: ProviderKind) -> Arc<dyn ChatProvider> {
        match kind {
            ProviderKind::Ollama => Arc::clone(&self.ollama),
            ProviderKind::Embedded => Arc::clone(&self.embedded),
            ProviderKind::Cloud => Arc::clone(&self.cloud),
        }
    }

    /// Push changed settings to every client
    pub fn reconfigure(&self, settings: &Settings) {
        for kind in ProviderKind::ALL {
            self.get(kind).reconfigure(settings);
        }
    }
}

/// Create the real clients for every backend
pub fn create_providers(settings: &Settings) -> Result<ProviderSet> {
    Ok(ProviderSet::new(
        Arc::new(OllamaClient::from_settings(settings)?),
        Arc::new(EmbeddedEngine::from_settings(settings)?),
        Arc::new(OpenAiClient::from_settings(settings)?),
    ))
}
