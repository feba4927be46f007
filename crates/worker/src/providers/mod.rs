//! Generation providers available to the executor, keyed by the
//! `provider` identifier stored on each job.

pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use mayagen_comfyui::provider::ComfyUIProvider;
use mayagen_core::generation::{PROVIDER_COMFYUI, PROVIDER_MOCK};
use mayagen_core::provider::GenerationProvider;

use crate::config::WorkerConfig;
use mock::MockProvider;

/// Provider handles shared by every job the worker executes.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn GenerationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ComfyUI and mock providers configured from `config`.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new()
            .with(
                PROVIDER_COMFYUI,
                Arc::new(ComfyUIProvider::new(
                    &config.comfyui_url,
                    &config.comfyui_workflows_dir,
                )),
            )
            .with(PROVIDER_MOCK, Arc::new(MockProvider::new(config.mock_render_delay)))
    }

    /// Register `provider` under `name`, replacing any previous one.
    pub fn with(mut self, name: &str, provider: Arc<dyn GenerationProvider>) -> Self {
        self.providers.insert(name.to_string(), provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
