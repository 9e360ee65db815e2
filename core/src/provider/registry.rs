use std::sync::Arc;

use crate::capability::{Capability, ProviderId};

use super::Provider;

/// Process-wide lookup of provider instances.
///
/// Populated once at startup from an explicit constructor list (no
/// registration side effects at module load), then shared immutably.
/// Duplicate registration is last-writer-wins with a warning.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let id = provider.id();
        if let Some(existing) = self.providers.iter_mut().find(|p| p.id() == id) {
            tracing::warn!(provider = %id, "provider already registered, overwriting");
            *existing = provider;
            return;
        }
        tracing::debug!(provider = %id, name = provider.display_name(), "registered provider");
        self.providers.push(provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn all(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn Provider>> {
        self.providers
            .iter()
            .filter(|p| p.capabilities().contains(capability))
            .cloned()
            .collect()
    }
}
