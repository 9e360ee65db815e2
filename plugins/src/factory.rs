//! Registry assembly from an explicit constructor list. Providers register
//! here and only here; there is no load-order-dependent self-registration.

use std::sync::Arc;

use lumen_core::api::ProviderRegistry;

use crate::providers::{
    ComfyuiProvider, GeminiProvider, GrokProvider, MoondreamCloudProvider,
    MoondreamLocalProvider, OpenaiProvider,
};

/// Shared HTTP client for every provider. Per-request timeouts are set at
/// the call site; the client itself carries no global deadline so one slow
/// generation cannot starve unrelated requests of connections.
pub fn default_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Build the process-wide registry. Registration order is not preference
/// order; preference lives in the routing table.
pub fn build_registry() -> ProviderRegistry {
    let client = default_client();
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(GeminiProvider::new(client.clone())));
    registry.register(Arc::new(OpenaiProvider::new(client.clone())));
    registry.register(Arc::new(GrokProvider::new(client.clone())));
    registry.register(Arc::new(MoondreamCloudProvider::new(client.clone())));
    registry.register(Arc::new(MoondreamLocalProvider::new(client.clone())));
    registry.register(Arc::new(ComfyuiProvider::new(client)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::api::{Capability, ProviderId};

    #[test]
    fn all_providers_are_registered() {
        let registry = build_registry();
        assert_eq!(registry.all().len(), 6);
        for id in [
            ProviderId::Gemini,
            ProviderId::Openai,
            ProviderId::Grok,
            ProviderId::MoondreamCloud,
            ProviderId::MoondreamLocal,
            ProviderId::Comfyui,
        ] {
            assert!(registry.get(id).is_some(), "missing provider {id}");
        }
    }

    #[test]
    fn capability_matrix_matches_expectations() {
        let registry = build_registry();
        let ids = |capability: Capability| {
            registry
                .with_capability(capability)
                .iter()
                .map(|p| p.id())
                .collect::<Vec<_>>()
        };

        assert!(ids(Capability::Vision).contains(&ProviderId::MoondreamLocal));
        assert!(ids(Capability::Vision).contains(&ProviderId::Gemini));
        assert!(!ids(Capability::Vision).contains(&ProviderId::Openai));
        assert!(ids(Capability::Animation).contains(&ProviderId::Comfyui));
        assert!(!ids(Capability::TextGeneration).contains(&ProviderId::MoondreamLocal));
    }
}
