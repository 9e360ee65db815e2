//! Capability model: the closed set of AI operations a provider may support,
//! and the routing table that maps each capability to an ordered provider
//! preference list.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named category of AI operation.
///
/// The set is closed: adding a capability means touching the routing table,
/// the provider trait, and the service wrappers, so it is an explicit enum
/// rather than a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Vision,
    Generation,
    Animation,
    Editing,
    TextGeneration,
    Captioning,
    Tagging,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Vision,
        Capability::Generation,
        Capability::Animation,
        Capability::Editing,
        Capability::TextGeneration,
        Capability::Captioning,
        Capability::Tagging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Vision => "vision",
            Capability::Generation => "generation",
            Capability::Animation => "animation",
            Capability::Editing => "editing",
            Capability::TextGeneration => "textGeneration",
            Capability::Captioning => "captioning",
            Capability::Tagging => "tagging",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Capability::Vision => 1 << 0,
            Capability::Generation => 1 << 1,
            Capability::Animation => 1 << 2,
            Capability::Editing => 1 << 3,
            Capability::TextGeneration => 1 << 4,
            Capability::Captioning => 1 << 5,
            Capability::Tagging => 1 << 6,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a provider implementation. Closed set: providers are created
/// once at process start from a static constructor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Gemini,
    Openai,
    Grok,
    MoondreamCloud,
    MoondreamLocal,
    Comfyui,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Openai => "openai",
            ProviderId::Grok => "grok",
            ProviderId::MoondreamCloud => "moondream_cloud",
            ProviderId::MoondreamLocal => "moondream_local",
            ProviderId::Comfyui => "comfyui",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities a provider declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    bits: u8,
}

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Builder-style insertion so provider impls can declare their set as a
    /// const-ish expression.
    pub fn with(mut self, capability: Capability) -> Self {
        self.bits |= capability.bit();
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.bits & capability.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.iter().copied().filter(|c| self.contains(*c))
    }
}

/// Ordered provider preference per capability, derived from configuration.
///
/// An absent or empty entry means the capability is unavailable. The engine
/// never mutates the table; order encodes preference for the fallback chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingTable {
    routes: HashMap<Capability, Vec<ProviderId>>,
}

impl RoutingTable {
    pub fn route(&self, capability: Capability) -> &[ProviderId] {
        self.routes.get(&capability).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_routed(&self, capability: Capability) -> bool {
        !self.route(capability).is_empty()
    }

    /// Used by configuration defaults and tests.
    pub fn set(&mut self, capability: Capability, providers: Vec<ProviderId>) {
        self.routes.insert(capability, providers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_contains_only_declared() {
        let set = CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Tagging);
        assert!(set.contains(Capability::Vision));
        assert!(set.contains(Capability::Tagging));
        assert!(!set.contains(Capability::Generation));
    }

    #[test]
    fn capability_set_iter_yields_declared() {
        let set = CapabilitySet::empty()
            .with(Capability::Captioning)
            .with(Capability::Vision);
        let caps: Vec<_> = set.iter().collect();
        assert_eq!(caps, vec![Capability::Vision, Capability::Captioning]);
    }

    #[test]
    fn unrouted_capability_is_empty() {
        let table = RoutingTable::default();
        assert!(table.route(Capability::Vision).is_empty());
        assert!(!table.is_routed(Capability::Vision));
    }

    #[test]
    fn route_preserves_order() {
        let mut table = RoutingTable::default();
        table.set(
            Capability::Generation,
            vec![ProviderId::Comfyui, ProviderId::Gemini, ProviderId::Grok],
        );
        assert_eq!(
            table.route(Capability::Generation),
            &[ProviderId::Comfyui, ProviderId::Gemini, ProviderId::Grok]
        );
    }

    #[test]
    fn routing_table_deserializes_from_toml() {
        let table: RoutingTable = toml::from_str(
            r#"
            vision = ["moondream_local", "gemini"]
            generation = ["comfyui"]
            "#,
        )
        .unwrap();
        assert_eq!(
            table.route(Capability::Vision),
            &[ProviderId::MoondreamLocal, ProviderId::Gemini]
        );
        assert!(table.route(Capability::Animation).is_empty());
    }
}
