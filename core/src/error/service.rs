use thiserror::Error;

use crate::capability::{Capability, ProviderId};

/// One failed provider attempt inside a single fallback-chain invocation.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub provider: ProviderId,
    pub error: String,
}

/// Raised only when every configured provider for a capability has failed.
/// Carries the full attempt history for diagnostics.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct FallbackChainError {
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
    /// Every attempt died at the transport layer (backend unreachable), as
    /// opposed to providers answering with errors. Lets the scheduler pause
    /// instead of burning through the queue while the backend is down.
    pub all_transport: bool,
}

/// Errors from the capability-routed service surface.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no providers are routed for '{0}'")]
    NoProvidersRouted(Capability),

    /// Every routed provider was skipped (missing capability or
    /// configuration); nothing was even attempted.
    #[error("no routed provider is configured for '{0}'")]
    NotConfigured(Capability),

    #[error(transparent)]
    FallbackChain(#[from] FallbackChainError),
}

impl ServiceError {
    /// Aggregated, human-readable form for the notification sink. Raw attempt
    /// detail stays in the resilience log.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::FallbackChain(chain) => {
                let tried: Vec<&str> =
                    chain.attempts.iter().map(|a| a.provider.as_str()).collect();
                format!("{} (tried: {})", chain.message, tried.join(", "))
            }
            other => other.to_string(),
        }
    }
}

/// Top-level error for engine entry points, mapped to exit codes by the CLI.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_lists_attempted_providers() {
        let err = ServiceError::FallbackChain(FallbackChainError {
            message: "all routed providers failed for 'generation'".into(),
            attempts: vec![
                AttemptRecord {
                    provider: ProviderId::Gemini,
                    error: "429".into(),
                },
                AttemptRecord {
                    provider: ProviderId::Grok,
                    error: "timeout".into(),
                },
            ],
            all_transport: false,
        });
        let msg = err.user_message();
        assert!(msg.contains("gemini"));
        assert!(msg.contains("grok"));
    }
}
