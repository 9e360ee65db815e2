use thiserror::Error;

use crate::capability::ProviderId;

/// Errors surfaced by a single provider operation.
///
/// The transport layer classifies backend failures structurally before they
/// reach this type: out-of-memory is a flag on [`ProviderError::Backend`],
/// never a string match above the transport boundary.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider lacks required credentials or endpoint. Skipped by the
    /// fallback chain, never retried.
    #[error("provider not configured: {0}")]
    Configuration(String),

    /// Network failure or timeout while reaching the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// Structured error payload from the backend. `oom` marks the
    /// out-of-memory subtype, which the transport recovers once before this
    /// error is ever visible to callers.
    #[error("backend error: {message}")]
    Backend { message: String, oom: bool },

    /// Response shape did not match any known format. Treated as a backend
    /// failure by the fallback chain.
    #[error("unrecognized response shape: {0}")]
    Validation(String),

    /// The provider does not implement the requested operation.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderId,
        operation: &'static str,
    },
}

impl ProviderError {
    pub fn backend(message: impl Into<String>) -> Self {
        ProviderError::Backend {
            message: message.into(),
            oom: false,
        }
    }

    pub fn oom(message: impl Into<String>) -> Self {
        ProviderError::Backend {
            message: message.into(),
            oom: true,
        }
    }

    pub fn is_oom(&self) -> bool {
        matches!(self, ProviderError::Backend { oom: true, .. })
    }
}
