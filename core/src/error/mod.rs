pub mod provider;
pub mod service;

pub use provider::ProviderError;
pub use service::{AttemptRecord, EngineError, FallbackChainError, ServiceError};
