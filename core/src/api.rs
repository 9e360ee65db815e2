//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `lumen_core::api` instead of reaching into internal
//! modules.

pub use crate::calibrate::{
    CalibrationPhase, CalibrationStatus, Calibrator, ProbeFn, ProbeLevelResult,
};
pub use crate::capability::{Capability, CapabilitySet, ProviderId, RoutingTable};
pub use crate::config::{load_default, load_from_path, LoggingConfig, MemoryMode, Settings};
pub use crate::error::{
    AttemptRecord, EngineError, FallbackChainError, ProviderError, ServiceError,
};
pub use crate::hooks::{
    EngineHooks, ImagePrep, Notification, NotificationSink, NotificationStatus, SubjectStore,
};
pub use crate::provider::types::{
    AnalysisResult, AnimationResult, AspectRatio, DevicePerformanceMetrics, GenerationResult,
    ImageRef, ModelInfo, ProviderStats, StatsSample, SubjectPoint, TagBatchEntry,
};
pub use crate::provider::{Provider, ProviderRegistry};
pub use crate::queue::{
    ActiveJob, AnalysisProgress, BackgroundPermit, QueueStatus, QueuedJob, Scheduler,
    TaskPayload, TaskType, WorkItem,
};
pub use crate::resilience::{ResilienceKind, ResilienceLog, ResilienceLogEntry};
pub use crate::service::{AiService, AttemptStatus, ProgressFn, ProgressUpdate};
