//! Collaborator seams injected into the engine: user-facing notifications
//! and subject-record persistence. Both are fire-and-forget from the
//! engine's point of view.

use std::sync::Arc;

use crate::provider::types::{AnalysisResult, AnimationResult, GenerationResult, ImageRef, SubjectPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Info,
    Processing,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    /// Correlates with the work item / subject id.
    pub id: String,
    pub status: NotificationStatus,
    pub message: String,
}

pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Persistence of derived subject fields. Implementations own the failure
/// flag: `save_*` clears it, `mark_failed` sets it (preserved for manual
/// retry).
pub trait SubjectStore: Send + Sync {
    fn save_analysis(&self, image_id: &str, result: &AnalysisResult);
    fn save_generation(&self, item_id: &str, result: &GenerationResult);
    fn save_animation(&self, item_id: &str, result: &AnimationResult);
    fn save_crop(&self, image_id: &str, point: SubjectPoint);
    fn mark_failed(&self, subject_id: &str, error: &str);
    fn clear_failure(&self, subject_id: &str);
}

/// Optional image preparation (e.g. downscale before analysis). The engine
/// does not process pixels itself.
pub type ImagePrep = dyn Fn(&ImageRef, u32) -> ImageRef + Send + Sync;

/// Everything the scheduler needs from the outside world.
#[derive(Clone)]
pub struct EngineHooks {
    pub notifications: Arc<dyn NotificationSink>,
    pub store: Arc<dyn SubjectStore>,
    pub preprocess: Option<Arc<ImagePrep>>,
}

impl EngineHooks {
    /// Hooks that discard everything; useful for tests and one-shot CLI
    /// calls that read results directly.
    pub fn noop() -> Self {
        struct Noop;
        impl NotificationSink for Noop {
            fn notify(&self, _notification: Notification) {}
        }
        impl SubjectStore for Noop {
            fn save_analysis(&self, _image_id: &str, _result: &AnalysisResult) {}
            fn save_generation(&self, _item_id: &str, _result: &GenerationResult) {}
            fn save_animation(&self, _item_id: &str, _result: &AnimationResult) {}
            fn save_crop(&self, _image_id: &str, _point: SubjectPoint) {}
            fn mark_failed(&self, _subject_id: &str, _error: &str) {}
            fn clear_failure(&self, _subject_id: &str) {}
        }
        let noop = Arc::new(Noop);
        EngineHooks {
            notifications: noop.clone(),
            store: noop,
            preprocess: None,
        }
    }
}
