use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibrate::CalibrationStatus;
use crate::provider::types::{AspectRatio, ImageRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Analysis,
    Generate,
    Enhance,
    Animate,
    SmartCrop,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Analysis => "analysis",
            TaskType::Generate => "generate",
            TaskType::Enhance => "enhance",
            TaskType::Animate => "animate",
            TaskType::SmartCrop => "smart-crop",
        }
    }

    /// Membership class for duplicate suppression. Generate and enhance share
    /// one class: the same subject cannot be queued for both at once, but it
    /// can be queued for analysis and generation simultaneously.
    pub fn membership_class(&self) -> TaskClass {
        match self {
            TaskType::Analysis => TaskClass::Analysis,
            TaskType::Generate | TaskType::Enhance => TaskClass::Generation,
            TaskType::Animate => TaskClass::Animation,
            TaskType::SmartCrop => TaskClass::SmartCrop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
    Analysis,
    Generation,
    Animation,
    SmartCrop,
}

impl TaskClass {
    pub const ALL: [TaskClass; 4] = [
        TaskClass::Analysis,
        TaskClass::Generation,
        TaskClass::Animation,
        TaskClass::SmartCrop,
    ];
}

/// What a work item carries, per task type.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    Analysis {
        image: ImageRef,
    },
    Generate {
        prompt: String,
        aspect_ratio: AspectRatio,
        source_image: Option<ImageRef>,
    },
    Enhance {
        image: ImageRef,
        prompt: String,
        strength: Option<f32>,
    },
    Animate {
        image: Option<ImageRef>,
        prompt: String,
        aspect_ratio: AspectRatio,
    },
    SmartCrop {
        image: ImageRef,
    },
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Analysis { .. } => TaskType::Analysis,
            TaskPayload::Generate { .. } => TaskType::Generate,
            TaskPayload::Enhance { .. } => TaskType::Enhance,
            TaskPayload::Animate { .. } => TaskType::Animate,
            TaskPayload::SmartCrop { .. } => TaskType::SmartCrop,
        }
    }
}

/// One unit of queued work. Identity is `id`; the scheduler owns the item
/// exclusively from admission until completion or removal.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: String,
    pub file_name: String,
    pub enqueued_at: DateTime<Utc>,
    /// Higher dispatches first; ties broken by enqueue order.
    pub priority: i32,
    /// Explicit caller retry of a previously failed item; clears the failure
    /// flag on admission.
    pub is_retry: bool,
    pub payload: TaskPayload,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            enqueued_at: Utc::now(),
            priority: 0,
            is_retry: false,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_retry(mut self) -> Self {
        self.is_retry = true;
        self
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveJob {
    pub id: String,
    pub file_name: String,
    pub task_type: TaskType,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub id: String,
    pub file_name: String,
    pub task_type: TaskType,
    pub enqueued_at: DateTime<Utc>,
    pub priority: i32,
}

/// Shared `current/total` analysis progress, cleared when it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisProgress {
    pub current: usize,
    pub total: usize,
    pub file_name: String,
}

/// Read-only snapshot of scheduler state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub active_count: usize,
    pub pending_count: usize,
    pub is_paused: bool,
    pub concurrency_limit: usize,
    pub completed_count: u64,
    pub active_jobs: Vec<ActiveJob>,
    pub queued_jobs: Vec<QueuedJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationStatus>,
}
