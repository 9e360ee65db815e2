mod executor;
pub(crate) mod state;
pub mod scheduler;
pub mod types;

pub use scheduler::{BackgroundPermit, Scheduler};
pub use types::{
    ActiveJob, AnalysisProgress, QueueStatus, QueuedJob, TaskClass, TaskPayload, TaskType,
    WorkItem,
};
