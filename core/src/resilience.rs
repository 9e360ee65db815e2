//! Bounded, append-only record of failures, fallbacks, and recoveries.
//!
//! This is a diagnostic trail for operator visibility, not a source of
//! truth: entries beyond the cap are evicted oldest-first.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capability::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResilienceKind {
    Failure,
    Fallback,
    OomRecovery,
    Throttle,
    Calibration,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResilienceLogEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub provider: Option<ProviderId>,
    pub kind: ResilienceKind,
    pub message: String,
}

pub struct ResilienceLog {
    entries: Mutex<VecDeque<ResilienceLogEntry>>,
    cap: usize,
}

impl ResilienceLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }

    pub fn record(
        &self,
        task_id: impl Into<String>,
        provider: Option<ProviderId>,
        kind: ResilienceKind,
        message: impl Into<String>,
    ) {
        let entry = ResilienceLogEntry {
            timestamp: Utc::now(),
            task_id: task_id.into(),
            provider,
            kind,
            message: message.into(),
        };
        tracing::debug!(task_id = %entry.task_id, kind = ?entry.kind, "{}", entry.message);

        let mut entries = self.entries.lock().expect("resilience log lock");
        if entries.len() == self.cap {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Record an action with `key=value` metrics, matching the format the
    /// status view renders.
    pub fn record_with_metrics(
        &self,
        task_id: impl Into<String>,
        provider: Option<ProviderId>,
        kind: ResilienceKind,
        action: &str,
        metrics: &[(&str, String)],
    ) {
        let mut message = format!("[{}]", action.to_uppercase());
        if !metrics.is_empty() {
            message.push_str(" | ");
            for (i, (key, value)) in metrics.iter().enumerate() {
                if i > 0 {
                    message.push_str(", ");
                }
                let _ = write!(message, "{key}={value}");
            }
        }
        self.record(task_id, provider, kind, message);
    }

    /// Newest-last snapshot.
    pub fn snapshot(&self) -> Vec<ResilienceLogEntry> {
        self.entries
            .lock()
            .expect("resilience log lock")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("resilience log lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResilienceLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_evicts_oldest() {
        let log = ResilienceLog::new(3);
        for i in 0..5 {
            log.record(format!("task-{i}"), None, ResilienceKind::Info, "x");
        }
        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].task_id, "task-2");
        assert_eq!(entries[2].task_id, "task-4");
    }

    #[test]
    fn metrics_are_formatted_key_value() {
        let log = ResilienceLog::new(10);
        log.record_with_metrics(
            "t",
            Some(ProviderId::MoondreamLocal),
            ResilienceKind::Throttle,
            "Thread Start",
            &[("Active", "2".into()), ("Limit", "4".into())],
        );
        let entries = log.snapshot();
        assert_eq!(entries[0].message, "[THREAD START] | Active=2, Limit=4");
        assert_eq!(entries[0].provider, Some(ProviderId::MoondreamLocal));
    }

    #[test]
    fn default_cap_is_one_thousand() {
        let log = ResilienceLog::default();
        for i in 0..1100 {
            log.record(format!("t{i}"), None, ResilienceKind::Info, "x");
        }
        assert_eq!(log.len(), 1000);
    }
}
