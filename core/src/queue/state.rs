//! Scheduler-owned mutable state. Everything here sits behind the
//! scheduler's single mutex; no handle to this struct escapes the queue
//! module, only [`QueueStatus`] snapshots.

use std::collections::{HashMap, HashSet};

use super::types::{
    ActiveJob, AnalysisProgress, QueueStatus, QueuedJob, TaskClass, TaskType, WorkItem,
};

pub(crate) struct PendingItem {
    pub seq: u64,
    pub item: WorkItem,
}

pub(crate) struct QueueState {
    pub pending: Vec<PendingItem>,
    /// Batch-mode analysis items waiting for the debounce flush.
    pub batch_hold: Vec<WorkItem>,
    /// Bumped on every flush so a stale debounce timer becomes a no-op.
    pub batch_epoch: u64,
    pub in_flight: HashMap<TaskClass, HashSet<String>>,
    pub active_jobs: Vec<ActiveJob>,
    /// Shared active counter: queue dispatches, calibration probes, and
    /// background work all count here.
    pub active: usize,
    pub paused: bool,
    pub ceiling: usize,
    pub completed: u64,
    next_seq: u64,
    pub analysis_total: usize,
    pub analysis_done: usize,
    pub current_analysis_file: String,
}

impl QueueState {
    pub fn new(ceiling: usize) -> Self {
        let mut in_flight = HashMap::new();
        for class in TaskClass::ALL {
            in_flight.insert(class, HashSet::new());
        }
        Self {
            pending: Vec::new(),
            batch_hold: Vec::new(),
            batch_epoch: 0,
            in_flight,
            active_jobs: Vec::new(),
            active: 0,
            paused: false,
            ceiling: ceiling.max(1),
            completed: 0,
            next_seq: 0,
            analysis_total: 0,
            analysis_done: 0,
            current_analysis_file: String::new(),
        }
    }

    pub fn membership(&mut self, class: TaskClass) -> &mut HashSet<String> {
        self.in_flight.entry(class).or_default()
    }

    pub fn is_member(&self, class: TaskClass, id: &str) -> bool {
        self.in_flight
            .get(&class)
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    pub fn push_pending(&mut self, item: WorkItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingItem { seq, item });
    }

    /// Pop the best pending item: highest priority, then FIFO by sequence.
    pub fn pop_next(&mut self) -> Option<WorkItem> {
        let best = self
            .pending
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| (p.item.priority, std::cmp::Reverse(p.seq)))?
            .0;
        Some(self.pending.remove(best).item)
    }

    /// Gather additional pending analysis items (in FIFO order) to fill a
    /// batched dispatch up to `max` items total.
    pub fn take_analysis_batch(&mut self, first: WorkItem, max: usize) -> Vec<WorkItem> {
        let mut batch = vec![first];
        while batch.len() < max {
            let next = self
                .pending
                .iter()
                .enumerate()
                .filter(|(_, p)| p.item.task_type() == TaskType::Analysis)
                .min_by_key(|(_, p)| (std::cmp::Reverse(p.item.priority), p.seq))
                .map(|(i, _)| i);
            match next {
                Some(i) => batch.push(self.pending.remove(i).item),
                None => break,
            }
        }
        batch
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.batch_hold.is_empty()
    }

    pub fn analysis_progress(&self) -> Option<AnalysisProgress> {
        if self.analysis_total == 0 {
            return None;
        }
        Some(AnalysisProgress {
            current: self.analysis_done,
            total: self.analysis_total,
            file_name: self.current_analysis_file.clone(),
        })
    }

    /// Advance the shared analysis counter, clearing it once everything
    /// tracked by it has finished.
    pub fn advance_analysis(&mut self, n: usize) {
        self.analysis_done += n;
        let in_flight_empty = self
            .in_flight
            .get(&TaskClass::Analysis)
            .map(HashSet::is_empty)
            .unwrap_or(true);
        if self.analysis_done >= self.analysis_total || in_flight_empty {
            self.analysis_total = 0;
            self.analysis_done = 0;
            self.current_analysis_file.clear();
        }
    }

    pub fn snapshot(&self) -> QueueStatus {
        QueueStatus {
            active_count: self.active,
            pending_count: self.pending.len() + self.batch_hold.len(),
            is_paused: self.paused,
            concurrency_limit: self.ceiling,
            completed_count: self.completed,
            active_jobs: self.active_jobs.clone(),
            queued_jobs: self
                .batch_hold
                .iter()
                .chain(self.pending.iter().map(|p| &p.item))
                .map(|item| QueuedJob {
                    id: item.id.clone(),
                    file_name: item.file_name.clone(),
                    task_type: item.task_type(),
                    enqueued_at: item.enqueued_at,
                    priority: item.priority,
                })
                .collect(),
            calibration: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::ImageRef;
    use crate::queue::types::TaskPayload;

    fn analysis_item(id: &str) -> WorkItem {
        WorkItem::new(
            id,
            format!("{id}.png"),
            TaskPayload::Analysis {
                image: ImageRef {
                    id: id.into(),
                    file_name: format!("{id}.png"),
                    data_url: "data:image/png;base64,AA==".into(),
                },
            },
        )
    }

    #[test]
    fn pop_next_prefers_priority_then_fifo() {
        let mut state = QueueState::new(1);
        state.push_pending(analysis_item("a"));
        state.push_pending(analysis_item("b").with_priority(2));
        state.push_pending(analysis_item("c").with_priority(2));
        state.push_pending(analysis_item("d").with_priority(1));

        let order: Vec<String> = std::iter::from_fn(|| state.pop_next())
            .map(|i| i.id)
            .collect();
        assert_eq!(order, vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn take_analysis_batch_respects_max() {
        let mut state = QueueState::new(1);
        for id in ["a", "b", "c", "d"] {
            state.push_pending(analysis_item(id));
        }
        let first = state.pop_next().unwrap();
        let batch = state.take_analysis_batch(first, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn analysis_progress_clears_at_completion() {
        let mut state = QueueState::new(1);
        state.analysis_total = 2;
        state.membership(TaskClass::Analysis).insert("a".into());
        state.advance_analysis(1);
        assert_eq!(
            state.analysis_progress().map(|p| (p.current, p.total)),
            Some((1, 2))
        );
        state.membership(TaskClass::Analysis).remove("a");
        state.advance_analysis(1);
        assert_eq!(state.analysis_progress(), None);
    }
}
