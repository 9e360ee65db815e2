//! The in-memory work queue: admission, deduplication, priority dispatch,
//! pause/resume, debounced batch accumulation, and the shared active-request
//! counter that bounds everything touching the local GPU.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::Settings;
use crate::error::ServiceError;
use crate::hooks::EngineHooks;
use crate::provider::types::{ImageRef, StatsSample, SubjectPoint};
use crate::resilience::{ResilienceKind, ResilienceLog};
use crate::service::AiService;

use super::state::QueueState;
use super::types::{ActiveJob, AnalysisProgress, QueueStatus, TaskType, WorkItem};

/// Handle to the scheduler; cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

pub(crate) struct SchedulerInner {
    pub(crate) state: Mutex<QueueState>,
    pub(crate) service: Arc<AiService>,
    pub(crate) settings: Arc<Settings>,
    pub(crate) resilience: Arc<ResilienceLog>,
    pub(crate) hooks: EngineHooks,
    pub(crate) stats: Mutex<Vec<StatsSample>>,
    pub(crate) idle: tokio::sync::Notify,
}

impl Scheduler {
    pub fn new(
        service: Arc<AiService>,
        settings: Arc<Settings>,
        resilience: Arc<ResilienceLog>,
        hooks: EngineHooks,
    ) -> Self {
        let ceiling = settings.queue.default_concurrency;
        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(QueueState::new(ceiling)),
                service,
                settings,
                resilience,
                hooks,
                stats: Mutex::new(Vec::new()),
                idle: tokio::sync::Notify::new(),
            }),
        }
    }

    /// Admit work items. Items whose id is already tracked by the matching
    /// in-flight membership set are silently dropped. In batch mode,
    /// analysis items accumulate until a size threshold or a short debounce
    /// window elapses.
    pub fn enqueue(&self, items: Vec<WorkItem>) {
        let debounce = Duration::from_millis(self.inner.settings.queue.batch_debounce_ms);
        let max_batch = self.inner.settings.queue.max_batch_size;
        let batch_mode = self.inner.settings.performance.batch_mode;

        let mut armed_epoch: Option<u64> = None;
        let mut flush_now = false;
        {
            let mut st = self.inner.lock_state();
            for item in items {
                let class = item.task_type().membership_class();
                if st.is_member(class, &item.id) {
                    tracing::debug!(id = %item.id, task_type = ?item.task_type(),
                        "duplicate enqueue dropped");
                    continue;
                }
                if item.is_retry {
                    self.inner.hooks.store.clear_failure(&item.id);
                }
                st.membership(class).insert(item.id.clone());
                if item.task_type() == TaskType::Analysis {
                    st.analysis_total += 1;
                }

                if batch_mode && item.task_type() == TaskType::Analysis {
                    if st.batch_hold.is_empty() {
                        armed_epoch = Some(st.batch_epoch);
                    }
                    st.batch_hold.push(item);
                    if st.batch_hold.len() >= max_batch {
                        flush_now = true;
                    }
                } else {
                    st.push_pending(item);
                }
            }
        }

        if flush_now {
            self.inner.flush_batch_hold(None);
        } else if let Some(epoch) = armed_epoch {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                inner.flush_batch_hold(Some(epoch));
            });
        }

        self.inner.drain();
    }

    /// Remove not-yet-dispatched items. Dispatched items are untouched and
    /// run to completion; cancelling in-flight work is the transport's
    /// timeout's job.
    pub fn remove(&self, ids: &[String]) {
        {
            let mut st = self.inner.lock_state();
            for id in ids {
                let from_pending = st
                    .pending
                    .iter()
                    .position(|p| &p.item.id == id)
                    .map(|i| st.pending.remove(i).item);
                let from_hold = st
                    .batch_hold
                    .iter()
                    .position(|item| &item.id == id)
                    .map(|i| st.batch_hold.remove(i));
                if let Some(item) = from_pending.or(from_hold) {
                    st.membership(item.task_type().membership_class())
                        .remove(&item.id);
                    if item.task_type() == TaskType::Analysis {
                        st.analysis_total = st.analysis_total.saturating_sub(1);
                    }
                }
            }
        }
        self.inner.idle.notify_waiters();
    }

    /// Remove all not-yet-dispatched items; in-flight items continue.
    pub fn clear(&self) {
        {
            let mut st = self.inner.lock_state();
            let mut removed: Vec<WorkItem> =
                st.pending.drain(..).map(|p| p.item).collect();
            removed.extend(st.batch_hold.drain(..));
            for item in removed {
                st.membership(item.task_type().membership_class())
                    .remove(&item.id);
                if item.task_type() == TaskType::Analysis {
                    st.analysis_total = st.analysis_total.saturating_sub(1);
                }
            }
        }
        self.inner.idle.notify_waiters();
    }

    pub fn pause(&self) {
        self.inner.lock_state().paused = true;
        tracing::info!("queue paused");
    }

    pub fn resume(&self) {
        self.inner.lock_state().paused = false;
        tracing::info!("queue resumed");
        self.inner.drain();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().paused
    }

    /// Concurrency ceiling; calibration stores its result here.
    pub fn set_ceiling(&self, ceiling: usize) {
        self.inner.lock_state().ceiling = ceiling.max(1);
        self.inner.drain();
    }

    pub fn ceiling(&self) -> usize {
        self.inner.lock_state().ceiling
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.lock_state().snapshot()
    }

    pub fn analysis_progress(&self) -> Option<AnalysisProgress> {
        self.inner.lock_state().analysis_progress()
    }

    pub fn resilience(&self) -> Arc<ResilienceLog> {
        Arc::clone(&self.inner.resilience)
    }

    /// Tokens/sec and device samples from completed work, for display.
    pub fn stats_history(&self) -> Vec<StatsSample> {
        self.inner.stats.lock().expect("stats lock").clone()
    }

    /// Reserve a slot on the shared active counter for work running outside
    /// the queue (calibration probes, background smart-crop). The queue will
    /// not dispatch past the ceiling while permits are held.
    pub fn background_permit(&self) -> BackgroundPermit {
        self.inner.lock_state().active += 1;
        BackgroundPermit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Subject detection outside the queue, on the shared counter.
    pub async fn smart_crop(&self, image: &ImageRef) -> Result<SubjectPoint, ServiceError> {
        let _permit = self.background_permit();
        let point = self
            .inner
            .service
            .detect_subject(image, &self.inner.settings)
            .await?;
        self.inner.hooks.store.save_crop(&image.id, point);
        Ok(point)
    }

    /// Resolve once the queue has no pending or in-flight work.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let st = self.inner.lock_state();
                if st.active == 0 && !st.has_pending() {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl SchedulerInner {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("queue state lock")
    }

    /// Move held batch items into the pending queue. With an epoch this is a
    /// debounce-timer flush and becomes a no-op if a size flush already won.
    fn flush_batch_hold(self: &Arc<Self>, epoch: Option<u64>) {
        {
            let mut st = self.lock_state();
            if let Some(epoch) = epoch {
                if st.batch_epoch != epoch {
                    return;
                }
            }
            if st.batch_hold.is_empty() {
                return;
            }
            st.batch_epoch += 1;
            let held: Vec<WorkItem> = st.batch_hold.drain(..).collect();
            for item in held {
                st.push_pending(item);
            }
        }
        self.drain();
    }

    /// Dispatch loop: pops items while slots are free. All mutation happens
    /// under the state mutex, so concurrent drain calls cannot interleave
    /// dispatch decisions.
    pub(crate) fn drain(self: &Arc<Self>) {
        loop {
            let batch = {
                let mut st = self.lock_state();
                if st.paused || st.active >= st.ceiling {
                    None
                } else {
                    st.pop_next().map(|item| {
                        let batch = if self.settings.performance.batch_mode
                            && item.task_type() == TaskType::Analysis
                        {
                            st.take_analysis_batch(item, self.settings.queue.max_batch_size)
                        } else {
                            vec![item]
                        };
                        st.active += 1;
                        for item in &batch {
                            st.active_jobs.push(ActiveJob {
                                id: item.id.clone(),
                                file_name: item.file_name.clone(),
                                task_type: item.task_type(),
                                started_at: chrono::Utc::now(),
                            });
                        }
                        (st.active, st.ceiling, st.pending.len(), batch)
                    })
                }
            };

            let Some((active, limit, queued, batch)) = batch else {
                break;
            };

            self.resilience.record_with_metrics(
                batch[0].id.clone(),
                None,
                ResilienceKind::Info,
                "Thread Start",
                &[
                    ("Active", active.to_string()),
                    ("Limit", limit.to_string()),
                    ("Queue", queued.to_string()),
                ],
            );

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();
                let types: Vec<TaskType> = batch.iter().map(|i| i.task_type()).collect();
                let count = batch.len() as u64;

                inner.execute_dispatch(batch).await;

                {
                    let mut st = inner.lock_state();
                    st.active = st.active.saturating_sub(1);
                    st.completed += count;
                    st.active_jobs.retain(|j| !ids.contains(&j.id));
                    for (id, task_type) in ids.iter().zip(&types) {
                        st.membership(task_type.membership_class()).remove(id);
                    }
                    let analyses = types.iter().filter(|t| **t == TaskType::Analysis).count();
                    if analyses > 0 {
                        st.advance_analysis(analyses);
                    }
                }
                inner.idle.notify_waiters();
                inner.drain();
            });
        }
        self.idle.notify_waiters();
    }
}

/// RAII guard on the shared active counter.
pub struct BackgroundPermit {
    inner: Arc<SchedulerInner>,
}

impl Drop for BackgroundPermit {
    fn drop(&mut self) {
        {
            let mut st = self.inner.lock_state();
            st.active = st.active.saturating_sub(1);
        }
        self.inner.idle.notify_waiters();
        self.inner.drain();
    }
}
