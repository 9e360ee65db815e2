//! Batch-size calibration: discover the largest concurrency the local
//! backend tolerates, by doubling the probe level until a probe fails or
//! throughput stops improving, then stepping back one level.
//!
//! Probes hold permits on the scheduler's shared active counter, so a
//! calibration run can never oversubscribe the GPU behind the queue's back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::error::ProviderError;
use crate::queue::Scheduler;
use crate::resilience::{ResilienceKind, ResilienceLog};

/// A single probe against the local backend. Injected so the ladder is
/// independent of any concrete provider; the CLI wires it to a one-token
/// caption call.
pub type ProbeFn = dyn Fn() -> BoxFuture<'static, Result<(), ProviderError>> + Send + Sync;

/// Doubling past this is never safe to assume, regardless of what probes say.
const MAX_PROBE_LEVEL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Idle,
    Probing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeLevelResult {
    pub concurrency: usize,
    pub probes: usize,
    pub elapsed_ms: u64,
    /// Probes per second at this level.
    pub throughput: f64,
    pub failed: bool,
}

/// Read-only calibration state for display.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationStatus {
    pub phase: CalibrationPhase,
    pub current_level: usize,
    pub optimal_concurrency: usize,
    /// Whether calibration has completed at least once.
    pub calibrated: bool,
    pub results: Vec<ProbeLevelResult>,
}

struct CalState {
    phase: CalibrationPhase,
    current_level: usize,
    optimal: usize,
    calibrated: bool,
    results: Vec<ProbeLevelResult>,
}

pub struct Calibrator {
    state: Mutex<CalState>,
    stop: AtomicBool,
    resilience: Arc<ResilienceLog>,
}

impl Calibrator {
    pub fn new(resilience: Arc<ResilienceLog>) -> Self {
        Self {
            state: Mutex::new(CalState {
                phase: CalibrationPhase::Idle,
                current_level: 0,
                optimal: 1,
                calibrated: false,
                results: Vec::new(),
            }),
            stop: AtomicBool::new(false),
            resilience,
        }
    }

    pub fn status(&self) -> CalibrationStatus {
        let st = self.state.lock().expect("calibrator lock");
        CalibrationStatus {
            phase: st.phase,
            current_level: st.current_level,
            optimal_concurrency: st.optimal,
            calibrated: st.calibrated,
            results: st.results.clone(),
        }
    }

    pub fn optimal_concurrency(&self) -> usize {
        self.state.lock().expect("calibrator lock").optimal
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.lock().expect("calibrator lock").calibrated
    }

    /// Abort a running calibration, leaving the last known-good value in
    /// place.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run the probe ladder. Re-runnable on demand; concurrent runs are
    /// rejected by returning the current optimal unchanged.
    pub async fn run(
        &self,
        scheduler: &Scheduler,
        probe: Arc<ProbeFn>,
        probes_per_level: usize,
    ) -> usize {
        {
            let mut st = self.state.lock().expect("calibrator lock");
            if st.phase == CalibrationPhase::Probing {
                tracing::warn!("calibration already in progress");
                return st.optimal;
            }
            st.phase = CalibrationPhase::Probing;
            st.results.clear();
            st.current_level = 1;
        }
        self.stop.store(false, Ordering::SeqCst);
        let probes_per_level = probes_per_level.max(1);

        let mut level = 1usize;
        let mut best = 1usize;
        let mut prev_throughput: Option<f64> = None;
        let mut aborted = false;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                aborted = true;
                break;
            }

            self.state.lock().expect("calibrator lock").current_level = level;
            scheduler.set_ceiling(level);
            tracing::info!(level, probes = probes_per_level, "probing concurrency level");

            let (elapsed, failed) = self
                .run_level(scheduler, probe.as_ref(), level, probes_per_level)
                .await;
            let secs = elapsed.as_secs_f64().max(f64::EPSILON);
            let throughput = probes_per_level as f64 / secs;

            let result = ProbeLevelResult {
                concurrency: level,
                probes: probes_per_level,
                elapsed_ms: elapsed.as_millis() as u64,
                throughput,
                failed,
            };
            self.resilience.record_with_metrics(
                "calibration",
                None,
                ResilienceKind::Calibration,
                "Probe Level",
                &[
                    ("Concurrency", level.to_string()),
                    ("Throughput", format!("{throughput:.2}/s")),
                    ("Failed", failed.to_string()),
                ],
            );
            self.state
                .lock()
                .expect("calibrator lock")
                .results
                .push(result);

            if failed {
                // First failure: step back one level and stop.
                tracing::warn!(level, "probe failure, stepping back to {best}");
                break;
            }
            if let Some(prev) = prev_throughput {
                if throughput <= prev {
                    tracing::info!(
                        level,
                        throughput,
                        prev,
                        "throughput regression, stepping back to {best}"
                    );
                    break;
                }
            }

            best = level;
            prev_throughput = Some(throughput);
            if level >= MAX_PROBE_LEVEL {
                break;
            }
            level *= 2;
        }

        let optimal = {
            let mut st = self.state.lock().expect("calibrator lock");
            if aborted {
                st.phase = CalibrationPhase::Aborted;
                // Keep the previous known-good value untouched.
            } else {
                st.optimal = best;
                st.calibrated = true;
                st.phase = CalibrationPhase::Done;
            }
            st.optimal
        };
        scheduler.set_ceiling(optimal);
        tracing::info!(optimal, "calibration finished");
        optimal
    }

    /// Issue `count` probes keeping `level` of them in flight. A failed probe
    /// stops admission of new probes; already-started ones drain.
    async fn run_level(
        &self,
        scheduler: &Scheduler,
        probe: &ProbeFn,
        level: usize,
        count: usize,
    ) -> (std::time::Duration, bool) {
        let started = tokio::time::Instant::now();
        let mut failed = false;
        let mut issued = 0usize;
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Result<(), ProviderError>>> =
            FuturesUnordered::new();

        let launch = |in_flight: &mut FuturesUnordered<BoxFuture<'static, Result<(), ProviderError>>>| {
            let permit = scheduler.background_permit();
            let fut = probe();
            in_flight.push(Box::pin(async move {
                let _permit = permit;
                fut.await
            }));
        };

        while issued < count && in_flight.len() < level {
            launch(&mut in_flight);
            issued += 1;
        }

        while let Some(result) = in_flight.next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, oom = e.is_oom(), "calibration probe failed");
                failed = true;
            }
            if failed || self.stop.load(Ordering::SeqCst) {
                continue; // drain without admitting more
            }
            if issued < count {
                launch(&mut in_flight);
                issued += 1;
            }
        }

        (started.elapsed(), failed)
    }
}
