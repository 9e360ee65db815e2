//! End-to-end scheduler behavior against a scripted provider: admission,
//! deduplication, the concurrency ceiling, pause/resume, removal, batching,
//! and the shared active counter.

mod common;

use std::time::Duration;

use common::{analysis_item, harness, image, StubProvider};
use lumen_core::api::{Settings, TaskPayload, WorkItem};

fn latency() -> Duration {
    Duration::from_millis(50)
}

#[tokio::test(start_paused = true)]
async fn duplicate_enqueue_keeps_one_entry() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.pause();
    h.scheduler
        .enqueue(vec![analysis_item("img-1"), analysis_item("img-1")]);
    assert_eq!(h.scheduler.status().pending_count, 1);

    // Re-enqueueing while still pending is also dropped.
    h.scheduler.enqueue(vec![analysis_item("img-1")]);
    assert_eq!(h.scheduler.status().pending_count, 1);

    h.scheduler.resume();
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed(), vec!["img-1"]);
}

#[tokio::test(start_paused = true)]
async fn active_count_never_exceeds_ceiling() {
    let mut settings = Settings::default();
    settings.queue.default_concurrency = 2;
    let h = harness(StubProvider::new(latency()), settings);

    let items: Vec<WorkItem> = (0..10).map(|i| analysis_item(&format!("img-{i}"))).collect();
    h.scheduler.enqueue(items);
    h.scheduler.wait_idle().await;

    assert_eq!(h.provider.processed().len(), 10);
    assert!(h.provider.max_in_flight() <= 2, "ceiling was exceeded");
    assert_eq!(h.recorder.saved.lock().unwrap().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn priority_dispatches_before_fifo() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.pause();
    h.scheduler.enqueue(vec![
        analysis_item("first-in"),
        analysis_item("urgent").with_priority(10),
        analysis_item("second-in"),
    ]);
    h.scheduler.resume();
    h.scheduler.wait_idle().await;

    assert_eq!(
        h.provider.processed(),
        vec!["urgent", "first-in", "second-in"]
    );
}

#[tokio::test(start_paused = true)]
async fn pause_blocks_dispatch_resume_restores_it() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.pause();
    h.scheduler.enqueue(vec![analysis_item("a"), analysis_item("b")]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = h.scheduler.status();
    assert_eq!(status.active_count, 0);
    assert_eq!(status.pending_count, 2);
    assert!(status.is_paused);

    h.scheduler.resume();
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn remove_pending_is_total_remove_dispatched_is_noop() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    // Ceiling 1: "a" dispatches, "b" stays pending.
    h.scheduler.enqueue(vec![analysis_item("a")]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.scheduler.enqueue(vec![analysis_item("b")]);

    h.scheduler.remove(&["a".to_string(), "b".to_string()]);
    h.scheduler.wait_idle().await;

    // "a" was already dispatched and completed normally; "b" never ran.
    assert_eq!(h.provider.processed(), vec!["a"]);
    assert_eq!(h.recorder.saved.lock().unwrap().as_slice(), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn clear_drops_pending_but_inflight_completes() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.enqueue(vec![analysis_item("a")]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.scheduler
        .enqueue(vec![analysis_item("b"), analysis_item("c")]);

    h.scheduler.clear();
    h.scheduler.wait_idle().await;

    assert_eq!(h.provider.processed(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn removed_item_can_be_enqueued_again() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.pause();
    h.scheduler.enqueue(vec![analysis_item("a")]);
    h.scheduler.remove(&["a".to_string()]);
    assert_eq!(h.scheduler.status().pending_count, 0);

    h.scheduler.enqueue(vec![analysis_item("a")]);
    assert_eq!(h.scheduler.status().pending_count, 1);
    h.scheduler.resume();
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn failed_analysis_sets_flag_and_retry_clears_it() {
    let h = harness(
        StubProvider::new(latency()).failing_for(&["bad"]),
        Settings::default(),
    );
    h.scheduler.enqueue(vec![analysis_item("bad")]);
    h.scheduler.wait_idle().await;
    assert!(h.recorder.failed.lock().unwrap().contains_key("bad"));

    // Explicit caller retry clears the failure flag on admission.
    h.provider.fail_ids.lock().unwrap().clear();
    h.scheduler.enqueue(vec![analysis_item("bad").as_retry()]);
    h.scheduler.wait_idle().await;

    assert_eq!(h.recorder.cleared.lock().unwrap().as_slice(), ["bad"]);
    assert!(!h.recorder.failed.lock().unwrap().contains_key("bad"));
    assert!(h.recorder.saved.lock().unwrap().contains(&"bad".to_string()));
}

#[tokio::test(start_paused = true)]
async fn batch_failure_is_all_or_nothing() {
    let mut settings = Settings::default();
    settings.performance.batch_mode = true;
    settings.queue.batch_debounce_ms = 20;
    let h = harness(StubProvider::new(latency()).batch_capable(true), settings);

    h.scheduler.enqueue(vec![
        analysis_item("img-1"),
        analysis_item("img-2"),
        analysis_item("img-3"),
    ]);
    h.scheduler.wait_idle().await;

    // Transport-level batch failure: every member failed, none saved.
    let failed = h.recorder.failed.lock().unwrap();
    assert_eq!(failed.len(), 3);
    for id in ["img-1", "img-2", "img-3"] {
        assert!(failed.contains_key(id));
    }
    assert!(h.recorder.saved.lock().unwrap().is_empty());

    // In-flight membership is clean: the same ids can be enqueued again.
    drop(failed);
    h.scheduler.pause();
    h.scheduler.enqueue(vec![analysis_item("img-1")]);
    assert_eq!(h.scheduler.status().pending_count, 1);
}

#[tokio::test(start_paused = true)]
async fn batch_success_fans_results_out_per_image() {
    let mut settings = Settings::default();
    settings.performance.batch_mode = true;
    settings.queue.batch_debounce_ms = 20;
    let h = harness(StubProvider::new(latency()).batch_capable(false), settings);

    h.scheduler
        .enqueue(vec![analysis_item("x"), analysis_item("y")]);
    h.scheduler.wait_idle().await;

    let saved = h.recorder.saved.lock().unwrap();
    assert!(saved.contains(&"x".to_string()));
    assert!(saved.contains(&"y".to_string()));
    // One provider call covered the whole batch.
    assert_eq!(h.provider.processed(), vec!["batch"]);
}

#[tokio::test(start_paused = true)]
async fn batch_debounce_flushes_on_window_elapse() {
    let mut settings = Settings::default();
    settings.performance.batch_mode = true;
    settings.queue.batch_debounce_ms = 250;
    settings.queue.max_batch_size = 8;
    let h = harness(StubProvider::new(latency()).batch_capable(false), settings);

    h.scheduler.enqueue(vec![analysis_item("x")]);
    // Held in the accumulator: not yet dispatched, but visible as pending.
    assert_eq!(h.scheduler.status().pending_count, 1);
    assert_eq!(h.scheduler.status().active_count, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    h.scheduler.wait_idle().await;
    // A lone held item dispatches through the single-analysis path.
    assert_eq!(h.provider.processed(), vec!["x"]);
}

#[tokio::test(start_paused = true)]
async fn batch_size_threshold_flushes_without_waiting() {
    let mut settings = Settings::default();
    settings.performance.batch_mode = true;
    settings.queue.batch_debounce_ms = 60_000; // would wait forever
    settings.queue.max_batch_size = 2;
    let h = harness(StubProvider::new(latency()).batch_capable(false), settings);

    h.scheduler
        .enqueue(vec![analysis_item("x"), analysis_item("y")]);
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed(), vec!["batch"]);
}

#[tokio::test(start_paused = true)]
async fn background_permit_shares_the_active_counter() {
    let h = harness(StubProvider::new(latency()), Settings::default());

    // A background permit occupies the single slot: nothing dispatches.
    let permit = h.scheduler.background_permit();
    h.scheduler.enqueue(vec![analysis_item("a")]);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.provider.processed().len(), 0);
    assert_eq!(h.scheduler.status().active_count, 1);

    // Releasing the permit lets the queue move again.
    drop(permit);
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed(), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn smart_crop_runs_outside_queue_but_counts() {
    let mut settings = Settings::default();
    settings.queue.default_concurrency = 1;
    let h = harness(StubProvider::new(latency()), settings);

    let point = h.scheduler.smart_crop(&image("crop-me")).await.unwrap();
    assert_eq!((point.x, point.y), (40, 60));
    assert_eq!(
        h.recorder.crops.lock().unwrap().as_slice(),
        [("crop-me".to_string(), point)]
    );
    // Counter restored afterwards.
    assert_eq!(h.scheduler.status().active_count, 0);
}

#[tokio::test(start_paused = true)]
async fn analysis_and_generation_track_separate_membership() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler.pause();
    // Same subject id queued for analysis and generation simultaneously.
    h.scheduler.enqueue(vec![
        analysis_item("subject"),
        WorkItem::new(
            "subject",
            "subject.png",
            TaskPayload::Generate {
                prompt: "subject".into(),
                aspect_ratio: lumen_core::api::AspectRatio::Square,
                source_image: None,
            },
        ),
    ]);
    assert_eq!(h.scheduler.status().pending_count, 2);
    h.scheduler.resume();
    h.scheduler.wait_idle().await;
    assert_eq!(h.provider.processed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn analysis_progress_advances_and_clears() {
    let h = harness(StubProvider::new(latency()), Settings::default());
    h.scheduler
        .enqueue(vec![analysis_item("a"), analysis_item("b")]);
    let progress = h.scheduler.analysis_progress().expect("progress tracked");
    assert_eq!(progress.total, 2);

    h.scheduler.wait_idle().await;
    assert_eq!(h.scheduler.analysis_progress(), None);
    assert_eq!(h.scheduler.status().completed_count, 2);
}

#[tokio::test(start_paused = true)]
async fn transport_only_chain_failure_pauses_queue_when_configured() {
    let mut settings = Settings::default();
    settings.performance.batch_mode = false;
    settings.resilience.pause_on_local_failure = true;
    let provider = StubProvider::new(latency());
    *provider.fail_ids.lock().unwrap() = vec!["gen".to_string()];
    let h = harness(provider, settings);

    // Scripted generation failure is a Backend error, not transport: the
    // queue must keep running.
    h.scheduler.enqueue(vec![WorkItem::new(
        "gen-item",
        "gen.png",
        TaskPayload::Generate {
            prompt: "gen".into(),
            aspect_ratio: lumen_core::api::AspectRatio::Square,
            source_image: None,
        },
    )]);
    h.scheduler.wait_idle().await;
    assert!(!h.scheduler.is_paused());
    assert!(h.recorder.failed.lock().unwrap().contains_key("gen-item"));
}
