use std::path::PathBuf;
use std::sync::Arc;

use lumen_core::api::{EngineError, ImageRef, ProbeFn, ProviderId, Settings};

use crate::cli::CalibrateArgs;
use crate::engine;

/// 1x1 transparent PNG used as the fixed probe workload.
const PROBE_PIXEL: &str = "data:image/png;base64,\
iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub async fn run(args: CalibrateArgs, settings: Settings) -> Result<i32, EngineError> {
    let engine = engine::build(settings, PathBuf::from("lumen-out"));

    let local = engine
        .service
        .registry()
        .get(ProviderId::MoondreamLocal)
        .ok_or_else(|| EngineError::Config("local provider is not registered".into()))?;
    if !local.is_configured(&engine.settings) {
        return Err(EngineError::Config(
            "local backend endpoint is not configured; calibration targets the local GPU".into(),
        ));
    }

    let probe_settings = engine.settings.clone();
    let probe: Arc<ProbeFn> = Arc::new(move || {
        let provider = local.clone();
        let settings = probe_settings.clone();
        Box::pin(async move {
            let image = ImageRef {
                id: "calibration-probe".into(),
                file_name: "probe.png".into(),
                data_url: PROBE_PIXEL.into(),
            };
            provider.caption_image(&image, &settings).await.map(|_| ())
        })
    });

    let probes = args.probes.unwrap_or(engine.settings.queue.probes_per_level);
    println!("calibrating against the local backend ({probes} probes per level)...");
    let optimal = engine
        .calibrator
        .run(&engine.scheduler, probe, probes)
        .await;

    let status = engine.calibrator.status();
    for level in &status.results {
        println!(
            "  concurrency {:>2}: {:>6.2} probes/s{}",
            level.concurrency,
            level.throughput,
            if level.failed { "  (failed)" } else { "" }
        );
    }
    println!("optimal concurrency: {optimal}");
    Ok(0)
}
