use std::path::PathBuf;

use lumen_core::api::{Capability, EngineError, Settings, TaskPayload, WorkItem};

use crate::cli::AnalyzeArgs;
use crate::commands::{load_image, print_resilience_log};
use crate::engine;

pub async fn run(args: AnalyzeArgs, mut settings: Settings) -> Result<i32, EngineError> {
    if args.batch {
        settings.performance.batch_mode = true;
    }
    let engine = engine::build(settings, PathBuf::from("lumen-out"));
    if !engine
        .service
        .is_any_provider_configured(&engine.settings, Capability::Vision)
    {
        return Err(EngineError::Config(
            "no configured provider is routed for 'vision'; check [routing] and provider \
             credentials"
                .into(),
        ));
    }

    let mut items = Vec::new();
    for pattern in &args.patterns {
        for path in expand_pattern(pattern)? {
            let image = load_image(&path)?;
            engine.store.register(&image.id, &path);
            let mut item = WorkItem::new(
                image.id.clone(),
                image.file_name.clone(),
                TaskPayload::Analysis { image },
            )
            .with_priority(args.priority);
            if args.retry {
                item = item.as_retry();
            }
            items.push(item);
        }
    }
    if items.is_empty() {
        return Err(EngineError::Config(format!(
            "no images matched {:?}",
            args.patterns
        )));
    }

    let total = items.len();
    tracing::info!(total, batch = args.batch, "enqueueing analysis work");
    engine.scheduler.enqueue(items);
    engine.scheduler.wait_idle().await;

    let failures = engine.store.failure_count();
    let samples = engine.scheduler.stats_history();
    if let Some(avg) = average_tps(&samples) {
        println!("average throughput: {avg:.1} tokens/s over {} calls", samples.len());
    }
    println!("analyzed {} images, {failures} failed", total - failures);

    if args.show_log {
        print_resilience_log(&engine.resilience);
    }
    Ok(if failures > 0 { 1 } else { 0 })
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, EngineError> {
    let direct = PathBuf::from(pattern);
    if direct.is_file() {
        return Ok(vec![direct]);
    }
    let paths = glob::glob(pattern)
        .map_err(|e| EngineError::Config(format!("bad glob pattern '{pattern}': {e}")))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    Ok(paths)
}

fn average_tps(samples: &[lumen_core::api::StatsSample]) -> Option<f64> {
    let rates: Vec<f64> = samples.iter().filter_map(|s| s.tokens_per_sec).collect();
    if rates.is_empty() {
        return None;
    }
    Some(rates.iter().sum::<f64>() / rates.len() as f64)
}
