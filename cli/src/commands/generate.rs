use lumen_core::api::{Capability, EngineError, Settings, TaskPayload, WorkItem};

use crate::cli::GenerateArgs;
use crate::commands::parse_aspect;
use crate::engine;

pub async fn run(args: GenerateArgs, settings: Settings) -> Result<i32, EngineError> {
    let aspect_ratio = parse_aspect(&args.aspect)?;
    let engine = engine::build(settings, args.out.clone());
    if !engine
        .service
        .is_any_provider_configured(&engine.settings, Capability::Generation)
    {
        return Err(EngineError::Config(
            "no configured provider is routed for 'generation'; check [routing] and provider \
             credentials"
                .into(),
        ));
    }

    let items: Vec<WorkItem> = (0..args.count.max(1))
        .map(|i| {
            let id = format!("gen-{}-{}", i + 1, uuid::Uuid::new_v4());
            WorkItem::new(
                id,
                format!("generation {}/{}", i + 1, args.count.max(1)),
                TaskPayload::Generate {
                    prompt: args.prompt.clone(),
                    aspect_ratio,
                    source_image: None,
                },
            )
        })
        .collect();

    tracing::info!(count = items.len(), aspect = args.aspect, "enqueueing generation work");
    engine.scheduler.enqueue(items);
    engine.scheduler.wait_idle().await;

    let failures = engine.store.failure_count();
    println!(
        "generated {} images into {}",
        args.count.max(1) - failures,
        args.out.display()
    );
    Ok(if failures > 0 { 1 } else { 0 })
}
