use std::path::PathBuf;

use lumen_core::api::{EngineError, Settings};

use crate::cli::ProvidersArgs;
use crate::engine;

pub async fn run(args: ProvidersArgs, settings: Settings) -> Result<i32, EngineError> {
    let engine = engine::build(settings, PathBuf::from("lumen-out"));
    let mut failures = 0usize;

    for provider in engine.service.registry().all() {
        let capabilities: Vec<&str> = provider
            .capabilities()
            .iter()
            .map(|c| c.as_str())
            .collect();
        let configured = provider.is_configured(&engine.settings);
        println!(
            "{:<16} {:<16} {:<11} {}",
            provider.id().as_str(),
            provider.display_name(),
            if configured { "configured" } else { "-" },
            capabilities.join(", ")
        );

        if args.test && configured {
            match engine
                .service
                .test_provider_connection(provider.id(), &engine.settings)
                .await
            {
                Ok(()) => println!("{:<16} connection ok", ""),
                Err(e) => {
                    failures += 1;
                    println!("{:<16} connection failed: {e}", "");
                }
            }
        }
    }

    Ok(if failures > 0 { 1 } else { 0 })
}
