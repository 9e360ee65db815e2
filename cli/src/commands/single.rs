//! One-shot operations: caption, tag, smart-crop, and the local VRAM
//! unload trigger.

use std::path::{Path, PathBuf};

use lumen_core::api::{EngineError, ProviderError, Settings};
use lumen_plugins::factory;
use lumen_plugins::providers::MoondreamLocalProvider;

use crate::commands::load_image;
use crate::engine;

pub async fn caption(path: &Path, settings: Settings) -> Result<i32, EngineError> {
    let engine = engine::build(settings, PathBuf::from("lumen-out"));
    let image = load_image(path)?;
    let caption = engine
        .service
        .caption_image(&image, &engine.settings, None)
        .await?;
    println!("{caption}");
    Ok(0)
}

pub async fn tag(path: &Path, settings: Settings) -> Result<i32, EngineError> {
    let engine = engine::build(settings, PathBuf::from("lumen-out"));
    let image = load_image(path)?;
    let tags = engine
        .service
        .tag_image(&image, &engine.settings, None)
        .await?;
    println!("{}", tags.join(", "));
    Ok(0)
}

/// Smart-crop runs outside the queue but on the shared active counter, so it
/// can never oversubscribe the local GPU behind the scheduler's back.
pub async fn crop(path: &Path, settings: Settings) -> Result<i32, EngineError> {
    let engine = engine::build(settings, PathBuf::from("lumen-out"));
    let image = load_image(path)?;
    engine.store.register(&image.id, path);
    let point = engine.scheduler.smart_crop(&image).await?;
    println!("subject center: {}%, {}%", point.x, point.y);
    Ok(0)
}

pub async fn unload(settings: Settings) -> Result<i32, EngineError> {
    let provider = MoondreamLocalProvider::new(factory::default_client());
    match provider.unload_models(&settings).await {
        Ok(()) => {
            println!("local backend released cached models");
            Ok(0)
        }
        Err(ProviderError::Configuration(msg)) => Err(EngineError::Config(msg)),
        Err(e) => {
            eprintln!("unload failed: {e}");
            Ok(1)
        }
    }
}
