pub mod analyze;
pub mod calibrate;
pub mod generate;
pub mod providers;
pub mod single;

use std::path::Path;

use base64::Engine as _;

use lumen_core::api::{AspectRatio, EngineError, ImageRef, ResilienceLog};

/// Load an image file into the data-URL form providers expect.
pub fn load_image(path: &Path) -> Result<ImageRef, EngineError> {
    let bytes = std::fs::read(path)?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.clone());

    Ok(ImageRef {
        id,
        file_name,
        data_url: format!("data:{mime};base64,{encoded}"),
    })
}

pub fn parse_aspect(value: &str) -> Result<AspectRatio, EngineError> {
    match value {
        "1:1" => Ok(AspectRatio::Square),
        "16:9" => Ok(AspectRatio::Landscape),
        "9:16" => Ok(AspectRatio::Portrait),
        "21:9" => Ok(AspectRatio::Ultrawide),
        other => Err(EngineError::Config(format!(
            "unknown aspect ratio '{other}' (expected 1:1, 16:9, 9:16, or 21:9)"
        ))),
    }
}

pub fn print_resilience_log(log: &ResilienceLog) {
    for entry in log.snapshot() {
        println!(
            "{} [{:?}] {} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.kind,
            entry.task_id,
            entry.message
        );
    }
}
