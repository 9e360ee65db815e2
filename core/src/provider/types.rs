use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to a subject image handed to the engine by a caller.
///
/// The engine never interprets `data_url` beyond forwarding it on the wire;
/// blob persistence is a collaborator concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub file_name: String,
    /// `data:image/...;base64,` payload.
    pub data_url: String,
}

impl ImageRef {
    /// Base64 payload without the data-URL prefix, as expected by batch wire
    /// operations.
    pub fn base64_payload(&self) -> &str {
        self.data_url
            .split_once(',')
            .map(|(_, b64)| b64)
            .unwrap_or(&self.data_url)
    }
}

/// Aspect ratio selector for generation and animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "21:9")]
    Ultrawide,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Ultrawide => "21:9",
        }
    }

    /// Pixel dimensions used by the local SDXL-style backend.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1024, 1024),
            AspectRatio::Landscape => (1216, 832),
            AspectRatio::Portrait => (832, 1216),
            AspectRatio::Ultrawide => (1536, 640),
        }
    }
}

/// Device/VRAM telemetry extracted from backend response headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePerformanceMetrics {
    pub vram_used_mb: f64,
    pub vram_total_mb: f64,
    pub inference_time_ms: f64,
    pub model_load_time_ms: f64,
    pub vram_usage_percent: Option<f64>,
    pub tokens_per_second: Option<f64>,
}

/// Per-call performance stats attached to results when available. Missing
/// telemetry never fails a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub tokens_per_sec: Option<f64>,
    pub device: String,
    pub total_tokens: Option<u64>,
    pub duration_secs: f64,
    pub device_performance: Option<DevicePerformanceMetrics>,
}

/// One entry of the stats history surfaced for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSample {
    pub timestamp: DateTime<Utc>,
    pub tokens_per_sec: Option<f64>,
    pub device: String,
}

/// Result of analyzing one image: a prompt that could recreate it plus
/// extracted keywords (which may carry `rating:<r>` payload pseudo-tags).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub recreation_prompt: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ProviderStats>,
}

/// Result of a generation or edit: image data plus stats.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Base64 image data or a URL, as returned by the backend.
    pub image: String,
    pub stats: Option<ProviderStats>,
}

/// Result of an animation request: a video URI plus the key needed to fetch
/// it from the provider.
#[derive(Debug, Clone)]
pub struct AnimationResult {
    pub uri: String,
    pub api_key: String,
}

/// Center of the detected main subject, both axes in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPoint {
    pub x: u8,
    pub y: u8,
}

impl SubjectPoint {
    pub const CENTER: SubjectPoint = SubjectPoint { x: 50, y: 50 };
}

/// Per-image tags from a batched tagging call.
#[derive(Debug, Clone)]
pub struct TagBatchEntry {
    pub image_id: String,
    pub tags: Vec<String>,
}

/// A model advertised by the local backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_payload_strips_data_url_prefix() {
        let image = ImageRef {
            id: "a".into(),
            file_name: "a.png".into(),
            data_url: "data:image/png;base64,AAAA".into(),
        };
        assert_eq!(image.base64_payload(), "AAAA");
    }

    #[test]
    fn base64_payload_passes_through_raw_base64() {
        let image = ImageRef {
            id: "a".into(),
            file_name: "a.png".into(),
            data_url: "AAAA".into(),
        };
        assert_eq!(image.base64_payload(), "AAAA");
    }

    #[test]
    fn aspect_ratio_dimensions() {
        assert_eq!(AspectRatio::Square.dimensions(), (1024, 1024));
        assert_eq!(AspectRatio::Landscape.dimensions(), (1216, 832));
    }
}
