use serde::{Deserialize, Serialize};

use crate::capability::{Capability, ProviderId, RoutingTable};

/// Top-level settings injected into the engine.
///
/// Per-provider credentials/endpoints and the routing table are supplied by
/// the operator; the engine treats them as read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub routing: RoutingTable,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub resilience: ResilienceConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Routing table with every capability pointed at the local backend.
    /// Used when no config file is present so a stock install works against
    /// a local inference server.
    pub fn with_local_defaults() -> Self {
        let mut settings = Settings::default();
        for capability in [
            Capability::Vision,
            Capability::Generation,
            Capability::Editing,
            Capability::Captioning,
            Capability::Tagging,
        ] {
            settings
                .routing
                .set(capability, vec![ProviderId::MoondreamLocal]);
        }
        settings
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub openai: OpenaiConfig,
    #[serde(default)]
    pub grok: GrokConfig,
    #[serde(default)]
    pub moondream_cloud: MoondreamCloudConfig,
    #[serde(default)]
    pub moondream_local: MoondreamLocalConfig,
    #[serde(default)]
    pub comfyui: ComfyuiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
    /// Video model id; required for the animation capability.
    #[serde(default)]
    pub veo_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenaiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
    #[serde(default)]
    pub text_generation_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrokConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoondreamCloudConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_cloud_endpoint")]
    pub endpoint: String,
}

fn default_cloud_endpoint() -> String {
    "https://api.moondream.ai/v1".to_string()
}

impl Default for MoondreamCloudConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_cloud_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoondreamLocalConfig {
    /// Base URL of the local inference server, e.g. `http://127.0.0.1:2020/v1`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Optional bearer token for the local server.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Vision/analysis model; falls back to the server default.
    #[serde(default)]
    pub model: Option<String>,
    /// Model override for captioning.
    #[serde(default)]
    pub caption_model: Option<String>,
    /// Model override for tagging; a WD14-style id enables the classifier
    /// path and batch tagging.
    #[serde(default)]
    pub tagging_model: Option<String>,
    /// Generation model for the SDXL-style image endpoint.
    #[serde(default)]
    pub generation_model: Option<String>,
    #[serde(default = "default_local_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_local_timeout_secs() -> u64 {
    120
}

impl Default for MoondreamLocalConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: None,
            caption_model: None,
            tagging_model: None,
            generation_model: None,
            timeout_secs: default_local_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComfyuiConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Optional; the endpoint alone is enough for an open instance.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Workflow template submitted to `/prompt`, with `{prompt}` placeholders.
    #[serde(default)]
    pub workflow: Option<String>,
}

/// Memory pressure mode forwarded to the local backend on every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    Low,
    Balanced,
    High,
}

impl MemoryMode {
    pub fn as_header_value(&self) -> &'static str {
        match self {
            MemoryMode::Low => "low",
            MemoryMode::Balanced => "balanced",
            MemoryMode::High => "high",
        }
    }
}

impl Default for MemoryMode {
    fn default() -> Self {
        MemoryMode::Balanced
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default)]
    pub vram_usage: MemoryMode,

    /// Downscale images before analysis to keep request payloads small.
    #[serde(default = "default_downscale_images")]
    pub downscale_images: bool,

    #[serde(default = "default_max_analysis_dimension")]
    pub max_analysis_dimension: u32,

    /// Accumulate analysis work into batched calls.
    #[serde(default)]
    pub batch_mode: bool,
}

fn default_downscale_images() -> bool {
    true
}

fn default_max_analysis_dimension() -> u32 {
    1024
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            vram_usage: MemoryMode::default(),
            downscale_images: default_downscale_images(),
            max_analysis_dimension: default_max_analysis_dimension(),
            batch_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Pause the queue when the local backend becomes unreachable instead of
    /// burning through every pending item.
    #[serde(default = "default_pause_on_local_failure")]
    pub pause_on_local_failure: bool,

    #[serde(default = "default_resilience_log_cap")]
    pub log_cap: usize,
}

fn default_pause_on_local_failure() -> bool {
    true
}

fn default_resilience_log_cap() -> usize {
    1000
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            pause_on_local_failure: default_pause_on_local_failure(),
            log_cap: default_resilience_log_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrency ceiling used until calibration has run.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// How long batch-mode analysis enqueues accumulate before dispatch.
    #[serde(default = "default_batch_debounce_ms")]
    pub batch_debounce_ms: u64,

    /// Upper bound on one batched analysis dispatch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Probes issued per concurrency level during calibration.
    #[serde(default = "default_probes_per_level")]
    pub probes_per_level: usize,
}

fn default_concurrency() -> usize {
    1
}

fn default_batch_debounce_ms() -> u64 {
    250
}

fn default_max_batch_size() -> usize {
    8
}

fn default_probes_per_level() -> usize {
    8
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            batch_debounce_ms: default_batch_debounce_ms(),
            max_batch_size: default_max_batch_size(),
            probes_per_level: default_probes_per_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "lumen_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let settings = Settings::default();
        assert_eq!(settings.queue.default_concurrency, 1);
        assert_eq!(settings.performance.vram_usage, MemoryMode::Balanced);
        assert!(!settings.performance.batch_mode);
        assert!(settings.resilience.pause_on_local_failure);
        assert_eq!(settings.resilience.log_cap, 1000);
    }

    #[test]
    fn local_defaults_route_everything_local() {
        let settings = Settings::with_local_defaults();
        assert_eq!(
            settings.routing.route(Capability::Vision),
            &[ProviderId::MoondreamLocal]
        );
        assert!(settings.routing.route(Capability::Animation).is_empty());
    }

    #[test]
    fn settings_deserialize_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [providers.moondream_local]
            endpoint = "http://localhost:2020/v1"
            tagging_model = "wd-vit-tagger-v3"

            [providers.gemini]
            api_key = "k"
            generation_model = "imagen-3"

            [routing]
            vision = ["moondream_local", "gemini"]
            generation = ["gemini", "moondream_local"]

            [performance]
            vram_usage = "low"
            batch_mode = true
            "#,
        )
        .unwrap();
        assert_eq!(
            settings.providers.moondream_local.endpoint.as_deref(),
            Some("http://localhost:2020/v1")
        );
        assert_eq!(settings.performance.vram_usage, MemoryMode::Low);
        assert!(settings.performance.batch_mode);
        assert_eq!(settings.routing.route(Capability::Vision).len(), 2);
        assert_eq!(settings.providers.moondream_local.timeout_secs, 120);
    }
}
