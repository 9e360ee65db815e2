pub mod load;
pub mod types;

pub use load::{get_lumen_data_dir, load_default, load_from_path};
pub use types::{
    ComfyuiConfig, GeminiConfig, GrokConfig, LoggingConfig, MemoryMode, MoondreamCloudConfig,
    MoondreamLocalConfig, OpenaiConfig, PerformanceConfig, ProvidersConfig, QueueConfig,
    ResilienceConfig, Settings,
};
