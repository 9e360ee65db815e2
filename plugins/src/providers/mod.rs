pub mod comfyui;
pub mod gemini;
pub mod grok;
pub mod moondream_cloud;
pub mod moondream_local;
pub mod openai;

pub use comfyui::ComfyuiProvider;
pub use gemini::GeminiProvider;
pub use grok::GrokProvider;
pub use moondream_cloud::MoondreamCloudProvider;
pub use moondream_local::MoondreamLocalProvider;
pub use openai::OpenaiProvider;
