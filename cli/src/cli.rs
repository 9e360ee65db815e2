use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lumen",
    version,
    about = "Dispatch AI inference work (captioning, tagging, generation) across providers"
)]
pub struct Args {
    /// Explicit config file; defaults to ~/.lumen/config.toml then ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze images through the routed vision providers.
    Analyze(AnalyzeArgs),
    /// Generate images from a prompt.
    Generate(GenerateArgs),
    /// Caption a single image.
    Caption {
        image: PathBuf,
    },
    /// Tag a single image.
    Tag {
        image: PathBuf,
    },
    /// Detect the main subject of an image (smart-crop center point).
    Crop {
        image: PathBuf,
    },
    /// Probe the local backend for the highest safe concurrency.
    Calibrate(CalibrateArgs),
    /// Ask the local backend to release cached models and free VRAM.
    Unload,
    /// Show provider configuration, or test connections.
    Providers(ProvidersArgs),
}

#[derive(ClapArgs, Debug)]
pub struct AnalyzeArgs {
    /// Image paths or glob patterns.
    #[arg(required = true)]
    pub patterns: Vec<String>,

    /// Accumulate analysis work into batched calls.
    #[arg(long)]
    pub batch: bool,

    /// Dispatch priority; higher runs first.
    #[arg(long, default_value_t = 0)]
    pub priority: i32,

    /// Re-run images whose previous analysis failed.
    #[arg(long)]
    pub retry: bool,

    /// Print the resilience log after the run.
    #[arg(long)]
    pub show_log: bool,
}

#[derive(ClapArgs, Debug)]
pub struct GenerateArgs {
    pub prompt: String,

    /// Number of images to generate.
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// Aspect ratio: 1:1, 16:9, 9:16, or 21:9.
    #[arg(long, default_value = "1:1")]
    pub aspect: String,

    /// Output directory for generated images.
    #[arg(long, default_value = "lumen-out")]
    pub out: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct CalibrateArgs {
    /// Probes per concurrency level.
    #[arg(long)]
    pub probes: Option<usize>,
}

#[derive(ClapArgs, Debug)]
pub struct ProvidersArgs {
    /// Test connectivity of every configured provider.
    #[arg(long)]
    pub test: bool,
}
