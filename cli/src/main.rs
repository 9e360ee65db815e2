use clap::Parser;

mod cli;
mod commands;
mod engine;
mod output;

use lumen_core::api::{EngineError, LoggingConfig, ServiceError, Settings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, EngineError> {
    let args = cli::Args::parse();
    let cfg: Settings = match &args.config {
        Some(path) => lumen_core::config::load_from_path(path)
            .map_err(|e| EngineError::Config(e.to_string()))?,
        None => lumen_core::config::load_default()
            .map_err(|e| EngineError::Config(e.to_string()))?,
    };
    init_tracing(&cfg.logging).map_err(EngineError::Config)?;

    match args.command {
        cli::Commands::Analyze(analyze_args) => commands::analyze::run(analyze_args, cfg).await,
        cli::Commands::Generate(generate_args) => {
            commands::generate::run(generate_args, cfg).await
        }
        cli::Commands::Caption { image } => commands::single::caption(&image, cfg).await,
        cli::Commands::Tag { image } => commands::single::tag(&image, cfg).await,
        cli::Commands::Crop { image } => commands::single::crop(&image, cfg).await,
        cli::Commands::Calibrate(calibrate_args) => {
            commands::calibrate::run(calibrate_args, cfg).await
        }
        cli::Commands::Unload => commands::single::unload(cfg).await,
        cli::Commands::Providers(providers_args) => {
            commands::providers::run(providers_args, cfg).await
        }
    }
}

fn exit_code_for_error(e: &EngineError) -> i32 {
    // 0: success
    // 1: some work items failed (returned as a normal exit code)
    // 11: config error
    // 20: IO error
    // 30: every routed provider failed or none configured
    // 50: internal/uncategorized
    match e {
        EngineError::Config(_) => 11,
        EngineError::Io(_) => 20,
        EngineError::Service(se) => match se {
            ServiceError::NoProvidersRouted(_) | ServiceError::NotConfigured(_) => 11,
            ServiceError::FallbackChain(_) => 30,
        },
        EngineError::Anyhow(_) => 50,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("lumen"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("lumen.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
