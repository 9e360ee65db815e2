use std::path::{Path, PathBuf};

use super::types::Settings;

/// Get the default lumen data directory: ~/.lumen
pub fn get_lumen_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".lumen"))
}

pub fn load_default() -> anyhow::Result<Settings> {
    // Priority 1: ~/.lumen/config.toml (highest)
    let lumen_dir = get_lumen_data_dir()?;
    let lumen_config = lumen_dir.join("config.toml");

    // Priority 2: ./config.toml (current directory)
    let local_config = Path::new("config.toml");

    let mut cfg: Settings = if lumen_config.exists() {
        let s = std::fs::read_to_string(&lumen_config)?;
        toml::from_str::<Settings>(&s)?
    } else if local_config.exists() {
        let s = std::fs::read_to_string(local_config)?;
        toml::from_str::<Settings>(&s)?
    } else {
        Settings::with_local_defaults()
    };

    // Update logging directory to use lumen data directory if not set
    if cfg
        .logging
        .directory
        .as_deref()
        .map(str::trim)
        .map(str::is_empty)
        .unwrap_or(true)
    {
        let logs_dir = lumen_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;
        cfg.logging.directory = Some(logs_dir.to_string_lossy().to_string());
    }

    apply_env_overrides(&mut cfg);

    Ok(cfg)
}

/// Environment variable overrides (highest priority).
fn apply_env_overrides(cfg: &mut Settings) {
    if let Ok(v) = std::env::var("LUMEN_LOCAL_ENDPOINT") {
        if !v.trim().is_empty() {
            cfg.providers.moondream_local.endpoint = Some(v);
        }
    }
    if let Ok(v) = std::env::var("LUMEN_MOONDREAM_API_KEY") {
        if !v.trim().is_empty() {
            cfg.providers.moondream_cloud.api_key = Some(v);
        }
    }
    if let Ok(v) = std::env::var("LUMEN_GEMINI_API_KEY") {
        if !v.trim().is_empty() {
            cfg.providers.gemini.api_key = Some(v);
        }
    }
    if let Ok(v) = std::env::var("LUMEN_OPENAI_API_KEY") {
        if !v.trim().is_empty() {
            cfg.providers.openai.api_key = Some(v);
        }
    }
    if let Ok(v) = std::env::var("LUMEN_GROK_API_KEY") {
        if !v.trim().is_empty() {
            cfg.providers.grok.api_key = Some(v);
        }
    }
}

/// Load settings from an explicit path, bypassing discovery.
pub fn load_from_path(path: &Path) -> anyhow::Result<Settings> {
    let s = std::fs::read_to_string(path)?;
    let mut cfg = toml::from_str::<Settings>(&s)?;
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_from_path_parses_routing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [providers.moondream_local]
            endpoint = "http://127.0.0.1:2020/v1"

            [routing]
            vision = ["moondream_local"]
            "#
        )
        .unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert!(cfg
            .routing
            .is_routed(crate::capability::Capability::Vision));
    }

    #[test]
    fn load_from_path_rejects_unknown_provider_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [routing]
            vision = ["definitely_not_a_provider"]
            "#
        )
        .unwrap();
        assert!(load_from_path(file.path()).is_err());
    }
}
