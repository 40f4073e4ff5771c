use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::types::VoxConfig;
use crate::error::{Result, VoxError};

/// Environment variable overriding the listening port
pub const PORT_ENV: &str = "VOXCODE_PORT";

/// Environment variable overriding the listening host
pub const HOST_ENV: &str = "VOXCODE_HOST";

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "voxcode", "voxcode") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".voxcode").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values,
/// then apply environment overrides and validate.
pub fn load_config(config_path: Option<&Path>) -> Result<VoxConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        parse_config(&content)?
    } else if config_path.is_some() {
        return Err(VoxError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    } else {
        // Return defaults if no config file exists
        VoxConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}

pub fn parse_config(content: &str) -> Result<VoxConfig> {
    toml::from_str(content).map_err(|e| VoxError::TomlParse(e.to_string()))
}

/// Apply `VOXCODE_*` overrides. The lookup is injected so tests need not touch the process env.
pub fn apply_env_overrides<F>(config: &mut VoxConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup(PORT_ENV) {
        config.server.port = port
            .trim()
            .parse()
            .map_err(|_| VoxError::Config(format!("Invalid {}: {}", PORT_ENV, port)))?;
    }
    if let Some(host) = lookup(HOST_ENV) {
        config.server.host = host;
    }
    Ok(())
}
