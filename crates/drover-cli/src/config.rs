//! Configuration file management.
//!
//! TOML config at `~/.config/drover/config.toml` with the resolution
//! chain: CLI flag > env var > config file > built-in default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Built-in default backend.
const DEFAULT_BACKEND: &str = "claude-code";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: DefaultsSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Backend adapter used when neither flag nor env var names one.
    pub backend: Option<String>,
    /// Model override applied by default.
    pub model: Option<String>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// The drover config directory: `$XDG_CONFIG_HOME/drover` or
/// `~/.config/drover`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("drover");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("drover")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file; a missing file is an empty config.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config {}", path.display()));
        }
    };
    toml::from_str(&contents).with_context(|| format!("failed to parse config {}", path.display()))
}

/// Write a fresh config file (the `drover init` command).
pub fn init_config(backend: &str, force: bool) -> Result<()> {
    let path = config_path();
    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let config = ConfigFile {
        defaults: DefaultsSection {
            backend: Some(backend.to_string()),
            model: None,
        },
    };
    std::fs::create_dir_all(config_dir())
        .with_context(|| format!("failed to create {}", config_dir().display()))?;
    std::fs::write(&path, toml::to_string_pretty(&config)?)
        .with_context(|| format!("failed to write {}", path.display()))?;

    println!("wrote {}", path.display());
    Ok(())
}

// -----------------------------------------------------------------------
// Resolution chain
// -----------------------------------------------------------------------

/// Resolve the backend name: flag > `DROVER_BACKEND` > config > default.
pub fn resolve_backend(flag: Option<String>, config: &ConfigFile) -> String {
    flag.or_else(|| std::env::var("DROVER_BACKEND").ok())
        .or_else(|| config.defaults.backend.clone())
        .unwrap_or_else(|| DEFAULT_BACKEND.to_string())
}

/// Resolve the model override: flag > `DROVER_MODEL` > config > none.
pub fn resolve_model(flag: Option<String>, config: &ConfigFile) -> Option<String> {
    flag.or_else(|| std::env::var("DROVER_MODEL").ok())
        .or_else(|| config.defaults.model.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_config() {
        let config = ConfigFile {
            defaults: DefaultsSection {
                backend: Some("copilot".into()),
                model: Some("m1".into()),
            },
        };
        assert_eq!(
            resolve_backend(Some("claude-code".into()), &config),
            "claude-code"
        );
        assert_eq!(resolve_model(Some("m2".into()), &config).as_deref(), Some("m2"));
    }

    #[test]
    fn config_wins_over_default() {
        let config = ConfigFile {
            defaults: DefaultsSection {
                backend: Some("copilot".into()),
                model: None,
            },
        };
        assert_eq!(resolve_backend(None, &config), "copilot");
    }

    #[test]
    fn built_in_default_backend() {
        assert_eq!(resolve_backend(None, &ConfigFile::default()), "claude-code");
    }

    #[test]
    fn config_file_parses_partial_toml() {
        let config: ConfigFile = toml::from_str("[defaults]\nbackend = \"copilot\"\n").unwrap();
        assert_eq!(config.defaults.backend.as_deref(), Some("copilot"));
        assert!(config.defaults.model.is_none());
    }

    #[test]
    fn empty_toml_is_a_valid_config() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.defaults.backend.is_none());
    }
}
