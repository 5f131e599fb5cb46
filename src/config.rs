use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_max_connects() -> usize {
    10
}

fn default_batch_window_ms() -> u64 {
    2
}

/// Global configuration loaded from `~/.config/fetchmux/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Concurrency ceiling for dispatched job batches. 0 = unbounded.
    #[serde(default = "default_max_connects")]
    pub max_connects: usize,
    /// Batching window in milliseconds before a scheduler driver is elected.
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Advisory HTTP multiplexing preference passed to the engine.
    #[serde(default)]
    pub pipelining: bool,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            max_connects: default_max_connects(),
            batch_window_ms: default_batch_window_ms(),
            pipelining: false,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchmux")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MuxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MuxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: MuxConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = MuxConfig::default();
        assert_eq!(cfg.max_connects, 10);
        assert_eq!(cfg.batch_window_ms, 2);
        assert!(!cfg.pipelining);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MuxConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MuxConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_connects, cfg.max_connects);
        assert_eq!(parsed.batch_window_ms, cfg.batch_window_ms);
        assert_eq!(parsed.pipelining, cfg.pipelining);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_connects = 4
            batch_window_ms = 5
            pipelining = true
        "#;
        let cfg: MuxConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_connects, 4);
        assert_eq!(cfg.batch_window_ms, 5);
        assert!(cfg.pipelining);
    }

    #[test]
    fn config_toml_partial_uses_defaults() {
        let toml = "max_connects = 32";
        let cfg: MuxConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_connects, 32);
        assert_eq!(cfg.batch_window_ms, 2);
        assert!(!cfg.pipelining);
    }
}
