//! Declarative configuration loading
//!
//! The probe tree is described in a YAML file discovered across a small set
//! of search directories (working directory, user config dir, /etc/ph),
//! overridable from the CLI with `--config-path` / `--config-name`.

use std::path::{Path, PathBuf};

use crate::core::provider::ComponentMap;

pub const DEFAULT_CONFIG_NAME: &str = "platform-health";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file {name}.yaml (or .yml) found in {searched:?}")]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Aggregator identifier used for delegation loop detection.
    /// Defaults to `<hostname>:<port>` when unset.
    pub id: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub components: ComponentMap,
}

impl Config {
    /// Directories searched when the CLI does not name any.
    pub fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ph"));
        }
        paths.push(PathBuf::from("/etc/ph"));
        paths
    }

    /// Load the first `name`.yaml / `name`.yml found across `search_paths`.
    /// Entries that point directly at a file are loaded as-is.
    pub fn load(search_paths: &[PathBuf], name: &str) -> Result<(Config, PathBuf), ConfigError> {
        for entry in search_paths {
            if entry.is_file() {
                return Self::load_file(entry).map(|config| (config, entry.clone()));
            }
            for ext in ["yaml", "yml"] {
                let candidate = entry.join(format!("{name}.{ext}"));
                if candidate.is_file() {
                    return Self::load_file(&candidate).map(|config| (config, candidate));
                }
            }
        }
        Err(ConfigError::NotFound {
            name: name.to_string(),
            searched: search_paths.to_vec(),
        })
    }

    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
