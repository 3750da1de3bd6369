// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runner configuration, stored as RON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "runner.ron";

/// Error reading the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {path:?}: {source}")]
    Io {
        /// Configuration file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// File is not valid RON for [`RunnerConfig`]
    #[error("Invalid configuration {path:?}: {source}")]
    Parse {
        /// Configuration file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Runner settings. Every field has a default, so partial files are fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Graph document run when none is given on the command line
    pub graph: Option<PathBuf>,
    /// Print the loaded document to stdout before running
    pub dump_document: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,dataflow_graph=info".to_string(),
            graph: None,
            dump_document: false,
        }
    }
}

impl RunnerConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a configuration file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::load_or_default(&dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, RunnerConfig::default());
        assert!(matches!(
            RunnerConfig::load(&dir.path().join("absent.ron")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.ron");
        std::fs::write(&path, r#"(dump_document: true, graph: Some("pipeline.json"))"#).unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert!(config.dump_document);
        assert_eq!(config.graph, Some(PathBuf::from("pipeline.json")));
        assert_eq!(config.log_filter, RunnerConfig::default().log_filter);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.ron");
        std::fs::write(&path, "(dump_document: maybe)").unwrap();
        assert!(matches!(RunnerConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_ron_round_trip() {
        let config = RunnerConfig {
            log_filter: "debug".to_string(),
            graph: Some(PathBuf::from("g.json")),
            dump_document: true,
        };
        let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default()).unwrap();
        let parsed: RunnerConfig = ron::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
