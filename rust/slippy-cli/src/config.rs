//! Configuration file parsing for `slippy.toml`.
//!
//! Searches the current directory then its ancestors. A missing file means
//! defaults everywhere.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "slippy.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid toml in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct SlippyConfig {
    #[serde(default)]
    pub repl: ReplSection,
    #[serde(default)]
    pub machine: MachineSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReplSection {
    /// History file; `~/` is expanded against the home directory
    pub history_path: Option<String>,
    /// Print elapsed time after each evaluation
    #[serde(default = "default_true")]
    pub show_timing: bool,
}

impl Default for ReplSection {
    fn default() -> Self {
        Self { history_path: None, show_timing: true }
    }
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct MachineSection {
    /// Instruction budget per run; unlimited when absent
    pub max_steps: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl SlippyConfig {
    /// Load the nearest `slippy.toml`, or defaults when there is none.
    ///
    /// A file that exists but does not parse is reported on stderr and
    /// ignored.
    pub fn load() -> Self {
        match Self::find_and_load() {
            Some(Ok((_path, cfg))) => cfg,
            Some(Err(err)) => {
                tracing::warn!(%err, "ignoring configuration");
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    fn find_and_load() -> Option<Result<(PathBuf, Self), ConfigError>> {
        let dir = std::env::current_dir().ok()?;
        let path = find_config(&dir)?;
        Some(Self::load_from(&path).map(|cfg| (path, cfg)))
    }
}

/// Walk from `start` towards the root looking for `slippy.toml`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
