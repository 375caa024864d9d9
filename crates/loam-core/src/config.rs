use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TASK_RETENTION_SECS: u64 = 3600;

fn default_task_retention_secs() -> u64 {
    DEFAULT_TASK_RETENTION_SECS
}

/// User configuration, read from `~/.config/loam/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoamConfig {
    /// Store directory. Falls back to `~/.local/share/loam`.
    pub store: Option<PathBuf>,
    /// How long a long-lived `Engine` keeps settled task records. The CLI
    /// keeps task records in memory for a single command, so it never evicts.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
    /// Log filter used when `LOAM_LOG` is unset.
    pub log: Option<String>,
}

impl Default for LoamConfig {
    fn default() -> Self {
        Self {
            store: None,
            task_retention_secs: DEFAULT_TASK_RETENTION_SECS,
            log: None,
        }
    }
}

fn home() -> Result<PathBuf, CoreError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CoreError::Config("HOME not set".to_owned()))
}

impl LoamConfig {
    /// Load `~/.config/loam/config.toml`. A missing file yields the defaults.
    pub fn load_default() -> Result<Self, CoreError> {
        let path = Self::default_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))
    }

    pub fn default_path() -> Result<PathBuf, CoreError> {
        Ok(home()?.join(".config/loam/config.toml"))
    }

    /// Configured store directory, or `~/.local/share/loam`.
    pub fn store_root(&self) -> Result<PathBuf, CoreError> {
        match &self.store {
            Some(path) => Ok(path.clone()),
            None => Ok(home()?.join(".local/share/loam")),
        }
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}
