//! JSON configuration, loaded once at startup by the platform glue.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::scheduler::GroupRecallConfig;

/// Field names mirror the legacy config file, which used camelCase keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// SQLite database path.
    pub database_path: String,
    /// Directory downloaded images are stored under. The engine only
    /// passes filenames around; the glue joins them to this directory.
    pub image_dir: PathBuf,
    /// Groups the bot reacts in. Empty means no restriction.
    #[serde(default)]
    pub enabled_groups: Vec<i64>,
    /// Allow "tag image to <nickname>" (as opposed to mention-only).
    #[serde(default = "default_true")]
    pub allow_tag_by_name: bool,
    /// Allow users to bind their own nickname via command.
    #[serde(default = "default_true")]
    pub allow_bind_command: bool,
    /// Groups with random recall enabled, with per-group pool sizes.
    #[serde(default)]
    pub random_recall: Vec<GroupRecallConfig>,
    /// Recall cache capacity, in messages.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    4096
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
