use crate::intake::merge::MergeReport;
use crate::intake::paths::IntakePaths;
use crate::intake::util::write_atomically;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Last known watcher activity, kept for `status`. The watcher itself never
/// reads its baseline marker back from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherStatus {
    pub schema_version: u32,
    pub last_poll_epoch_secs: u64,
    pub last_outcome: Option<String>,
    pub last_error: Option<String>,
    pub last_seen_marker: Option<String>,
    pub last_merge_epoch_secs: Option<u64>,
    pub last_merge: Option<MergeReport>,
    pub total_processed: u64,
    pub consecutive_failures: u64,
}

impl Default for WatcherStatus {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_poll_epoch_secs: 0,
            last_outcome: None,
            last_error: None,
            last_seen_marker: None,
            last_merge_epoch_secs: None,
            last_merge: None,
            total_processed: 0,
            consecutive_failures: 0,
        }
    }
}

pub fn state_file_path(paths: &IntakePaths) -> PathBuf {
    paths.state_dir.join("watcher_status.json")
}

pub fn load(paths: &IntakePaths) -> Result<WatcherStatus> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(WatcherStatus::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: WatcherStatus = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &IntakePaths, status: &WatcherStatus) -> Result<PathBuf> {
    let file = state_file_path(paths);
    let data = serde_json::to_string_pretty(status)?;
    write_atomically(&file, format!("{data}\n").as_bytes())?;
    Ok(file)
}
