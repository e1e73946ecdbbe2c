use crate::error::IntakeError;
use crate::intake::paths::IntakePaths;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_PENDING_INDEX_KEY: &str = "info/attendance_data.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket_root: String,
    pub locator_prefix: String,
    pub pending_index_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket_root: String::new(),
            locator_prefix: String::new(),
            pending_index_key: DEFAULT_PENDING_INDEX_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            error_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntakeConfig {
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub watcher: WatcherConfig,
}

impl IntakeConfig {
    pub fn pending_index_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.bucket_root).join(&self.storage.pending_index_key)
    }

    /// Locator prefix used for stored file paths; falls back to the bucket root.
    pub fn locator_prefix(&self) -> &str {
        if self.storage.locator_prefix.trim().is_empty() {
            &self.storage.bucket_root
        } else {
            &self.storage.locator_prefix
        }
    }

    pub fn validate(&self) -> Result<(), IntakeError> {
        if self.storage.bucket_root.trim().is_empty() {
            return Err(config_error(
                "bucket root is required (storage.bucket_root or CASE_INTAKE_BUCKET_ROOT)",
            ));
        }
        let key = self.storage.pending_index_key.trim();
        if key.is_empty() || key.ends_with('/') {
            return Err(config_error(
                "pending index key must name a file under the bucket root",
            ));
        }
        if PathBuf::from(key).is_absolute() {
            return Err(config_error(
                "pending index key must be relative to the bucket root",
            ));
        }
        let table = self.store.table.trim();
        if table.is_empty() {
            return Err(config_error(
                "case table is required (store.table or CASE_INTAKE_TABLE)",
            ));
        }
        if !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            || table.starts_with('.')
        {
            return Err(config_error(format!(
                "invalid case table name `{table}`: use letters, digits, `_`, `-` or `.`"
            )));
        }
        if self.watcher.poll_interval_secs == 0 {
            return Err(config_error(
                "invalid watcher poll interval: must be >= 1 second",
            ));
        }
        if self.watcher.error_backoff_secs == 0 {
            return Err(config_error(
                "invalid watcher error backoff: must be >= 1 second",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialIntakeConfig {
    storage: Option<StorageConfig>,
    store: Option<StoreConfig>,
    watcher: Option<WatcherConfig>,
}

fn config_error(message: impl Into<String>) -> IntakeError {
    IntakeError::ConfigurationError(message.into())
}

fn env_or_u64(var: &str, fallback: u64) -> Result<u64, IntakeError> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<u64>()
            .map_err(|_| config_error(format!("{var} must be a whole number of seconds"))),
        _ => Ok(fallback),
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn resolve_config_path(paths: &IntakePaths) -> PathBuf {
    if let Ok(custom) = env::var("CASE_INTAKE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    paths.intake_home.join("intake.toml")
}

fn merge_file_config(base: &mut IntakeConfig, raw: &str) -> Result<(), toml::de::Error> {
    let parsed: PartialIntakeConfig = toml::from_str(raw)?;
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    if let Some(store) = parsed.store {
        base.store = store;
    }
    if let Some(watcher) = parsed.watcher {
        base.watcher = watcher;
    }
    Ok(())
}

/// Build the effective configuration: defaults, then the TOML file, then
/// `CASE_INTAKE_*` environment overrides. Fails fast on missing required fields.
pub fn load_config(paths: &IntakePaths) -> Result<IntakeConfig, IntakeError> {
    let mut cfg = IntakeConfig::default();

    let path = resolve_config_path(paths);
    if path.exists() {
        let raw = fs::read_to_string(&path)
            .map_err(|err| config_error(format!("failed to read {}: {err}", path.display())))?;
        merge_file_config(&mut cfg, &raw)
            .map_err(|err| config_error(format!("failed to parse {}: {err}", path.display())))?;
    }

    cfg.storage.bucket_root = env_or_string("CASE_INTAKE_BUCKET_ROOT", &cfg.storage.bucket_root);
    cfg.storage.locator_prefix =
        env_or_string("CASE_INTAKE_LOCATOR_PREFIX", &cfg.storage.locator_prefix);
    cfg.storage.pending_index_key = env_or_string(
        "CASE_INTAKE_PENDING_INDEX_KEY",
        &cfg.storage.pending_index_key,
    );
    cfg.store.table = env_or_string("CASE_INTAKE_TABLE", &cfg.store.table);
    cfg.watcher.poll_interval_secs = env_or_u64(
        "CASE_INTAKE_POLL_INTERVAL_SECS",
        cfg.watcher.poll_interval_secs,
    )?;
    cfg.watcher.error_backoff_secs = env_or_u64(
        "CASE_INTAKE_ERROR_BACKOFF_SECS",
        cfg.watcher.error_backoff_secs,
    )?;

    cfg.validate()?;
    Ok(cfg)
}
