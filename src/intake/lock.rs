use crate::error::IntakeError;
use crate::intake::paths::IntakePaths;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const DAEMON_LOCK_FILE: &str = "intake-watch.daemon.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonLockPayload {
    pub pid: u32,
    pub build_uuid: String,
    pub start_time: String,
}

/// Exclusive hold on the watcher daemon slot. Released on drop.
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
}

pub fn daemon_lock_path(paths: &IntakePaths) -> PathBuf {
    paths.logs_dir.join(DAEMON_LOCK_FILE)
}

pub fn read_payload(path: &Path) -> Result<DaemonLockPayload> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(raw.trim())
        .with_context(|| format!("daemon lock {} is corrupt", path.display()))
}

impl DaemonLock {
    pub fn acquire(paths: &IntakePaths) -> Result<Self, IntakeError> {
        let path = daemon_lock_path(paths);
        let locked = |msg: String| IntakeError::DaemonLocked(msg);
        fs::create_dir_all(&paths.logs_dir).map_err(|err| {
            locked(format!("failed to create {}: {err}", paths.logs_dir.display()))
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| locked(format!("failed to open {}: {err}", path.display())))?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_payload(&path)
                .map(|p| format!("pid {}", p.pid))
                .unwrap_or_else(|_| "unknown pid".to_string());
            return Err(locked(format!("{} is held by {holder}", path.display())));
        }

        let payload = DaemonLockPayload {
            pid: std::process::id(),
            build_uuid: env!("BUILD_UUID").to_string(),
            start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let body = serde_json::to_string(&payload)
            .map_err(|err| locked(format!("failed to encode lock payload: {err}")))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(format!("{body}\n").as_bytes()))
            .and_then(|_| file.sync_all())
            .map_err(|err| locked(format!("failed to write {}: {err}", path.display())))?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}
