use crate::error::IntakeError;
use crate::intake::util::write_atomically;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// One stored file of a case. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CaseFileEntry {
    pub file_path: String,
    pub upload_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    #[serde(rename = "CaseNumber")]
    pub case_id: String,
    #[serde(rename = "UserName", default)]
    pub submitter_name: String,
    #[serde(rename = "PhoneNumber", default)]
    pub phone_number: String,
    #[serde(rename = "Files", default)]
    pub files: Vec<CaseFileEntry>,
}

impl CaseRecord {
    pub fn empty(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            submitter_name: String::new(),
            phone_number: String::new(),
            files: Vec::new(),
        }
    }

    pub fn has_file(&self, file_path: &str) -> bool {
        self.files.iter().any(|f| f.file_path == file_path)
    }

    /// Append `entry` unless its path is already recorded. Metadata is only
    /// touched when the append happens.
    pub fn apply_append(
        &mut self,
        submitter_name: &str,
        phone_number: &str,
        entry: CaseFileEntry,
    ) -> bool {
        if self.has_file(&entry.file_path) {
            return false;
        }
        self.files.push(entry);
        self.submitter_name = submitter_name.to_string();
        self.phone_number = phone_number.to_string();
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub applied: bool,
}

/// Durable case id -> case record mapping.
pub trait CaseStore {
    fn get_case(&self, case_id: &str) -> Result<Option<CaseRecord>, IntakeError>;

    /// Read-modify-write that appends `entry` only when no entry with the same
    /// file path exists. On error the stored record is left as it was.
    fn append_file_if_absent(
        &self,
        case_id: &str,
        submitter_name: &str,
        phone_number: &str,
        entry: CaseFileEntry,
    ) -> Result<AppendOutcome, IntakeError>;

    fn list_cases(&self) -> Result<Vec<String>, IntakeError>;
}

type TableWriter = fn(&Path, &[u8]) -> anyhow::Result<()>;

/// Identity of the table file as last seen. Every write renames a fresh file
/// into place, so a write by another handle shows up as a new inode, mtime or
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TableStamp {
    inode: u64,
    modified_nanos: u128,
    len: u64,
}

#[derive(Debug)]
struct CachedTable {
    stamp: Option<TableStamp>,
    cases: BTreeMap<String, CaseRecord>,
}

/// Case table kept as one JSON object on disk, keyed by case id. The parsed
/// table is cached and only re-read when the file on disk changes.
#[derive(Debug)]
pub struct JsonCaseStore {
    table_path: PathBuf,
    lock_path: PathBuf,
    cache: Mutex<Option<CachedTable>>,
    writer: TableWriter,
}

struct TableLock(File);

impl Drop for TableLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn lock_path_for(table_path: &Path) -> PathBuf {
    let mut name = table_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    table_path.with_file_name(name)
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}

impl JsonCaseStore {
    pub fn open(table_path: impl Into<PathBuf>) -> Self {
        let table_path = table_path.into();
        Self {
            lock_path: lock_path_for(&table_path),
            table_path,
            cache: Mutex::new(None),
            writer: write_atomically,
        }
    }

    #[cfg(test)]
    fn with_writer(mut self, writer: TableWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<CachedTable>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_table(&self) -> Result<TableLock, IntakeError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                IntakeError::StoreWriteError(format!(
                    "failed to create {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|err| {
                IntakeError::StoreWriteError(format!(
                    "failed to open {}: {err}",
                    self.lock_path.display()
                ))
            })?;
        file.lock_exclusive().map_err(|err| {
            IntakeError::StoreWriteError(format!(
                "failed to lock {}: {err}",
                self.lock_path.display()
            ))
        })?;
        Ok(TableLock(file))
    }

    fn stamp(&self) -> Result<Option<TableStamp>, IntakeError> {
        let meta = match fs::metadata(&self.table_path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(IntakeError::StoreReadError(format!(
                    "failed to stat {}: {err}",
                    self.table_path.display()
                )));
            }
        };
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Some(TableStamp {
            inode: inode_of(&meta),
            modified_nanos,
            len: meta.len(),
        }))
    }

    fn read_table(&self) -> Result<BTreeMap<String, CaseRecord>, IntakeError> {
        let raw = match fs::read_to_string(&self.table_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(IntakeError::StoreReadError(format!(
                    "failed to read {}: {err}",
                    self.table_path.display()
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            IntakeError::StoreReadError(format!(
                "failed to parse {}: {err}",
                self.table_path.display()
            ))
        })
    }

    /// The cached table, reloaded first if the file changed since it was read.
    fn refreshed<'c>(
        &self,
        slot: &'c mut Option<CachedTable>,
    ) -> Result<&'c mut CachedTable, IntakeError> {
        let stamp = self.stamp()?;
        let fresh = slot.as_ref().is_some_and(|cached| cached.stamp == stamp);
        if !fresh {
            debug!(table = %self.table_path.display(), "loading case table");
            let cases = self.read_table()?;
            return Ok(slot.insert(CachedTable { stamp, cases }));
        }
        slot.as_mut().ok_or_else(|| {
            IntakeError::StoreReadError(format!(
                "case table cache for {} is empty",
                self.table_path.display()
            ))
        })
    }

    fn write_table(&self, table: &BTreeMap<String, CaseRecord>) -> Result<(), IntakeError> {
        let data = serde_json::to_string_pretty(table)
            .map_err(|err| IntakeError::StoreWriteError(err.to_string()))?;
        (self.writer)(&self.table_path, format!("{data}\n").as_bytes())
            .map_err(|err| IntakeError::StoreWriteError(format!("{err:#}")))
    }

    /// Runs with the cache mutex and the table lock held. The cached table may
    /// be left modified on error; the caller drops it then.
    fn append_locked(
        &self,
        slot: &mut Option<CachedTable>,
        case_id: &str,
        submitter_name: &str,
        phone_number: &str,
        entry: CaseFileEntry,
    ) -> Result<AppendOutcome, IntakeError> {
        let cached = self.refreshed(slot)?;
        let file_path = entry.file_path.clone();
        let record = cached
            .cases
            .entry(case_id.to_string())
            .or_insert_with(|| CaseRecord::empty(case_id));
        if !record.apply_append(submitter_name, phone_number, entry) {
            debug!(case_id, file_path = %file_path, "file already recorded");
            return Ok(AppendOutcome { applied: false });
        }

        self.write_table(&cached.cases)?;
        cached.stamp = self.stamp()?;
        Ok(AppendOutcome { applied: true })
    }
}

impl CaseStore for JsonCaseStore {
    fn get_case(&self, case_id: &str) -> Result<Option<CaseRecord>, IntakeError> {
        let mut slot = self.lock_cache();
        Ok(self.refreshed(&mut slot)?.cases.get(case_id).cloned())
    }

    fn append_file_if_absent(
        &self,
        case_id: &str,
        submitter_name: &str,
        phone_number: &str,
        entry: CaseFileEntry,
    ) -> Result<AppendOutcome, IntakeError> {
        let mut slot = self.lock_cache();
        let _on_disk = self.lock_table()?;

        let outcome = self.append_locked(&mut slot, case_id, submitter_name, phone_number, entry);
        if outcome.is_err() {
            *slot = None;
        }
        outcome
    }

    fn list_cases(&self) -> Result<Vec<String>, IntakeError> {
        let mut slot = self.lock_cache();
        Ok(self.refreshed(&mut slot)?.cases.keys().cloned().collect())
    }
}
