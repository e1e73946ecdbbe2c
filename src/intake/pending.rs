use crate::error::IntakeError;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

/// One upload as written into the pending index by an upload front end.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionRecord {
    #[serde(rename = "name", default, deserialize_with = "null_as_empty")]
    pub submitter_name: String,
    #[serde(rename = "phone", default, deserialize_with = "null_as_empty")]
    pub phone_number: String,
    #[serde(rename = "file", default)]
    pub file_name: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl SubmissionRecord {
    pub fn attached_file(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Snapshot of the pending index, cases kept in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingIndex {
    pub cases: Vec<(String, Vec<SubmissionRecord>)>,
}

impl PendingIndex {
    pub fn parse(raw: &str) -> Result<Self, IntakeError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let root: Value = serde_json::from_str(raw)
            .map_err(|err| IntakeError::InvalidIndexFormat(err.to_string()))?;
        let Value::Object(map) = root else {
            return Err(IntakeError::InvalidIndexFormat(
                "top level must be an object keyed by case number".to_string(),
            ));
        };

        let mut cases = Vec::with_capacity(map.len());
        for (case_id, records) in map {
            let records: Vec<SubmissionRecord> = serde_json::from_value(records).map_err(|err| {
                IntakeError::InvalidIndexFormat(format!("case {case_id}: {err}"))
            })?;
            cases.push((case_id, records));
        }
        Ok(Self { cases })
    }

    pub fn record_count(&self) -> usize {
        self.cases.iter().map(|(_, records)| records.len()).sum()
    }
}

/// Opaque change token for the pending index resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeMarker(String);

impl ChangeMarker {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChangeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait PendingIndexSource {
    /// Current change marker, or `None` when the resource does not exist.
    fn marker(&self) -> Result<Option<ChangeMarker>, IntakeError>;

    /// Full snapshot. A missing resource reads as an empty index.
    fn load(&self) -> Result<PendingIndex, IntakeError>;

    fn describe(&self) -> String;
}

/// Pending index stored as a JSON file inside the bucket directory.
#[derive(Debug, Clone)]
pub struct FsPendingIndex {
    path: PathBuf,
}

impl FsPendingIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PendingIndexSource for FsPendingIndex {
    fn marker(&self) -> Result<Option<ChangeMarker>, IntakeError> {
        let meta = match fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(IntakeError::SourceUnavailable(format!(
                    "failed to stat {}: {err}",
                    self.path.display()
                )));
            }
        };
        if !meta.is_file() {
            return Ok(None);
        }
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Some(ChangeMarker::new(format!(
            "{modified_nanos}:{}",
            meta.len()
        ))))
    }

    fn load(&self) -> Result<PendingIndex, IntakeError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => PendingIndex::parse(&raw),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PendingIndex::default()),
            Err(err) => Err(IntakeError::InvalidIndexFormat(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
