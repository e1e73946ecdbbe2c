use crate::error::IntakeError;
use crate::intake::pending::PendingIndexSource;
use crate::intake::router::StorageRouter;
use crate::intake::store::{CaseFileEntry, CaseStore};
use crate::intake::util::{Clock, iso_timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeReport {
    pub cases_seen: usize,
    /// New file entries appended to a case record.
    pub processed: usize,
    /// Files already present on their case record.
    pub skipped: usize,
    pub unsupported: usize,
    pub without_file: usize,
    pub failed: usize,
}

impl MergeReport {
    pub fn summary(&self) -> String {
        format!(
            "cases={} processed={} skipped={} unsupported={} without_file={} failed={}",
            self.cases_seen,
            self.processed,
            self.skipped,
            self.unsupported,
            self.without_file,
            self.failed
        )
    }
}

/// Folds a pending index snapshot into the case store.
pub struct MergeEngine<'a> {
    source: &'a dyn PendingIndexSource,
    store: &'a dyn CaseStore,
    router: &'a StorageRouter,
    clock: &'a dyn Clock,
}

impl<'a> MergeEngine<'a> {
    pub fn new(
        source: &'a dyn PendingIndexSource,
        store: &'a dyn CaseStore,
        router: &'a StorageRouter,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            source,
            store,
            router,
            clock,
        }
    }

    /// Re-reads the whole pending index and appends every routable file that
    /// its case does not already hold. Only an unreadable index fails the run;
    /// per-record problems are counted and logged.
    pub fn merge_all(&self) -> Result<MergeReport, IntakeError> {
        let index = self.source.load()?;
        debug!(
            cases = index.cases.len(),
            records = index.record_count(),
            "loaded pending index"
        );
        let mut report = MergeReport {
            cases_seen: index.cases.len(),
            ..MergeReport::default()
        };

        for (case_id, records) in &index.cases {
            for record in records {
                let Some(file_name) = record.attached_file() else {
                    report.without_file += 1;
                    continue;
                };

                let placement = match self.router.classify(file_name) {
                    Ok(placement) => placement,
                    Err(err) => {
                        report.unsupported += 1;
                        warn!(case_id = %case_id, code = err.code().as_str(), "{err}, skipping");
                        continue;
                    }
                };

                let category = placement.category;
                let entry = CaseFileEntry {
                    file_path: placement.destination_path,
                    upload_timestamp: iso_timestamp(self.clock.now()),
                };
                let file_path = entry.file_path.clone();

                match self.store.append_file_if_absent(
                    case_id,
                    &record.submitter_name,
                    &record.phone_number,
                    entry,
                ) {
                    Ok(outcome) if outcome.applied => {
                        report.processed += 1;
                        info!(
                            case_id = %case_id,
                            file_path = %file_path,
                            category = category.as_str(),
                            "appended case file"
                        );
                    }
                    Ok(_) => report.skipped += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            case_id = %case_id,
                            file_path = %file_path,
                            code = err.code().as_str(),
                            "case update failed: {err}"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}
