use anyhow::Result;

use crate::commands::CommandReport;
use crate::intake::config::load_config;
use crate::intake::paths::resolve_paths;
use crate::intake::store::{CaseStore, JsonCaseStore};

pub fn run(case_id: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("case");
    let case_id = case_id.trim();
    if case_id.is_empty() {
        report.issue("case id must not be empty");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let cfg = match load_config(&paths) {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("{} {err}", err.code().as_str()));
            return Ok(report);
        }
    };

    let store = JsonCaseStore::open(paths.table_file(&cfg.store.table));
    report.detail(format!("case_table={}", store.table_path().display()));

    match store.get_case(case_id) {
        Ok(Some(record)) => {
            report.detail(format!("case_id={}", record.case_id));
            report.detail(format!("submitter_name={}", record.submitter_name));
            report.detail(format!("phone_number={}", record.phone_number));
            report.detail(format!("files={}", record.files.len()));
            for entry in &record.files {
                report.detail(format!(
                    "file={} uploaded={}",
                    entry.file_path, entry.upload_timestamp
                ));
            }
        }
        Ok(None) => report.issue(format!("case {case_id} not found")),
        Err(err) => report.issue(format!("{} {err}", err.code().as_str())),
    }

    Ok(report)
}
