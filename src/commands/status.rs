use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::intake::config::load_config;
use crate::intake::lock::{daemon_lock_path, read_payload};
use crate::intake::paths::resolve_paths;
use crate::intake::state;
use crate::intake::store::{CaseStore, JsonCaseStore};
use crate::intake::util::pid_alive;

const ENV_PREFIX: &str = "CASE_INTAKE_";

mod allowlist {
    include!(concat!(env!("OUT_DIR"), "/intake_env_allowlist.rs"));
}

fn unknown_env_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = keys
        .into_iter()
        .filter(|k| k.starts_with(ENV_PREFIX))
        .filter(|k| !allowlist::GENERATED_INTAKE_ENV_ALLOWLIST.contains(&k.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("intake_home={}", paths.intake_home.display()));
    report.detail(format!("tables_dir={}", paths.tables_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    for key in unknown_env_keys(env::vars().map(|(k, _)| k)) {
        report.issue(format!("unknown environment variable {key} (typo?)"));
    }

    match load_config(&paths) {
        Ok(cfg) => {
            let pending = cfg.pending_index_path();
            let table_path = paths.table_file(&cfg.store.table);
            report.detail(format!("bucket_root={}", cfg.storage.bucket_root));
            report.detail(format!("locator_prefix={}", cfg.locator_prefix()));
            report.detail(format!("pending_index={}", pending.display()));
            report.detail(format!("case_table={}", table_path.display()));
            report.detail(format!(
                "watcher.poll_interval_secs={}",
                cfg.watcher.poll_interval_secs
            ));
            report.detail(format!(
                "watcher.error_backoff_secs={}",
                cfg.watcher.error_backoff_secs
            ));
            report.detail(format!(
                "pending_index.present={}",
                pending.is_file()
            ));

            match JsonCaseStore::open(table_path).list_cases() {
                Ok(cases) => report.detail(format!("case_table.cases={}", cases.len())),
                Err(err) => report.issue(format!("{} {err}", err.code().as_str())),
            }
        }
        Err(err) => report.issue(format!("{} {err}", err.code().as_str())),
    }

    let lock_path = daemon_lock_path(&paths);
    if lock_path.exists() {
        match read_payload(&lock_path) {
            Ok(payload) => {
                report.detail(format!("daemon.pid={}", payload.pid));
                report.detail(format!("daemon.start_time={}", payload.start_time));
                if pid_alive(payload.pid) {
                    report.detail("daemon.process=alive");
                } else {
                    report.issue("daemon.process=dead (stale lock)");
                }
                if payload.build_uuid == env!("BUILD_UUID") {
                    report.detail("daemon.build_match=ok");
                } else {
                    report.detail(format!(
                        "daemon.build_match=stale (lock={} current={})",
                        payload.build_uuid,
                        env!("BUILD_UUID")
                    ));
                }
            }
            Err(err) => report.issue(format!("daemon.lock=corrupt ({err:#})")),
        }
    } else {
        report.detail("daemon.lock=not_found");
    }

    match state::load(&paths) {
        Ok(status) => {
            report.detail(format!(
                "watcher.last_poll_epoch_secs={}",
                status.last_poll_epoch_secs
            ));
            report.detail(format!(
                "watcher.last_outcome={}",
                status.last_outcome.as_deref().unwrap_or("none")
            ));
            if let Some(err) = &status.last_error {
                report.detail(format!("watcher.last_error={err}"));
            }
            if let Some(merge) = &status.last_merge {
                report.detail(format!("watcher.last_merge={}", merge.summary()));
            }
            report.detail(format!(
                "watcher.total_processed={}",
                status.total_processed
            ));
            report.detail(format!(
                "watcher.consecutive_failures={}",
                status.consecutive_failures
            ));
        }
        Err(err) => report.issue(format!("watcher status unreadable: {err:#}")),
    }

    Ok(report)
}
