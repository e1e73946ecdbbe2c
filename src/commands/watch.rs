use anyhow::{Context, Result};
use tracing::info;

use crate::commands::CommandReport;
use crate::intake::scheduler::ShutdownSignal;
use crate::intake::watcher;

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    if opts.daemon {
        let shutdown = ShutdownSignal::new();
        let handler_signal = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("shutdown requested");
            handler_signal.request();
        })
        .context("failed to install shutdown handler")?;

        watcher::run_daemon(&shutdown)?;
        report.detail("watcher daemon stopped");
        return Ok(report);
    }

    let cycle = watcher::run_once()?;
    report.detail("watch cycle completed");
    report.detail(format!("pending_index={}", cycle.pending_index));
    report.detail(format!("case_table={}", cycle.case_table));
    report.detail(format!("state_file={}", cycle.state_file));
    report.detail(format!("poll_interval_secs={}", cycle.poll_interval_secs));
    report.detail(format!("error_backoff_secs={}", cycle.error_backoff_secs));
    report.detail(format!("outcome={}", cycle.outcome));
    if let Some(marker) = &cycle.marker {
        report.detail(format!("marker={marker}"));
    }
    if let Some(merge) = &cycle.merge {
        report.detail(format!("merge.cases={}", merge.cases_seen));
        report.detail(format!("merge.processed={}", merge.processed));
        report.detail(format!("merge.skipped={}", merge.skipped));
        report.detail(format!("merge.unsupported={}", merge.unsupported));
        report.detail(format!("merge.without_file={}", merge.without_file));
        report.detail(format!("merge.failed={}", merge.failed));
        if merge.failed > 0 {
            report.issue(format!(
                "{} case update(s) failed; they will be retried on the next poll",
                merge.failed
            ));
        }
    }
    if let Some(error) = cycle.error {
        report.issue(format!("poll failed: {error}"));
    }

    Ok(report)
}
