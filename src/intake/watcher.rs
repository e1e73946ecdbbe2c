use crate::error::IntakeError;
use crate::intake::audit;
use crate::intake::config::{IntakeConfig, load_config};
use crate::intake::lock::DaemonLock;
use crate::intake::merge::{MergeEngine, MergeReport};
use crate::intake::paths::{IntakePaths, resolve_paths};
use crate::intake::pending::{ChangeMarker, FsPendingIndex, PendingIndexSource};
use crate::intake::router::StorageRouter;
use crate::intake::scheduler::{Pacer, PollSchedule, ShutdownSignal, TickHealth, run_periodic};
use crate::intake::state::{self, WatcherStatus};
use crate::intake::store::{CaseStore, JsonCaseStore};
use crate::intake::util::{Clock, SystemClock, now_epoch_secs};
use anyhow::Result;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    ChangeDetected {
        marker: ChangeMarker,
        report: MergeReport,
    },
    NoChange,
    SourceUnavailable,
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChangeDetected { .. } => "change-detected",
            Self::NoChange => "no-change",
            Self::SourceUnavailable => "source-unavailable",
        }
    }
}

/// Watches the pending index and merges it whenever its marker moves.
pub struct ChangeWatcher<P, S, C> {
    source: P,
    store: S,
    router: StorageRouter,
    clock: C,
    last_seen_marker: Option<ChangeMarker>,
}

impl<P, S, C> ChangeWatcher<P, S, C>
where
    P: PendingIndexSource,
    S: CaseStore,
    C: Clock,
{
    pub fn new(source: P, store: S, router: StorageRouter, clock: C) -> Self {
        Self {
            source,
            store,
            router,
            clock,
            last_seen_marker: None,
        }
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn last_seen_marker(&self) -> Option<&ChangeMarker> {
        self.last_seen_marker.as_ref()
    }

    /// The baseline only advances after a merge that read the index and
    /// stored every record, so failed records are retried on the next poll.
    pub fn poll_once(&mut self) -> Result<PollOutcome, IntakeError> {
        let Some(marker) = self.source.marker()? else {
            warn!(source = %self.source.describe(), "pending index not found");
            return Ok(PollOutcome::SourceUnavailable);
        };

        if self.last_seen_marker.as_ref() == Some(&marker) {
            return Ok(PollOutcome::NoChange);
        }

        info!(source = %self.source.describe(), marker = %marker, "pending index changed, merging");
        let report =
            MergeEngine::new(&self.source, &self.store, &self.router, &self.clock).merge_all()?;
        if report.failed == 0 {
            self.last_seen_marker = Some(marker.clone());
        } else {
            warn!(failed = report.failed, "keeping previous baseline so failed records are retried");
        }
        Ok(PollOutcome::ChangeDetected { marker, report })
    }
}

pub type FsChangeWatcher = ChangeWatcher<FsPendingIndex, JsonCaseStore, SystemClock>;

pub fn build_watcher(paths: &IntakePaths, cfg: &IntakeConfig) -> FsChangeWatcher {
    ChangeWatcher::new(
        FsPendingIndex::new(cfg.pending_index_path()),
        JsonCaseStore::open(paths.table_file(&cfg.store.table)),
        StorageRouter::new(cfg.locator_prefix()),
        SystemClock,
    )
}

#[derive(Debug, Clone)]
pub struct WatchCycleOutcome {
    pub state_file: String,
    pub pending_index: String,
    pub case_table: String,
    pub poll_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub outcome: String,
    pub marker: Option<String>,
    pub merge: Option<MergeReport>,
    pub error: Option<String>,
}

/// Fold one poll result into the status snapshot and the audit log. Merges
/// are always audited; a missing source or a poll error only when it differs
/// from the previous poll, so an idle watcher does not grow the log.
fn record_poll(
    paths: &IntakePaths,
    status: &mut WatcherStatus,
    result: &Result<PollOutcome, IntakeError>,
) -> Result<TickHealth> {
    let now = now_epoch_secs()?;
    status.last_poll_epoch_secs = now;
    let previous_outcome = status.last_outcome.take();
    let previous_error = status.last_error.take();

    let health = match result {
        Ok(PollOutcome::ChangeDetected { marker, report }) => {
            status.last_outcome = Some("change-detected".to_string());
            status.last_merge_epoch_secs = Some(now);
            status.last_merge = Some(report.clone());
            status.total_processed += report.processed as u64;
            let clean = report.failed == 0;
            if clean {
                status.last_seen_marker = Some(marker.as_str().to_string());
                status.consecutive_failures = 0;
            } else {
                status.consecutive_failures += 1;
            }
            audit::append_event(
                paths,
                "merge",
                if clean { "ok" } else { "degraded" },
                &format!("marker={marker} {}", report.summary()),
            )?;
            if clean {
                TickHealth::Healthy
            } else {
                TickHealth::Degraded
            }
        }
        Ok(PollOutcome::NoChange) => {
            status.last_outcome = Some("no-change".to_string());
            status.consecutive_failures = 0;
            TickHealth::Healthy
        }
        Ok(PollOutcome::SourceUnavailable) => {
            status.last_outcome = Some("source-unavailable".to_string());
            status.consecutive_failures += 1;
            if previous_outcome != status.last_outcome {
                audit::append_event(paths, "poll", "degraded", "pending index not found")?;
            }
            TickHealth::Degraded
        }
        Err(err) => {
            status.last_outcome = Some("error".to_string());
            status.last_error = Some(format!("{} {err}", err.code().as_str()));
            status.consecutive_failures += 1;
            if previous_error != status.last_error {
                audit::append_event(
                    paths,
                    "poll",
                    "failed",
                    &format!("code={} error={err}", err.code().as_str()),
                )?;
            }
            TickHealth::Degraded
        }
    };

    Ok(health)
}

pub fn run_once() -> Result<WatchCycleOutcome> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut watcher = build_watcher(&paths, &cfg);
    let mut status = state::load(&paths).unwrap_or_else(|err| {
        warn!("discarding unreadable watcher status: {err:#}");
        WatcherStatus::default()
    });

    let result = watcher.poll_once();
    record_poll(&paths, &mut status, &result)?;
    let file = state::save(&paths, &status)?;

    let (outcome, marker, merge, error) = match result {
        Ok(PollOutcome::ChangeDetected { marker, report }) => (
            "change-detected".to_string(),
            Some(marker.to_string()),
            Some(report),
            None,
        ),
        Ok(other) => (other.label().to_string(), None, None, None),
        Err(err) => (
            "error".to_string(),
            None,
            None,
            Some(format!("{} {err}", err.code().as_str())),
        ),
    };

    Ok(WatchCycleOutcome {
        state_file: file.display().to_string(),
        pending_index: watcher.source().describe(),
        case_table: watcher.store().table_path().display().to_string(),
        poll_interval_secs: cfg.watcher.poll_interval_secs,
        error_backoff_secs: cfg.watcher.error_backoff_secs,
        outcome,
        marker,
        merge,
        error,
    })
}

/// One daemon tick: poll, fold the result into `status`, persist it. Failures
/// are logged and only turn the tick degraded.
fn daemon_tick<P, S, C>(
    paths: &IntakePaths,
    watcher: &mut ChangeWatcher<P, S, C>,
    status: &mut WatcherStatus,
) -> TickHealth
where
    P: PendingIndexSource,
    S: CaseStore,
    C: Clock,
{
    let result = watcher.poll_once();
    if let Err(err) = &result {
        warn!(code = err.code().as_str(), "poll failed: {err}");
    }
    let health = match record_poll(paths, status, &result) {
        Ok(health) => health,
        Err(err) => {
            warn!("failed to record poll: {err:#}");
            TickHealth::Degraded
        }
    };
    if let Err(err) = state::save(paths, status) {
        warn!("failed to save watcher status: {err:#}");
    }
    health
}

pub fn run_watch_loop<P, S, C>(
    paths: &IntakePaths,
    watcher: &mut ChangeWatcher<P, S, C>,
    status: &mut WatcherStatus,
    schedule: &PollSchedule,
    pacer: &dyn Pacer,
) -> usize
where
    P: PendingIndexSource,
    S: CaseStore,
    C: Clock,
{
    run_periodic(schedule, pacer, || {
        daemon_tick(paths, &mut *watcher, &mut *status)
    })
}

/// Poll until `shutdown` is raised. Only startup problems (configuration,
/// daemon lock) end this early; per-cycle failures only stretch the wait.
pub fn run_daemon(shutdown: &ShutdownSignal) -> Result<()> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let lock = DaemonLock::acquire(&paths)?;
    let schedule = PollSchedule::from_config(&cfg.watcher);
    let mut watcher = build_watcher(&paths, &cfg);
    let mut status = state::load(&paths).unwrap_or_default();

    info!(
        pending_index = %watcher.source().describe(),
        case_table = %watcher.store().table_path().display(),
        locator_prefix = %watcher.router.locator_prefix(),
        lock = %lock.path().display(),
        "watcher daemon started"
    );
    audit::append_event(
        &paths,
        "daemon",
        "started",
        &format!("pid={} poll_interval_secs={}", std::process::id(), cfg.watcher.poll_interval_secs),
    )?;

    let ticks = run_watch_loop(&paths, &mut watcher, &mut status, &schedule, shutdown);

    info!(ticks, "watcher daemon stopping");
    audit::append_event(&paths, "daemon", "stopped", &format!("ticks={ticks}"))?;
    drop(lock);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::pending::testing::ScriptedSource;
    use crate::intake::scheduler::testing::RecordingPacer;
    use crate::intake::store::testing::MemoryCaseStore;
    use std::time::Duration;
    use crate::intake::util::testing::SteppingClock;
    use tempfile::tempdir;

    type TestWatcher = ChangeWatcher<ScriptedSource, MemoryCaseStore, SteppingClock>;

    fn watcher() -> TestWatcher {
        ChangeWatcher::new(
            ScriptedSource::default(),
            MemoryCaseStore::default(),
            StorageRouter::new("s3://attendance"),
            SteppingClock::starting_at(1_700_000_000),
        )
    }

    const ONE_UPLOAD: &str = r#"{"100200": [{"name":"Jo","phone":"555","file":"a.jpg"}]}"#;

    #[test]
    fn absent_source_is_reported_without_moving_baseline() {
        let mut w = watcher();
        assert_eq!(w.poll_once().expect("poll"), PollOutcome::SourceUnavailable);
        assert!(w.last_seen_marker().is_none());

        w.source().publish("m1", ONE_UPLOAD);
        w.poll_once().expect("poll");
        w.source().remove();
        assert_eq!(w.poll_once().expect("poll"), PollOutcome::SourceUnavailable);
        assert_eq!(w.last_seen_marker(), Some(&ChangeMarker::new("m1")));
    }

    #[test]
    fn merges_once_per_marker() {
        let mut w = watcher();
        w.source().publish("m1", ONE_UPLOAD);

        match w.poll_once().expect("first poll") {
            PollOutcome::ChangeDetected { marker, report } => {
                assert_eq!(marker, ChangeMarker::new("m1"));
                assert_eq!(report.processed, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(w.poll_once().expect("second poll"), PollOutcome::NoChange);

        let record = w.store().get_case("100200").expect("get").expect("record");
        assert_eq!(record.files[0].file_path, "s3://attendance/Images/a.jpg");
    }

    #[test]
    fn touched_but_identical_index_merges_with_zero_processed() {
        let mut w = watcher();
        w.source().publish("m1", ONE_UPLOAD);
        w.poll_once().expect("first poll");
        let before = w.store().snapshot();

        w.source().publish("m2", ONE_UPLOAD);
        match w.poll_once().expect("second poll") {
            PollOutcome::ChangeDetected { report, .. } => {
                assert_eq!(report.processed, 0);
                assert_eq!(report.skipped, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(w.store().snapshot(), before);
    }

    #[test]
    fn invalid_index_keeps_previous_baseline_and_retries() {
        let mut w = watcher();
        w.source().publish("m1", ONE_UPLOAD);
        w.poll_once().expect("first poll");

        w.source().publish("m2", "{\"100200\": ");
        let err = w.poll_once().expect_err("invalid");
        assert!(matches!(err, IntakeError::InvalidIndexFormat(_)));
        assert_eq!(w.last_seen_marker(), Some(&ChangeMarker::new("m1")));

        let err = w.poll_once().expect_err("still invalid");
        assert!(matches!(err, IntakeError::InvalidIndexFormat(_)));

        w.source().publish(
            "m3",
            r#"{"100200": [{"name":"Jo","phone":"555","file":"a.jpg"},
                           {"name":"Jo","phone":"555","file":"b.pdf"}]}"#,
        );
        match w.poll_once().expect("recovered") {
            PollOutcome::ChangeDetected { report, .. } => assert_eq!(report.processed, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(w.last_seen_marker(), Some(&ChangeMarker::new("m3")));
    }

    #[test]
    fn failed_records_hold_the_baseline_until_stored() {
        let mut w = watcher();
        w.store().fail_writes_for("100200");
        w.source().publish("m1", ONE_UPLOAD);

        match w.poll_once().expect("poll") {
            PollOutcome::ChangeDetected { report, .. } => assert_eq!(report.failed, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(w.last_seen_marker().is_none());
        assert!(w.store().get_case("100200").expect("get").is_none());

        w.store().heal();
        match w.poll_once().expect("retry") {
            PollOutcome::ChangeDetected { report, .. } => assert_eq!(report.processed, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(w.last_seen_marker(), Some(&ChangeMarker::new("m1")));
        assert_eq!(w.poll_once().expect("settled"), PollOutcome::NoChange);
    }

    #[test]
    fn record_poll_tracks_failures_and_totals() {
        let tmp = tempdir().expect("tempdir");
        let paths = IntakePaths::under(tmp.path().join("home"));
        let mut status = WatcherStatus::default();

        let health = record_poll(&paths, &mut status, &Ok(PollOutcome::SourceUnavailable))
            .expect("record");
        assert_eq!(health, TickHealth::Degraded);
        assert_eq!(status.consecutive_failures, 1);

        let err = Err(IntakeError::InvalidIndexFormat("eof".into()));
        assert_eq!(
            record_poll(&paths, &mut status, &err).expect("record"),
            TickHealth::Degraded
        );
        assert_eq!(status.consecutive_failures, 2);
        assert!(
            status
                .last_error
                .as_deref()
                .is_some_and(|e| e.starts_with("E002_INVALID_INDEX"))
        );

        let merged = Ok(PollOutcome::ChangeDetected {
            marker: ChangeMarker::new("m1"),
            report: MergeReport {
                processed: 2,
                ..MergeReport::default()
            },
        });
        assert_eq!(
            record_poll(&paths, &mut status, &merged).expect("record"),
            TickHealth::Healthy
        );
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_processed, 2);
        assert_eq!(status.last_seen_marker.as_deref(), Some("m1"));

        let log = std::fs::read_to_string(audit::audit_log_path(&paths)).expect("audit");
        assert_eq!(log.lines().count(), 3);
    }

    #[test]
    fn repeated_idle_polls_are_audited_once() {
        let tmp = tempdir().expect("tempdir");
        let paths = IntakePaths::under(tmp.path().join("home"));
        let mut status = WatcherStatus::default();

        for _ in 0..5 {
            record_poll(&paths, &mut status, &Ok(PollOutcome::SourceUnavailable))
                .expect("record");
        }
        let err = || Err(IntakeError::InvalidIndexFormat("eof".into()));
        record_poll(&paths, &mut status, &err()).expect("record");
        record_poll(&paths, &mut status, &err()).expect("record");
        record_poll(&paths, &mut status, &Ok(PollOutcome::SourceUnavailable)).expect("record");

        assert_eq!(status.consecutive_failures, 8);
        let log = std::fs::read_to_string(audit::audit_log_path(&paths)).expect("audit");
        assert_eq!(log.lines().count(), 3);
    }

    #[test]
    fn watch_loop_merges_then_settles_on_the_poll_interval() {
        let tmp = tempdir().expect("tempdir");
        let paths = IntakePaths::under(tmp.path().join("home"));
        let mut w = watcher();
        w.source().publish("m1", ONE_UPLOAD);
        let mut status = WatcherStatus::default();
        let schedule = PollSchedule::from_config(&Default::default());
        let pacer = RecordingPacer::with_budget(3);

        let ticks = run_watch_loop(&paths, &mut w, &mut status, &schedule, &pacer);

        assert_eq!(ticks, 3);
        assert_eq!(pacer.delays(), vec![Duration::from_secs(30); 3]);
        let saved = state::load(&paths).expect("status saved each tick");
        assert_eq!(saved.last_outcome.as_deref(), Some("no-change"));
        assert_eq!(saved.total_processed, 1);
        assert_eq!(saved.last_seen_marker.as_deref(), Some("m1"));
        assert_eq!(w.store().snapshot()["100200"].files.len(), 1);
    }

    #[test]
    fn watch_loop_backs_off_while_records_fail() {
        let tmp = tempdir().expect("tempdir");
        let paths = IntakePaths::under(tmp.path().join("home"));
        let mut w = watcher();
        w.store().fail_writes_for("100200");
        w.source().publish("m1", ONE_UPLOAD);
        let mut status = WatcherStatus::default();
        let schedule = PollSchedule::from_config(&Default::default());
        let pacer = RecordingPacer::with_budget(2);

        run_watch_loop(&paths, &mut w, &mut status, &schedule, &pacer);

        assert_eq!(pacer.delays(), vec![Duration::from_secs(60); 2]);
        let saved = state::load(&paths).expect("status");
        assert_eq!(saved.consecutive_failures, 2);
        assert!(saved.last_seen_marker.is_none());
        assert!(w.last_seen_marker().is_none());
    }
}
