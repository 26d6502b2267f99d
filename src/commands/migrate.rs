use anyhow::Result;
use chrono::Utc;

use crate::commands::CommandReport;
use crate::engine::audit;
use crate::engine::config::{MigrationMode, load_config};
use crate::engine::identity::ClockIdentitySource;
use crate::engine::lock::{self, LockAttempt};
use crate::engine::paths::{AppPaths, resolve_paths};
use crate::engine::pipeline::{self, RunOptions, RunOutcome, Stage, StageObserver};
use crate::engine::state;
use crate::engine::util::now_epoch_secs;
use crate::error::{ErrorCode, MigrationError, StoreError};
use crate::store::open_store;
use crate::store::retry::RetryingStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    pub dry_run: bool,
    pub copy_only: bool,
}

/// Mirrors every stage boundary into the audit log. An audit write failure
/// never aborts a run that has already started mutating the store.
struct AuditObserver<'a> {
    paths: &'a AppPaths,
    run_id: &'a str,
}

impl AuditObserver<'_> {
    fn append(&self, phase: &str, status: &str, message: &str) {
        if let Err(err) = audit::append_event(self.paths, self.run_id, phase, status, message) {
            tracing::warn!(error = %err, phase, "audit append failed");
        }
    }
}

impl StageObserver for AuditObserver<'_> {
    fn completed(&mut self, stage: Stage, summary: &str) {
        self.append(stage.as_str(), "ok", summary);
    }

    fn failed(&mut self, stage: Stage, error: &StoreError) {
        self.append(stage.as_str(), "failed", &error.to_string());
    }
}

fn new_run_id() -> String {
    format!(
        "run-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
        std::process::id()
    )
}

pub fn run(opts: &MigrateOptions) -> Result<CommandReport> {
    let name = if opts.dry_run { "migrate-dry-run" } else { "migrate" };
    let (report, _) = execute(name, opts)?;
    Ok(report)
}

/// Shared by `migrate` and `plan`. Returns the outcome when the pipeline ran
/// to completion so callers can add their own detail lines.
pub fn execute(name: &str, opts: &MigrateOptions) -> Result<(CommandReport, Option<RunOutcome>)> {
    let mut report = CommandReport::new(name);

    let mut cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("{}: {err:#}", ErrorCode::E002ConfigInvalid.as_str()));
            return Ok((report, None));
        }
    };
    if opts.copy_only {
        cfg.migration.mode = MigrationMode::CopyOnly;
    }

    let paths = resolve_paths()?;
    let run_lock = match lock::try_acquire(&paths)? {
        LockAttempt::Acquired(lock) => lock,
        LockAttempt::Busy(path) => {
            report.issue(format!(
                "{}: another run holds {}",
                ErrorCode::E001Locked.as_str(),
                path.display()
            ));
            return Ok((report, None));
        }
    };

    let run_id = new_run_id();
    let store = RetryingStore::new(open_store(&cfg.store)?, cfg.retry);
    let mut identities = ClockIdentitySource::default();
    let mut observer = AuditObserver {
        paths: &paths,
        run_id: &run_id,
    };
    let started = now_epoch_secs()?;
    observer.append(
        "run",
        "started",
        &format!("mode={} dry_run={}", cfg.migration.mode.as_str(), opts.dry_run),
    );

    report.detail(format!("run_id={run_id}"));
    report.detail(format!("mode={}", cfg.migration.mode.as_str()));
    report.detail(format!("dry_run={}", opts.dry_run));
    report.detail(format!("lock_file={}", run_lock.path.display()));

    let result = pipeline::run(
        &store,
        &cfg,
        RunOptions {
            dry_run: opts.dry_run,
        },
        &mut identities,
        &mut observer,
    );

    match &result {
        Ok(outcome) => {
            describe_outcome(&mut report, outcome);
            observer.append("run", "completed", &summary_line(outcome));
        }
        Err(err) => {
            describe_failure(&mut report, err);
            observer.append("run", "aborted", &err.to_string());
        }
    }

    if !opts.dry_run {
        let state_file = record_state(&paths, &run_id, started, &result)?;
        report.detail(format!("state_file={}", state_file.display()));
    }

    Ok((report, result.ok()))
}

fn summary_line(outcome: &RunOutcome) -> String {
    let c = &outcome.counts;
    format!(
        "classified={} copied={} already_present={} deleted={} retained={}",
        c.classified, c.copied, c.already_present, c.deleted, c.retained
    )
}

fn describe_outcome(report: &mut CommandReport, outcome: &RunOutcome) {
    let c = &outcome.counts;
    report.detail(format!("classified={}", c.classified));
    report.detail(format!("no_match={}", c.no_match));
    report.detail(format!("identities_assigned={}", c.identities_assigned));
    if outcome.dry_run {
        report.detail(format!("planned_copies={}", c.planned_copies));
        report.detail(format!("delete_candidates={}", c.delete_candidates));
    }
    report.detail(format!("copied={}", c.copied));
    report.detail(format!("already_present={}", c.already_present));
    report.detail(format!("verified={}", c.verified));
    report.detail(format!("deleted={}", c.deleted));
    report.detail(format!("retained={}", c.retained));
    if !outcome.created_destinations.is_empty() {
        report.detail(format!(
            "created_destinations={}",
            outcome.created_destinations.join(",")
        ));
    }
    for retained in &outcome.retained {
        report.detail(format!(
            "retained.record={}:{} identity={} reason={}",
            retained.source_collection,
            retained.source_position,
            retained.identity,
            retained.reason.as_str()
        ));
    }
    report.detail(format!(
        "last_completed_stage={}",
        outcome.last_completed.map(Stage::as_str).unwrap_or("none")
    ));
}

fn describe_failure(report: &mut CommandReport, err: &MigrationError) {
    report.detail(format!("failed_stage={}", err.stage));
    report.detail(format!(
        "last_completed_stage={}",
        err.last_completed.map(Stage::as_str).unwrap_or("none")
    ));
    report.issue(format!("{}: {err}", err.source.code().as_str()));
}

fn record_state(
    paths: &AppPaths,
    run_id: &str,
    started: u64,
    result: &Result<RunOutcome, MigrationError>,
) -> Result<std::path::PathBuf> {
    let mut run_state = state::load(paths)?;
    run_state.last_run_id = Some(run_id.to_string());
    run_state.last_started_epoch_secs = Some(started);
    run_state.last_finished_epoch_secs = Some(now_epoch_secs()?);
    run_state.total_runs += 1;
    match result {
        Ok(outcome) => {
            run_state.last_status = Some("completed".into());
            run_state.last_completed_stage = outcome.last_completed.map(|s| s.as_str().to_string());
            run_state.last_counts = Some(outcome.counts);
            run_state.last_error = None;
            run_state.total_copied += outcome.counts.copied as u64;
            run_state.total_deleted += outcome.counts.deleted as u64;
        }
        Err(err) => {
            run_state.last_status = Some("aborted".into());
            run_state.last_completed_stage = err.last_completed.map(|s| s.as_str().to_string());
            run_state.last_counts = None;
            run_state.last_error = Some(err.to_string());
        }
    }
    state::save(paths, &run_state)
}
