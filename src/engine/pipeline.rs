//! One batch pass: snapshot, plan, provision, identity flush, copy, verify
//! and delete, strictly in that order. Any store failure aborts the pass.
//! Deletion is last and gated on verification, so an abort never loses a
//! record.

use crate::engine::config::MigrationConfig;
use crate::engine::identity::{self, IdentitySource};
use crate::engine::planner::{self, MigrationPlanItem};
use crate::engine::snapshot;
use crate::engine::verify::{self, RetainedRecord};
use crate::engine::{copy, delete, provision};
use crate::error::{MigrationError, StoreError};
use crate::store::TabularStore;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Snapshot,
    Plan,
    Provision,
    IdentityFlush,
    Copy,
    Verify,
    Delete,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Plan => "plan",
            Self::Provision => "provision",
            Self::IdentityFlush => "identity-flush",
            Self::Copy => "copy",
            Self::Verify => "verify",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub classified: usize,
    pub no_match: usize,
    pub identities_assigned: usize,
    pub planned_copies: usize,
    pub already_present: usize,
    pub copied: usize,
    pub delete_candidates: usize,
    pub verified: usize,
    pub deleted: usize,
    pub retained: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub dry_run: bool,
    pub counts: RunCounts,
    pub items: Vec<MigrationPlanItem>,
    pub retained: Vec<RetainedRecord>,
    pub created_destinations: Vec<String>,
    pub last_completed: Option<Stage>,
}

/// Notified at every stage boundary.
pub trait StageObserver {
    fn completed(&mut self, stage: Stage, summary: &str);
    fn failed(&mut self, stage: Stage, error: &StoreError);
}

#[cfg(test)]
pub struct NoopObserver;

#[cfg(test)]

impl StageObserver for NoopObserver {
    fn completed(&mut self, _stage: Stage, _summary: &str) {}
    fn failed(&mut self, _stage: Stage, _error: &StoreError) {}
}

struct Progress<'o> {
    last_completed: Option<Stage>,
    observer: &'o mut dyn StageObserver,
}

impl Progress<'_> {
    fn run<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, MigrationError> {
        match f() {
            Ok(value) => Ok(value),
            Err(source) => {
                tracing::error!(
                    stage = stage.as_str(),
                    error = %source,
                    "stage failed, aborting run"
                );
                self.observer.failed(stage, &source);
                Err(MigrationError {
                    stage,
                    last_completed: self.last_completed,
                    source,
                })
            }
        }
    }

    fn done(&mut self, stage: Stage, summary: String) {
        tracing::info!(stage = stage.as_str(), "{summary}");
        self.observer.completed(stage, &summary);
        self.last_completed = Some(stage);
    }
}

pub fn run<S: TabularStore + ?Sized>(
    store: &S,
    cfg: &MigrationConfig,
    opts: RunOptions,
    identities: &mut dyn IdentitySource,
    observer: &mut dyn StageObserver,
) -> Result<RunOutcome, MigrationError> {
    let settings = &cfg.migration;
    let mut progress = Progress {
        last_completed: None,
        observer,
    };
    let mut counts = RunCounts::default();

    let snap = progress.run(Stage::Snapshot, || snapshot::take(store, cfg))?;
    progress.done(
        Stage::Snapshot,
        format!(
            "records={}",
            snap.sources.iter().map(|s| s.records.len()).sum::<usize>()
        ),
    );

    let plan = planner::plan(cfg, &snap, identities);
    counts.classified = plan.classified;
    counts.no_match = plan.no_match;
    counts.identities_assigned = plan.identity_writes.len();
    counts.planned_copies = plan.copy_count();
    counts.already_present = plan.already_present;
    counts.delete_candidates = plan.delete_candidates.len();
    counts.retained = plan.duplicates.len();
    progress.done(
        Stage::Plan,
        format!(
            "classified={} no_match={} copies={} already_present={} duplicates={} \
             delete_candidates={}",
            counts.classified,
            counts.no_match,
            counts.planned_copies,
            counts.already_present,
            plan.duplicates.len(),
            counts.delete_candidates
        ),
    );

    let mut outcome = RunOutcome {
        dry_run: opts.dry_run,
        counts,
        items: plan.items.clone(),
        retained: plan.duplicates.clone(),
        created_destinations: Vec::new(),
        last_completed: progress.last_completed,
    };
    if opts.dry_run {
        return Ok(outcome);
    }

    let created = progress.run(Stage::Provision, || {
        provision::ensure_destinations(store, cfg, &plan, &snap)
    })?;
    progress.done(Stage::Provision, format!("created={}", created.len()));

    progress.run(Stage::IdentityFlush, || {
        identity::flush(store, &plan.identity_writes, settings.identity_column)
    })?;
    progress.done(
        Stage::IdentityFlush,
        format!("written={}", plan.identity_writes.len()),
    );

    // Destinations created above change the grid sizes the copy batch relies on.
    let metas = if created.is_empty() {
        snap.metas.clone()
    } else {
        progress.run(Stage::Copy, || store.collections())?
    };
    let copies = plan.copies().collect::<Vec<_>>();
    outcome.counts.copied = progress.run(Stage::Copy, || {
        copy::commit(store, &copies, &metas, settings.identity_column)
    })?;
    progress.done(Stage::Copy, format!("copied={}", outcome.counts.copied));
    outcome.created_destinations = created;

    let candidates = plan.delete_candidate_items();
    if !candidates.is_empty() {
        let verification = progress.run(Stage::Verify, || {
            verify::verify(store, settings, &metas, &candidates)
        })?;
        outcome.counts.verified = verification.admitted.len();
        progress.done(
            Stage::Verify,
            format!(
                "admitted={} retained={}",
                verification.admitted.len(),
                verification.retained.len()
            ),
        );
        outcome.retained.extend(verification.retained);

        let deletion = progress.run(Stage::Delete, || {
            delete::commit_verified(store, settings, &metas, verification.admitted)
        })?;
        outcome.counts.deleted = deletion.deleted;
        outcome.retained.extend(deletion.retained);
        progress.done(Stage::Delete, format!("deleted={}", outcome.counts.deleted));
    }
    outcome.counts.retained = outcome.retained.len();

    outcome.last_completed = progress.last_completed;
    Ok(outcome)
}
