//! Fail-fast step pipelines.
//!
//! A [`Step`] is a deferred fallible operation. Stages are built as lists of
//! steps and executed with [`run_steps`], which stops at the first failure
//! and names the stage in the returned error. Cancellation is observed only
//! between steps, never inside one.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::errors::SyncError;
use crate::git::{CommitOutcome, Repository};

/// A zero-argument fallible operation.
pub type Step<'a> = Box<dyn FnOnce() -> Result<(), SyncError> + 'a>;

/// Box a closure as a [`Step`].
pub fn step<'a, F>(f: F) -> Step<'a>
where
    F: FnOnce() -> Result<(), SyncError> + 'a,
{
    Box::new(f)
}

/// Run `steps` in order, stopping at the first failure.
///
/// The failure is wrapped as [`SyncError::SyncFailed`] for `stage` unless an
/// inner stage already claimed it. When `cancel` is set before a step starts,
/// the run stops with [`SyncError::Cancelled`].
pub fn run_steps(stage: &str, cancel: &AtomicBool, steps: Vec<Step<'_>>) -> Result<(), SyncError> {
    let total = steps.len();
    for (idx, step) in steps.into_iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            warn!(stage, "cancellation requested, stopping");
            return Err(SyncError::Cancelled);
        }
        if let Err(err) = step() {
            debug!(stage, step = idx + 1, total, "step failed");
            return Err(err.in_stage(stage));
        }
    }
    Ok(())
}

/// An ordered list of steps that behaves as a single step.
pub struct MultiStep<'a> {
    stage: String,
    cancel: &'a AtomicBool,
    steps: Vec<Step<'a>>,
}

impl<'a> MultiStep<'a> {
    pub fn new(stage: impl Into<String>, cancel: &'a AtomicBool, steps: Vec<Step<'a>>) -> Self {
        Self {
            stage: stage.into(),
            cancel,
            steps,
        }
    }

    pub fn run(self) -> Result<(), SyncError> {
        run_steps(&self.stage, self.cancel, self.steps)
    }

    pub fn into_step(self) -> Step<'a> {
        Box::new(move || self.run())
    }
}

/// `step` when `enabled`, otherwise a step that logs `notice` and succeeds.
pub fn guarded<'a>(enabled: bool, notice: impl Into<String>, step: Step<'a>) -> Step<'a> {
    if enabled {
        return step;
    }
    let notice = notice.into();
    Box::new(move || {
        info!("{}", notice);
        Ok(())
    })
}

/// Commit the working tree, then run `continuations`.
///
/// A clean working tree is not a failure: the step succeeds and the
/// continuations are skipped. The commit statistics come back with the commit
/// itself, so the only failures are the commit and the first failing
/// continuation, which stops the rest.
pub fn commit_changes<'a>(
    repo: &'a dyn Repository,
    message: &'a str,
    continuations: Vec<Step<'a>>,
) -> Step<'a> {
    Box::new(move || {
        info!(message, "committing changes");
        let commit = match repo.commit_changes(message)? {
            CommitOutcome::NothingToCommit => {
                info!("no changes to commit");
                return Ok(());
            }
            CommitOutcome::Committed(commit) => commit,
        };
        info!(%commit, "committed");

        for continuation in continuations {
            continuation()?;
        }
        Ok(())
    })
}
