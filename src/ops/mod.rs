//! Batch operations over one [`crate::session::Session`].
//!
//! Each operation enumerates resources, applies a rule, optionally mutates
//! through the shared executor and returns a [`RunReport`] holding one row
//! per processed item. Per-item failures become rows; only scope and
//! top-level listing failures abort a run.

mod assign;
mod audit;
mod create;
mod prune;
mod schedule;

use serde::Serialize;
use thiserror::Error;

use crate::provider::{CloudProvider, ProviderError};
use crate::retention::RetentionError;
use crate::retry::{Jitter, MutationOutcome, Sleeper};
use crate::session::{Session, SessionError};

pub use assign::{AssignRow, AssignStatus, assign_policy};
pub use audit::{AuditFilter, AuditRequest, AuditRow, AuditStatus, FreshnessRule, audit_backups};
pub use create::{CreatePlan, CreateRow, CreateRun, CreateStatus, create_backups};
pub use prune::{PruneAction, PruneMode, PruneRow, prune_by_age, prune_by_count};
pub use schedule::{ScheduleRow, ScheduleStatus, next_full_hour, reschedule_policy};

/// Errors that abort an operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpsError {
    /// Enumeration failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The retention rule cannot be applied.
    #[error(transparent)]
    Retention(#[from] RetentionError),
    /// No backup policy matches the requested name.
    #[error("backup policy '{name}' not found")]
    PolicyNotFound {
        /// Requested policy name or id.
        name: String,
    },
    /// The worker pool size is zero.
    #[error("workers must be at least 1")]
    NoWorkers,
}

/// How a processed item counts towards the run tally.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RowOutcome {
    /// Item handled successfully.
    Succeeded,
    /// Item failed or needs attention.
    Failed,
    /// Item deliberately left alone.
    Skipped,
}

/// A fixed-schema report row.
pub trait ReportRow: Serialize {
    /// Contribution of this row to the tally.
    fn outcome(&self) -> RowOutcome;
}

/// Counts of processed items by outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Tally {
    /// Items handled successfully.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items deliberately left alone.
    pub skipped: usize,
}

impl Tally {
    /// Adds one item.
    pub const fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Succeeded => self.succeeded = self.succeeded.saturating_add(1),
            RowOutcome::Failed => self.failed = self.failed.saturating_add(1),
            RowOutcome::Skipped => self.skipped = self.skipped.saturating_add(1),
        }
    }

    /// Total items recorded.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }
}

/// Append-only rows of one run plus their tally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport<R> {
    rows: Vec<R>,
    tally: Tally,
}

impl<R> Default for RunReport<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            tally: Tally::default(),
        }
    }
}

impl<R: ReportRow> RunReport<R> {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row and updates the tally.
    pub fn push(&mut self, row: R) {
        self.tally.record(row.outcome());
        self.rows.push(row);
    }

    /// Appends every row of `other`.
    pub fn extend(&mut self, other: Self) {
        for row in other.rows {
            self.push(row);
        }
    }

    /// Rows in the order they were recorded.
    #[must_use]
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Counts by outcome.
    #[must_use]
    pub const fn tally(&self) -> Tally {
        self.tally
    }

    /// Returns `true` when any row failed.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.tally.failed > 0
    }
}

/// Region and compartment columns shared by every row.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Scope {
    /// Region the item lives in.
    pub region: String,
    /// Compartment name.
    pub compartment: String,
}

impl Scope {
    fn of<P, S, J>(session: &Session<P, S, J>) -> Self
    where
        P: CloudProvider,
        S: Sleeper,
        J: Jitter,
    {
        Self {
            region: session.region().to_owned(),
            compartment: session.compartment().name.clone(),
        }
    }
}

/// Attempts and error text extracted from a finished mutation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct Attempted {
    attempts: u32,
    error: Option<String>,
}

impl Attempted {
    fn of<T>(outcome: &MutationOutcome<T>) -> Self {
        Self {
            attempts: outcome.attempts(),
            error: outcome.error().map(ProviderError::to_string),
        }
    }
}
