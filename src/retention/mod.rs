//! Retention evaluation over the backups of one volume.
//!
//! Evaluators are pure: they partition observed records into retained and
//! deletion candidates and never call the provider.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::backup::BackupRecord;

/// Errors raised when building a retention rule.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RetentionError {
    /// Raised when the age window does not fit in the calendar.
    #[error("retention window of {days} days is out of range")]
    WindowOutOfRange {
        /// Requested window.
        days: u32,
    },
}

/// How a volume's matching backups relate to the retention count.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FloorClass {
    /// No matching backups; nothing to do.
    Empty,
    /// Fewer matching backups than the retention count.
    BelowFloor,
    /// Exactly the retention count.
    AtFloor,
    /// More than the retention count; the excess are candidates.
    AboveFloor,
}

/// Keeps the newest `keep` AVAILABLE backups whose name contains `keyword`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountRetention {
    keyword: String,
    keep: usize,
}

/// Partition produced by [`CountRetention::evaluate`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CountEvaluation {
    /// Matching backups kept, newest first.
    pub retained: Vec<BackupRecord>,
    /// Matching backups to delete, newest first.
    pub candidates: Vec<BackupRecord>,
    /// Relation of the matching set to the retention count.
    pub class: FloorClass,
}

impl CountRetention {
    /// Creates a count rule.
    #[must_use]
    pub fn new(keyword: impl Into<String>, keep: usize) -> Self {
        Self {
            keyword: keyword.into(),
            keep,
        }
    }

    /// Name fragment a backup must contain to be managed.
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Number of backups kept per volume.
    #[must_use]
    pub const fn keep(&self) -> usize {
        self.keep
    }

    /// Evaluates the backups of a single volume.
    ///
    /// Records that do not match the keyword or are not AVAILABLE are
    /// ignored. Ties on creation time keep their listing order.
    #[must_use]
    pub fn evaluate<'a, I>(&self, records: I) -> CountEvaluation
    where
        I: IntoIterator<Item = &'a BackupRecord>,
    {
        let mut retained: Vec<BackupRecord> = records
            .into_iter()
            .filter(|record| record.lifecycle_state.is_available())
            .filter(|record| record.matches_keyword(&self.keyword))
            .cloned()
            .collect();
        retained.sort_by(|left, right| right.time_created.cmp(&left.time_created));

        let class = match retained.len() {
            0 => FloorClass::Empty,
            len if len < self.keep => FloorClass::BelowFloor,
            len if len == self.keep => FloorClass::AtFloor,
            _ => FloorClass::AboveFloor,
        };
        let candidates = if retained.len() > self.keep {
            retained.split_off(self.keep)
        } else {
            Vec::new()
        };

        CountEvaluation {
            retained,
            candidates,
            class,
        }
    }
}

/// Deletes AVAILABLE backups older than `days`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AgeRetention {
    days: u32,
    window: TimeDelta,
}

/// Partition produced by [`AgeRetention::evaluate`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgeEvaluation {
    /// Cutoff instant; records created strictly before it are old.
    pub cutoff: DateTime<Utc>,
    /// Old AVAILABLE backups.
    pub candidates: Vec<BackupRecord>,
    /// Old backups in any other state; reported but never deleted.
    pub skipped: Vec<BackupRecord>,
}

impl AgeRetention {
    /// Creates an age rule.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::WindowOutOfRange`] when `days` reaches
    /// before the start of the supported calendar from the Unix epoch, so
    /// every later `now` has a representable cutoff.
    pub fn new(days: u32) -> Result<Self, RetentionError> {
        let window = TimeDelta::try_days(i64::from(days))
            .filter(|window| DateTime::<Utc>::UNIX_EPOCH.checked_sub_signed(*window).is_some())
            .ok_or(RetentionError::WindowOutOfRange { days })?;
        Ok(Self { days, window })
    }

    /// Window length in days.
    #[must_use]
    pub const fn days(&self) -> u32 {
        self.days
    }

    /// Returns `now − days`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::WindowOutOfRange`] when the subtraction
    /// leaves the supported calendar.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RetentionError> {
        now.checked_sub_signed(self.window)
            .ok_or(RetentionError::WindowOutOfRange { days: self.days })
    }

    /// Evaluates the backups of a single volume against `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::WindowOutOfRange`] when the cutoff cannot
    /// be computed.
    pub fn evaluate<'a, I>(
        &self,
        records: I,
        now: DateTime<Utc>,
    ) -> Result<AgeEvaluation, RetentionError>
    where
        I: IntoIterator<Item = &'a BackupRecord>,
    {
        let cutoff = self.cutoff(now)?;
        let (candidates, skipped) = records
            .into_iter()
            .filter(|record| record.time_created < cutoff)
            .cloned()
            .partition(|record| record.lifecycle_state.is_available());
        Ok(AgeEvaluation {
            cutoff,
            candidates,
            skipped,
        })
    }
}
