//! Count- and age-based pruning of volume backups.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::{Attempted, OpsError, ReportRow, RowOutcome, RunReport, Scope};
use crate::backup::{BackupRecord, LifecycleState, VolumeKind};
use crate::provider::CloudProvider;
use crate::retention::{AgeRetention, CountRetention, FloorClass};
use crate::retry::{Jitter, OperationKind, Sleeper};
use crate::session::Session;

/// Whether candidates are deleted or only reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PruneMode {
    /// Issue delete requests.
    #[default]
    Apply,
    /// Report what would be deleted without mutating anything.
    DryRun,
}

/// What happened to one backup (or one volume, for floor warnings).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PruneAction {
    /// Delete request accepted.
    Deleted,
    /// Candidate reported by a dry run.
    WouldDelete,
    /// Volume holds fewer matching backups than the retention count.
    BelowFloor,
    /// Old backup left alone because it is not AVAILABLE.
    SkippedState,
    /// Delete request failed.
    Failed,
}

/// Report row for prune runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct PruneRow {
    /// Region and compartment.
    #[serde(flatten)]
    pub scope: Scope,
    /// Volume family.
    pub kind: VolumeKind,
    /// Volume owning the backup.
    pub volume_id: String,
    /// Backup acted on; absent for floor warnings.
    pub backup_id: Option<String>,
    /// Backup display name.
    pub backup_name: Option<String>,
    /// Backup creation time.
    pub time_created: Option<DateTime<Utc>>,
    /// Backup lifecycle state when listed.
    pub lifecycle_state: Option<LifecycleState>,
    /// Matching backups on the volume, for floor warnings.
    pub matching: Option<usize>,
    /// Result.
    pub action: PruneAction,
    /// Provider calls made.
    pub attempts: u32,
    /// Failure detail.
    pub error: Option<String>,
}

impl PruneRow {
    fn for_backup(scope: &Scope, record: &BackupRecord, action: PruneAction) -> Self {
        Self {
            scope: scope.clone(),
            kind: record.kind,
            volume_id: record.volume_id.clone(),
            backup_id: Some(record.id.clone()),
            backup_name: Some(record.display_name.clone()),
            time_created: Some(record.time_created),
            lifecycle_state: Some(record.lifecycle_state.clone()),
            matching: None,
            action,
            attempts: 0,
            error: None,
        }
    }
}

impl ReportRow for PruneRow {
    fn outcome(&self) -> RowOutcome {
        match self.action {
            PruneAction::Deleted | PruneAction::WouldDelete => RowOutcome::Succeeded,
            PruneAction::BelowFloor | PruneAction::SkippedState => RowOutcome::Skipped,
            PruneAction::Failed => RowOutcome::Failed,
        }
    }
}

/// Groups records by owning volume, in volume id order.
fn by_volume(records: &[BackupRecord]) -> BTreeMap<&str, Vec<&BackupRecord>> {
    let mut groups: BTreeMap<&str, Vec<&BackupRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.volume_id.as_str())
            .or_default()
            .push(record);
    }
    groups
}

/// Deletes (or reports) one candidate.
pub(super) async fn delete_candidate<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    record: &BackupRecord,
    mode: PruneMode,
) -> PruneRow
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    if mode == PruneMode::DryRun {
        info!(backup = %record.display_name, backup_id = %record.id, "would delete backup");
        return PruneRow::for_backup(scope, record, PruneAction::WouldDelete);
    }

    let outcome = session
        .executor()
        .execute(OperationKind::DeleteBackup, &record.id, || {
            session.provider().delete_backup(record.kind, &record.id)
        })
        .await;
    let attempted = Attempted::of(&outcome);
    let action = if outcome.is_success() {
        info!(backup = %record.display_name, backup_id = %record.id, "backup deleted");
        PruneAction::Deleted
    } else {
        PruneAction::Failed
    };
    PruneRow {
        attempts: attempted.attempts,
        error: attempted.error,
        ..PruneRow::for_backup(scope, record, action)
    }
}

/// Applies an age rule to already listed backups of one volume.
pub(super) async fn prune_records_by_age<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    records: &[&BackupRecord],
    rule: &AgeRetention,
    now: DateTime<Utc>,
    mode: PruneMode,
) -> Result<RunReport<PruneRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let mut report = RunReport::new();
    let evaluation = rule.evaluate(records.iter().copied(), now)?;
    for record in &evaluation.skipped {
        warn!(
            backup = %record.display_name,
            state = %record.lifecycle_state,
            "old backup not available, leaving it"
        );
        report.push(PruneRow::for_backup(scope, record, PruneAction::SkippedState));
    }
    for record in &evaluation.candidates {
        report.push(delete_candidate(session, scope, record, mode).await);
    }
    Ok(report)
}

/// Keeps the newest `rule.keep()` matching backups of every volume of
/// `kind` and deletes the rest.
///
/// # Errors
///
/// Returns [`OpsError::Session`] when the backups cannot be listed.
pub async fn prune_by_count<P, S, J>(
    session: &Session<P, S, J>,
    kind: VolumeKind,
    rule: &CountRetention,
    mode: PruneMode,
) -> Result<RunReport<PruneRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let scope = Scope::of(session);
    let records = session.compartment_backups(kind).await?;
    let mut report = RunReport::new();

    for (volume_id, group) in by_volume(&records) {
        let evaluation = rule.evaluate(group);
        match evaluation.class {
            FloorClass::Empty | FloorClass::AtFloor => {}
            FloorClass::BelowFloor => {
                warn!(
                    %volume_id,
                    matching = evaluation.retained.len(),
                    keep = rule.keep(),
                    "below retention floor, nothing deleted"
                );
                report.push(PruneRow {
                    scope: scope.clone(),
                    kind,
                    volume_id: volume_id.to_owned(),
                    backup_id: None,
                    backup_name: None,
                    time_created: None,
                    lifecycle_state: None,
                    matching: Some(evaluation.retained.len()),
                    action: PruneAction::BelowFloor,
                    attempts: 0,
                    error: None,
                });
            }
            FloorClass::AboveFloor => {
                info!(
                    %volume_id,
                    keep = rule.keep(),
                    candidates = evaluation.candidates.len(),
                    "pruning excess backups"
                );
                for record in &evaluation.candidates {
                    report.push(delete_candidate(session, &scope, record, mode).await);
                }
            }
        }
    }
    Ok(report)
}

/// Deletes AVAILABLE backups of every volume of `kind` older than the
/// rule's window.
///
/// # Errors
///
/// Returns [`OpsError::Session`] when the backups cannot be listed and
/// [`OpsError::Retention`] when the cutoff cannot be computed.
pub async fn prune_by_age<P, S, J>(
    session: &Session<P, S, J>,
    kind: VolumeKind,
    rule: &AgeRetention,
    now: DateTime<Utc>,
    mode: PruneMode,
) -> Result<RunReport<PruneRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let scope = Scope::of(session);
    let records = session.compartment_backups(kind).await?;
    let mut report = RunReport::new();
    for group in by_volume(&records).values() {
        report.extend(prune_records_by_age(session, &scope, group, rule, now, mode).await?);
    }
    Ok(report)
}
