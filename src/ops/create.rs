//! On-demand backup creation with an optional age prune per volume.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::prune::{PruneMode, PruneRow, prune_records_by_age};
use super::{Attempted, OpsError, ReportRow, RowOutcome, RunReport, Scope};
use crate::backup::{BackupType, VolumeKind};
use crate::provider::{BackupQuery, CloudProvider, CreateBackupRequest, Volume};
use crate::retention::AgeRetention;
use crate::retry::{Jitter, MutationOutcome, OperationKind, Sleeper};
use crate::session::Session;

/// Naming and follow-up for a creation run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatePlan {
    /// Leading part of every backup name.
    pub prefix: String,
    /// Marker placed before the timestamp; the count prune matches on it.
    pub keyword: String,
    /// Full or incremental.
    pub backup_type: BackupType,
    /// Age prune applied to each volume after a successful creation.
    pub prune: Option<AgeRetention>,
}

impl CreatePlan {
    /// Display name for a backup of `volume` taken at `now`:
    /// `<prefix>-<volume>-<keyword><YYYYMMDD-HHMM>`.
    #[must_use]
    pub fn backup_name(&self, volume: &Volume, now: DateTime<Utc>) -> String {
        format!(
            "{}-{}-{}{}",
            self.prefix,
            volume.display_name,
            self.keyword,
            now.format("%Y%m%d-%H%M")
        )
    }
}

/// Result of a creation attempt for one volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreateStatus {
    /// Backup requested.
    Created,
    /// Volume not AVAILABLE.
    Skipped,
    /// Both passes failed.
    Failed,
}

/// Report row for creation runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CreateRow {
    /// Region and compartment.
    #[serde(flatten)]
    pub scope: Scope,
    /// Volume family.
    pub kind: VolumeKind,
    /// Volume backed up.
    pub volume_id: String,
    /// Volume display name.
    pub volume_name: String,
    /// Requested backup name.
    pub backup_name: String,
    /// New backup id when created.
    pub backup_id: Option<String>,
    /// Result.
    pub status: CreateStatus,
    /// Pass (1 or 2) that produced this row.
    pub pass: u8,
    /// Provider calls made in that pass.
    pub attempts: u32,
    /// Failure detail.
    pub error: Option<String>,
}

impl ReportRow for CreateRow {
    fn outcome(&self) -> RowOutcome {
        match self.status {
            CreateStatus::Created => RowOutcome::Succeeded,
            CreateStatus::Skipped => RowOutcome::Skipped,
            CreateStatus::Failed => RowOutcome::Failed,
        }
    }
}

/// Rows produced by [`create_backups`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateRun {
    /// One row per volume.
    pub created: RunReport<CreateRow>,
    /// Rows of the follow-up age prune.
    pub pruned: RunReport<PruneRow>,
}

/// Creates a backup of every AVAILABLE volume of `kind`.
///
/// Volumes whose creation fails are retried once after all others have
/// been processed.
///
/// # Errors
///
/// Returns [`OpsError`] when the volumes cannot be listed or a follow-up
/// prune cannot enumerate backups.
pub async fn create_backups<P, S, J>(
    session: &Session<P, S, J>,
    kind: VolumeKind,
    plan: &CreatePlan,
    now: DateTime<Utc>,
) -> Result<CreateRun, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let scope = Scope::of(session);
    let volumes = session.volumes(kind).await?;
    let mut run = CreateRun::default();
    let mut deferred = Vec::new();

    for volume in &volumes {
        if !volume.lifecycle_state.is_available() {
            info!(volume = %volume.display_name, state = %volume.lifecycle_state, "volume not available, skipping");
            run.created.push(CreateRow {
                scope: scope.clone(),
                kind,
                volume_id: volume.id.clone(),
                volume_name: volume.display_name.clone(),
                backup_name: String::new(),
                backup_id: None,
                status: CreateStatus::Skipped,
                pass: 1,
                attempts: 0,
                error: None,
            });
            continue;
        }
        let row = create_one(session, &scope, volume, plan, now, 1).await;
        if row.status == CreateStatus::Failed {
            warn!(volume = %volume.display_name, "backup creation failed, will retry at the end");
            deferred.push(volume);
            continue;
        }
        run.created.push(row);
        after_create(session, &scope, volume, plan, now, &mut run).await?;
    }

    for volume in deferred {
        let row = create_one(session, &scope, volume, plan, now, 2).await;
        let created = row.status == CreateStatus::Created;
        run.created.push(row);
        if created {
            after_create(session, &scope, volume, plan, now, &mut run).await?;
        }
    }
    Ok(run)
}

async fn create_one<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    volume: &Volume,
    plan: &CreatePlan,
    now: DateTime<Utc>,
    pass: u8,
) -> CreateRow
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let request = CreateBackupRequest {
        kind: volume.kind,
        volume_id: volume.id.clone(),
        display_name: plan.backup_name(volume, now),
        backup_type: plan.backup_type.clone(),
    };
    let outcome = session
        .executor()
        .execute(OperationKind::CreateBackup, &volume.display_name, || {
            session.provider().create_backup(&request)
        })
        .await;
    let attempted = Attempted::of(&outcome);
    let (status, backup_id) = match outcome {
        MutationOutcome::Succeeded { value, .. } => {
            info!(volume = %volume.display_name, backup = %value.display_name, "backup requested");
            (CreateStatus::Created, Some(value.id))
        }
        MutationOutcome::AlreadySatisfied { .. } => (CreateStatus::Created, None),
        MutationOutcome::FailedTerminal { .. }
        | MutationOutcome::FailedUnexpected { .. }
        | MutationOutcome::FailedExhausted { .. } => (CreateStatus::Failed, None),
    };
    CreateRow {
        scope: scope.clone(),
        kind: volume.kind,
        volume_id: volume.id.clone(),
        volume_name: volume.display_name.clone(),
        backup_name: request.display_name,
        backup_id,
        status,
        pass,
        attempts: attempted.attempts,
        error: attempted.error,
    }
}

async fn after_create<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    volume: &Volume,
    plan: &CreatePlan,
    now: DateTime<Utc>,
    run: &mut CreateRun,
) -> Result<(), OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let Some(rule) = &plan.prune else {
        return Ok(());
    };
    let query = BackupQuery::compartment(volume.kind, session.compartment().id.clone())
        .for_volume(volume.id.clone());
    let records = session.backups(&query).await?;
    let refs: Vec<_> = records.iter().collect();
    run.pruned
        .extend(prune_records_by_age(session, scope, &refs, rule, now, PruneMode::Apply).await?);
    Ok(())
}
