//! Backup policy assignment across the volumes of a compartment.

use serde::Serialize;
use tracing::info;

use super::{Attempted, OpsError, ReportRow, RowOutcome, RunReport, Scope};
use crate::backup::VolumeKind;
use crate::provider::{BackupPolicy, CloudProvider, OCID_PREFIX};
use crate::retry::{Jitter, MutationOutcome, OperationKind, Sleeper};
use crate::session::Session;

/// Result of assigning the policy to one volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignStatus {
    /// Policy assigned.
    Assigned,
    /// The volume already had a policy.
    AlreadyAssigned,
    /// Volume not AVAILABLE.
    Skipped,
    /// Assignment failed.
    Failed,
}

/// Report row for assignment runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AssignRow {
    /// Region and compartment.
    #[serde(flatten)]
    pub scope: Scope,
    /// Volume family.
    pub kind: VolumeKind,
    /// Volume id.
    pub volume_id: String,
    /// Volume display name.
    pub volume_name: String,
    /// Policy assigned.
    pub policy_id: String,
    /// Result.
    pub status: AssignStatus,
    /// Provider calls made.
    pub attempts: u32,
    /// Failure detail.
    pub error: Option<String>,
}

impl ReportRow for AssignRow {
    fn outcome(&self) -> RowOutcome {
        match self.status {
            AssignStatus::Assigned | AssignStatus::AlreadyAssigned => RowOutcome::Succeeded,
            AssignStatus::Skipped => RowOutcome::Skipped,
            AssignStatus::Failed => RowOutcome::Failed,
        }
    }
}

/// Finds a policy in the session's compartment by id or display name.
///
/// An id (`ocid1.` prefix) that is not listed in the compartment is
/// returned without schedules, so provider-defined policies can still be
/// assigned.
///
/// # Errors
///
/// Returns [`OpsError::PolicyNotFound`] when no policy has the given name,
/// or [`OpsError::Session`] when policies cannot be listed.
pub(super) async fn find_policy<P, S, J>(
    session: &Session<P, S, J>,
    wanted: &str,
) -> Result<BackupPolicy, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let policies = session.policies().await?;
    let is_id = wanted.starts_with(OCID_PREFIX);
    if let Some(policy) = policies
        .into_iter()
        .find(|policy| policy.id == wanted || policy.display_name == wanted)
    {
        return Ok(policy);
    }
    if is_id {
        return Ok(BackupPolicy {
            id: wanted.to_owned(),
            display_name: wanted.to_owned(),
            schedules: Vec::new(),
        });
    }
    Err(OpsError::PolicyNotFound {
        name: wanted.to_owned(),
    })
}

/// Assigns `policy` (id or display name) to every volume of `kind`.
///
/// Volumes that already carry a policy count as successes.
///
/// # Errors
///
/// Returns [`OpsError`] when the policy cannot be resolved or the volumes
/// cannot be listed.
pub async fn assign_policy<P, S, J>(
    session: &Session<P, S, J>,
    kind: VolumeKind,
    policy: &str,
) -> Result<RunReport<AssignRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let scope = Scope::of(session);
    let resolved = find_policy(session, policy.trim()).await?;
    let volumes = session.volumes(kind).await?;
    let mut report = RunReport::new();

    for volume in &volumes {
        let base = AssignRow {
            scope: scope.clone(),
            kind,
            volume_id: volume.id.clone(),
            volume_name: volume.display_name.clone(),
            policy_id: resolved.id.clone(),
            status: AssignStatus::Skipped,
            attempts: 0,
            error: None,
        };
        if !volume.lifecycle_state.is_available() {
            info!(volume = %volume.display_name, state = %volume.lifecycle_state, "volume not available, skipping");
            report.push(base);
            continue;
        }

        let outcome = session
            .executor()
            .execute(OperationKind::AssignPolicy, &volume.display_name, || {
                session.provider().assign_policy(&volume.id, &resolved.id)
            })
            .await;
        let attempted = Attempted::of(&outcome);
        let status = match outcome {
            MutationOutcome::Succeeded { .. } => {
                info!(volume = %volume.display_name, policy = %resolved.display_name, "policy assigned");
                AssignStatus::Assigned
            }
            MutationOutcome::AlreadySatisfied { .. } => AssignStatus::AlreadyAssigned,
            MutationOutcome::FailedTerminal { .. }
            | MutationOutcome::FailedUnexpected { .. }
            | MutationOutcome::FailedExhausted { .. } => AssignStatus::Failed,
        };
        report.push(AssignRow {
            status,
            attempts: attempted.attempts,
            error: attempted.error,
            ..base
        });
    }
    Ok(report)
}
