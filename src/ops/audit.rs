//! Read-only backup coverage audit across the instances of a compartment.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use super::{OpsError, ReportRow, RowOutcome, RunReport, Scope};
use crate::backup::{BackupRecord, BackupType, LifecycleState, SourceType, VolumeKind};
use crate::provider::{BackupQuery, CloudProvider, Instance, VolumeAttachment};
use crate::retry::{Jitter, MutationOutcome, OperationKind, Sleeper};
use crate::session::Session;

/// Freshness expectation for a volume's recent backups.
///
/// The `i`-th most recent backup (0-based) of the newest `min_backups` must
/// be at most `max_age + i × interval` old.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreshnessRule {
    /// Backups that must exist.
    pub min_backups: usize,
    /// Allowed age of the newest backup.
    pub max_age: TimeDelta,
    /// Expected spacing between consecutive backups.
    pub interval: TimeDelta,
}

impl Default for FreshnessRule {
    fn default() -> Self {
        Self {
            min_backups: 3,
            max_age: TimeDelta::minutes(90),
            interval: TimeDelta::hours(1),
        }
    }
}

impl FreshnessRule {
    /// Classifies a volume's backups at `now`.
    #[must_use]
    pub fn classify(&self, backups: &[&BackupRecord], now: DateTime<Utc>) -> AuditStatus {
        if backups.is_empty() {
            return AuditStatus::NoBackup;
        }
        let mut newest: Vec<&BackupRecord> = backups.to_vec();
        newest.sort_by(|left, right| right.time_created.cmp(&left.time_created));
        newest.truncate(self.min_backups);
        if newest.len() < self.min_backups {
            return AuditStatus::Alert;
        }

        let mut allowed = self.max_age;
        for record in newest {
            let age = now.signed_duration_since(record.time_created);
            if age > allowed {
                return AuditStatus::Alert;
            }
            allowed = allowed.checked_add(&self.interval).unwrap_or(TimeDelta::MAX);
        }
        AuditStatus::Ok
    }
}

/// Optional filters applied to each volume's backups before classifying.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuditFilter {
    /// Keep only backups of this origin.
    pub source_type: Option<SourceType>,
    /// Keep only backups of this type.
    pub backup_type: Option<BackupType>,
    /// Keep only backups in this state.
    pub lifecycle_state: Option<LifecycleState>,
}

impl AuditFilter {
    fn accepts(&self, record: &BackupRecord) -> bool {
        self.source_type
            .as_ref()
            .is_none_or(|wanted| *wanted == record.source_type)
            && self
                .backup_type
                .as_ref()
                .is_none_or(|wanted| *wanted == record.backup_type)
            && self
                .lifecycle_state
                .as_ref()
                .is_none_or(|wanted| *wanted == record.lifecycle_state)
    }
}

/// Parameters of an audit run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuditRequest {
    /// Freshness expectation.
    pub rule: FreshnessRule,
    /// Backup filters.
    pub filter: AuditFilter,
    /// Audit at most this many instances.
    pub limit: Option<usize>,
    /// Instances audited concurrently.
    pub workers: usize,
}

/// Coverage classification of one volume.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    /// Enough recent backups.
    Ok,
    /// Backups exist but are too few or too old.
    Alert,
    /// No backups at all.
    NoBackup,
    /// The volume could not be inspected.
    Error,
}

/// Report row for audit runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AuditRow {
    /// Region and compartment.
    #[serde(flatten)]
    pub scope: Scope,
    /// Instance id.
    pub instance_id: String,
    /// Instance display name.
    pub instance_name: String,
    /// Volume family; absent when the instance itself failed.
    pub kind: Option<VolumeKind>,
    /// Volume id.
    pub volume_id: Option<String>,
    /// Volume display name.
    pub volume_name: Option<String>,
    /// Assigned backup policy name (or id).
    pub policy: Option<String>,
    /// Backups after filtering.
    pub backups: usize,
    /// Manual backups after filtering.
    pub manual: usize,
    /// Scheduled backups after filtering.
    pub scheduled: usize,
    /// Newest backup time.
    pub latest_backup: Option<DateTime<Utc>>,
    /// Classification.
    pub status: AuditStatus,
    /// Failure detail.
    pub error: Option<String>,
}

impl AuditRow {
    fn failed(scope: &Scope, instance: &Instance, error: String) -> Self {
        Self {
            scope: scope.clone(),
            instance_id: instance.id.clone(),
            instance_name: instance.display_name.clone(),
            kind: None,
            volume_id: None,
            volume_name: None,
            policy: None,
            backups: 0,
            manual: 0,
            scheduled: 0,
            latest_backup: None,
            status: AuditStatus::Error,
            error: Some(error),
        }
    }
}

impl ReportRow for AuditRow {
    fn outcome(&self) -> RowOutcome {
        match self.status {
            AuditStatus::Ok => RowOutcome::Succeeded,
            AuditStatus::Alert | AuditStatus::NoBackup | AuditStatus::Error => RowOutcome::Failed,
        }
    }
}

/// Audits backup coverage of every boot and block volume attached to the
/// compartment's instances.
///
/// Instances are inspected concurrently by `request.workers` workers; row
/// order across instances is not defined.
///
/// # Errors
///
/// Returns [`OpsError::NoWorkers`] when `workers` is zero and
/// [`OpsError::Session`] when instances or policies cannot be listed.
pub async fn audit_backups<P, S, J>(
    session: &Session<P, S, J>,
    request: &AuditRequest,
    now: DateTime<Utc>,
) -> Result<RunReport<AuditRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    if request.workers == 0 {
        return Err(OpsError::NoWorkers);
    }
    let scope = Scope::of(session);
    let policy_names: HashMap<String, String> = session
        .policies()
        .await?
        .into_iter()
        .map(|policy| (policy.id, policy.display_name))
        .collect();
    let mut instances = session.instances().await?;
    if let Some(limit) = request.limit {
        instances.truncate(limit);
    }
    info!(instances = instances.len(), workers = request.workers, "auditing backups");

    let per_instance: Vec<Vec<AuditRow>> = stream::iter(instances.iter())
        .map(|instance| audit_instance(session, &scope, &policy_names, instance, request, now))
        .buffer_unordered(request.workers)
        .collect()
        .await;

    let mut report = RunReport::new();
    for row in per_instance.into_iter().flatten() {
        report.push(row);
    }
    Ok(report)
}

async fn audit_instance<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    policy_names: &HashMap<String, String>,
    instance: &Instance,
    request: &AuditRequest,
    now: DateTime<Utc>,
) -> Vec<AuditRow>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let mut rows = Vec::new();
    for kind in [VolumeKind::Boot, VolumeKind::Block] {
        let attachments = match session.attachments(kind, instance).await {
            Ok(found) => found,
            Err(err) => {
                warn!(instance = %instance.display_name, %kind, error = %err, "cannot list attachments");
                rows.push(AuditRow::failed(scope, instance, err.to_string()));
                continue;
            }
        };
        for attachment in attachments
            .iter()
            .filter(|att| !att.lifecycle_state.eq_ignore_ascii_case("DETACHED"))
        {
            rows.push(
                audit_volume(session, scope, policy_names, instance, attachment, request, now)
                    .await,
            );
        }
    }
    rows
}

async fn audit_volume<P, S, J>(
    session: &Session<P, S, J>,
    scope: &Scope,
    policy_names: &HashMap<String, String>,
    instance: &Instance,
    attachment: &VolumeAttachment,
    request: &AuditRequest,
    now: DateTime<Utc>,
) -> AuditRow
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let kind = attachment.kind;
    let volume_id = attachment.volume_id.as_str();
    let mut row = AuditRow {
        kind: Some(kind),
        volume_id: Some(volume_id.to_owned()),
        ..AuditRow::failed(scope, instance, String::new())
    };

    let volume_name = match session
        .executor()
        .execute(OperationKind::Lookup, volume_id, || {
            session.provider().get_volume(kind, volume_id)
        })
        .await
    {
        MutationOutcome::Succeeded { value, .. } => value.display_name,
        failed => {
            row.error = failed.error().map(ToString::to_string);
            return row;
        }
    };
    row.volume_name = Some(volume_name);

    let query =
        BackupQuery::compartment(kind, instance.compartment_id.clone()).for_volume(volume_id);
    let records = match session.backups(&query).await {
        Ok(found) => found,
        Err(err) => {
            row.error = Some(err.to_string());
            return row;
        }
    };
    let kept: Vec<&BackupRecord> = records
        .iter()
        .filter(|record| request.filter.accepts(record))
        .collect();

    let assignment = session
        .executor()
        .execute(OperationKind::Lookup, volume_id, || {
            session.provider().get_policy_assignment(volume_id)
        })
        .await;
    let mut lookup_error = None;
    row.policy = match assignment {
        MutationOutcome::Succeeded {
            value: Some(found), ..
        } => Some(
            policy_names
                .get(&found.policy_id)
                .cloned()
                .unwrap_or(found.policy_id),
        ),
        MutationOutcome::Succeeded { value: None, .. } | MutationOutcome::AlreadySatisfied { .. } => {
            None
        }
        failed => {
            warn!(volume = %volume_id, error = ?failed.error(), "cannot read policy assignment");
            lookup_error = Some(failed.error().map_or_else(
                || String::from("policy assignment lookup failed"),
                |err| format!("policy assignment lookup failed: {err}"),
            ));
            None
        }
    };

    row.backups = kept.len();
    row.manual = kept
        .iter()
        .filter(|record| record.source_type == SourceType::Manual)
        .count();
    row.scheduled = kept
        .iter()
        .filter(|record| record.source_type == SourceType::Scheduled)
        .count();
    row.latest_backup = kept.iter().map(|record| record.time_created).max();
    row.status = if lookup_error.is_some() {
        AuditStatus::Error
    } else {
        request.rule.classify(&kept, now)
    };
    row.error = lookup_error;
    if row.status != AuditStatus::Ok {
        warn!(
            instance = %instance.display_name,
            volume = row.volume_name.as_deref().unwrap_or(volume_id),
            status = ?row.status,
            "backup coverage below expectation"
        );
    }
    row
}
