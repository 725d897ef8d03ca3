//! Moving a backup policy's schedules to the next full hour.

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::Serialize;
use tracing::info;

use super::assign::find_policy;
use super::{Attempted, OpsError, ReportRow, RowOutcome, RunReport, Scope};
use crate::provider::{CloudProvider, PolicySchedule};
use crate::retry::{Jitter, OperationKind, Sleeper};
use crate::session::Session;

/// Result of a reschedule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleStatus {
    /// Schedules rewritten.
    Updated,
    /// Every schedule already ran at the target hour.
    Unchanged,
    /// Update failed.
    Failed,
}

/// Report row for reschedule runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ScheduleRow {
    /// Region and compartment.
    #[serde(flatten)]
    pub scope: Scope,
    /// Policy id.
    pub policy_id: String,
    /// Policy display name.
    pub policy_name: String,
    /// Hours configured before the run, one per schedule.
    pub previous_hours: Vec<Option<u32>>,
    /// Hour (UTC) the schedules were moved to.
    pub target_hour: u32,
    /// Result.
    pub status: ScheduleStatus,
    /// Provider calls made.
    pub attempts: u32,
    /// Failure detail.
    pub error: Option<String>,
}

impl ReportRow for ScheduleRow {
    fn outcome(&self) -> RowOutcome {
        match self.status {
            ScheduleStatus::Updated => RowOutcome::Succeeded,
            ScheduleStatus::Unchanged => RowOutcome::Skipped,
            ScheduleStatus::Failed => RowOutcome::Failed,
        }
    }
}

/// Hour (UTC) following the one `now` falls in, wrapping at midnight.
#[must_use]
pub fn next_full_hour(now: DateTime<Utc>) -> u32 {
    now.checked_add_signed(TimeDelta::hours(1))
        .map_or(0, |next| next.hour())
}

/// Moves every schedule of `policy` (id or display name) to the hour after
/// `now`.
///
/// `now` is captured once by the caller so the target hour does not drift
/// while the run is in progress. The update is skipped when every schedule
/// already runs at the target hour.
///
/// # Errors
///
/// Returns [`OpsError`] when the policy cannot be resolved.
pub async fn reschedule_policy<P, S, J>(
    session: &Session<P, S, J>,
    policy: &str,
    now: DateTime<Utc>,
) -> Result<RunReport<ScheduleRow>, OpsError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let scope = Scope::of(session);
    let resolved = find_policy(session, policy.trim()).await?;
    let target_hour = next_full_hour(now);
    let previous_hours: Vec<Option<u32>> = resolved
        .schedules
        .iter()
        .map(|schedule| schedule.hour_of_day)
        .collect();
    let mut row = ScheduleRow {
        scope,
        policy_id: resolved.id.clone(),
        policy_name: resolved.display_name.clone(),
        previous_hours,
        target_hour,
        status: ScheduleStatus::Unchanged,
        attempts: 0,
        error: None,
    };
    let mut report = RunReport::new();

    if resolved
        .schedules
        .iter()
        .all(|schedule| schedule.hour_of_day == Some(target_hour))
    {
        info!(policy = %resolved.display_name, target_hour, "schedules already at target hour");
        report.push(row);
        return Ok(report);
    }

    let schedules: Vec<PolicySchedule> = resolved
        .schedules
        .iter()
        .map(|schedule| PolicySchedule {
            hour_of_day: Some(target_hour),
            settings: schedule.settings.clone(),
        })
        .collect();
    let outcome = session
        .executor()
        .execute(OperationKind::UpdatePolicy, &resolved.display_name, || {
            session
                .provider()
                .update_policy_schedules(&resolved.id, &schedules)
        })
        .await;
    let attempted = Attempted::of(&outcome);
    row.status = if outcome.is_success() {
        info!(policy = %resolved.display_name, target_hour, "schedules moved");
        ScheduleStatus::Updated
    } else {
        ScheduleStatus::Failed
    };
    row.attempts = attempted.attempts;
    row.error = attempted.error;
    report.push(row);
    Ok(report)
}
