//! BDD step definitions for retention pruning and policy assignment.

use bvkeeper::VolumeKind;
use bvkeeper::ops::{self, PruneMode};
use bvkeeper::provider::BackupPolicy;
use bvkeeper::retention::{AgeRetention, CountRetention};
use bvkeeper::test_support::{FakeCall, backup, volume};
use bvkeeper::{LifecycleState, Tally};
use chrono::TimeDelta;
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{KEYWORD, RetentionContext, RunOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn block_on<F: Future>(future: F) -> Result<F::Output, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(runtime.block_on(future))
}

fn tally(context: &RetentionContext) -> Result<Tally, StepError> {
    match context.outcome.borrow().as_ref() {
        Some(RunOutcome::Prune(report)) => Ok(report.tally()),
        Some(RunOutcome::Assign(report)) => Ok(report.tally()),
        Some(RunOutcome::Failure(message)) => Err(StepError::Assertion(format!(
            "expected a report, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

fn state_of(context: &RetentionContext, id: &str) -> Option<LifecycleState> {
    context
        .provider
        .backups()
        .into_iter()
        .find(|record| record.id == id)
        .map(|record| record.lifecycle_state)
}

#[given("a compartment with {count:i64} daily tagged backups of volume \"{volume_id}\"")]
fn tagged_backups(retention_context: &RetentionContext, count: i64, volume_id: String) {
    for day in 0..count {
        retention_context.provider.add_backup(backup(
            &format!("{volume_id}-bkp-{day}"),
            &format!("BootBackup-{volume_id}-{KEYWORD}{day}"),
            &volume_id,
            retention_context.now - TimeDelta::days(day),
        ));
    }
}

#[given("an untagged backup \"{id}\" of volume \"{volume_id}\" created {days:i64} days ago")]
fn untagged_backup(retention_context: &RetentionContext, id: String, volume_id: String, days: i64) {
    retention_context.provider.add_backup(backup(
        &id,
        "before-kernel-upgrade",
        &volume_id,
        retention_context.now - TimeDelta::days(days),
    ));
}

#[given("a backup \"{id}\" of volume \"{volume_id}\" created {days:i64} days ago")]
fn aged_backup(retention_context: &RetentionContext, id: String, volume_id: String, days: i64) {
    retention_context.provider.add_backup(backup(
        &id,
        &id,
        &volume_id,
        retention_context.now - TimeDelta::days(days),
    ));
}

#[given(
    "a backup \"{id}\" of volume \"{volume_id}\" created {days:i64} days and 1 microsecond ago"
)]
fn backup_past_cutoff(
    retention_context: &RetentionContext,
    id: String,
    volume_id: String,
    days: i64,
) {
    retention_context.provider.add_backup(backup(
        &id,
        &id,
        &volume_id,
        retention_context.now - TimeDelta::days(days) - TimeDelta::microseconds(1),
    ));
}

#[given("a boot volume \"{volume_id}\" named \"{name}\"")]
fn boot_volume(retention_context: &RetentionContext, volume_id: String, name: String) {
    retention_context
        .provider
        .add_volume(volume(&volume_id, &name, VolumeKind::Boot));
}

#[given("a backup policy \"{name}\" with id \"{policy_id}\"")]
fn backup_policy(retention_context: &RetentionContext, name: String, policy_id: String) {
    retention_context.provider.add_policy(BackupPolicy {
        id: policy_id,
        display_name: name,
        schedules: Vec::new(),
    });
}

#[given("volume \"{volume_id}\" is already assigned policy \"{policy_id}\"")]
fn existing_assignment(retention_context: &RetentionContext, volume_id: String, policy_id: String) {
    retention_context
        .provider
        .add_assignment(&volume_id, &policy_id);
}

#[when("I prune boot backups keeping {keep:usize}")]
fn prune_keeping(retention_context: &RetentionContext, keep: usize) -> Result<(), StepError> {
    let session = retention_context.session();
    let rule = CountRetention::new(KEYWORD, keep);
    let result = block_on(ops::prune_by_count(
        &session,
        VolumeKind::Boot,
        &rule,
        PruneMode::Apply,
    ))?;
    retention_context.record(match result {
        Ok(report) => RunOutcome::Prune(report),
        Err(err) => RunOutcome::Failure(err.to_string()),
    });
    Ok(())
}

#[when("I prune boot backups older than {days:u32} days")]
fn prune_older_than(retention_context: &RetentionContext, days: u32) -> Result<(), StepError> {
    let rule = AgeRetention::new(days).map_err(|err| StepError::Assertion(err.to_string()))?;
    let session = retention_context.session();
    let result = block_on(ops::prune_by_age(
        &session,
        VolumeKind::Boot,
        &rule,
        retention_context.now,
        PruneMode::Apply,
    ))?;
    retention_context.record(match result {
        Ok(report) => RunOutcome::Prune(report),
        Err(err) => RunOutcome::Failure(err.to_string()),
    });
    Ok(())
}

#[when("I assign policy \"{policy}\" to boot volumes")]
fn assign(retention_context: &RetentionContext, policy: String) -> Result<(), StepError> {
    let session = retention_context.session();
    let result = block_on(ops::assign_policy(&session, VolumeKind::Boot, &policy))?;
    retention_context.record(match result {
        Ok(report) => RunOutcome::Assign(report),
        Err(err) => RunOutcome::Failure(err.to_string()),
    });
    Ok(())
}

#[then("the backups \"{ids}\" are deleted")]
fn backups_deleted(retention_context: &RetentionContext, ids: String) -> Result<(), StepError> {
    let expected: Vec<&str> = ids.split(',').map(str::trim).collect();
    let deleted = retention_context.provider.calls(FakeCall::DeleteBackup);
    if deleted == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected deletions {expected:?}, got {deleted:?}"
        )))
    }
}

#[then("no backup is deleted")]
fn nothing_deleted(retention_context: &RetentionContext) -> Result<(), StepError> {
    let deleted = retention_context.provider.calls(FakeCall::DeleteBackup);
    if deleted.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no deletions, got {deleted:?}"
        )))
    }
}

#[then("{count:usize} tagged backups of volume \"{volume_id}\" remain available")]
fn tagged_remaining(
    retention_context: &RetentionContext,
    count: usize,
    volume_id: String,
) -> Result<(), StepError> {
    let remaining = retention_context
        .provider
        .backups()
        .into_iter()
        .filter(|record| {
            record.volume_id == volume_id
                && record.matches_keyword(KEYWORD)
                && record.lifecycle_state.is_available()
        })
        .count();
    if remaining == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} available tagged backups, got {remaining}"
        )))
    }
}

#[then("the backup \"{id}\" remains available")]
fn backup_available(retention_context: &RetentionContext, id: String) -> Result<(), StepError> {
    match state_of(retention_context, &id) {
        Some(LifecycleState::Available) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {id} to remain AVAILABLE, got {other:?}"
        ))),
    }
}

#[then("the run reports {count:usize} skipped item")]
fn skipped_items(retention_context: &RetentionContext, count: usize) -> Result<(), StepError> {
    let summary = tally(retention_context)?;
    if summary.skipped == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} skipped, got {summary:?}"
        )))
    }
}

#[then("the run reports no failures")]
fn no_failures(retention_context: &RetentionContext) -> Result<(), StepError> {
    let summary = tally(retention_context)?;
    if summary.failed == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no failures, got {summary:?}"
        )))
    }
}

#[then("volume \"{volume_id}\" reports \"{status}\"")]
fn volume_status(
    retention_context: &RetentionContext,
    volume_id: String,
    status: String,
) -> Result<(), StepError> {
    let outcome = retention_context.outcome.borrow();
    let Some(RunOutcome::Assign(report)) = outcome.as_ref() else {
        return Err(StepError::Assertion(String::from(
            "expected an assignment report",
        )));
    };
    let row = report
        .rows()
        .iter()
        .find(|row| row.volume_id == volume_id)
        .ok_or_else(|| StepError::Assertion(format!("missing row for {volume_id}")))?;
    let actual = serde_json::to_value(row.status)
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    if actual == status.as_str() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected status {status}, got {actual}"
        )))
    }
}
