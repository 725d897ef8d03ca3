//! BDD scenarios for retention and policy assignment.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RetentionContext, retention_context};

#[scenario(
    path = "tests/features/retention.feature",
    name = "Keep the newest tagged backups of a volume"
)]
fn scenario_keep_newest(retention_context: RetentionContext) {
    let _ = retention_context;
}

#[scenario(
    path = "tests/features/retention.feature",
    name = "Leave untagged backups alone"
)]
fn scenario_untagged_untouched(retention_context: RetentionContext) {
    let _ = retention_context;
}

#[scenario(
    path = "tests/features/retention.feature",
    name = "Warn without deleting when below the floor"
)]
fn scenario_below_floor(retention_context: RetentionContext) {
    let _ = retention_context;
}

#[scenario(
    path = "tests/features/retention.feature",
    name = "Keep a backup created exactly at the age cutoff"
)]
fn scenario_age_cutoff(retention_context: RetentionContext) {
    let _ = retention_context;
}

#[scenario(
    path = "tests/features/retention.feature",
    name = "Treat an existing policy assignment as success"
)]
fn scenario_existing_assignment(retention_context: RetentionContext) {
    let _ = retention_context;
}
