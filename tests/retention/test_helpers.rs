//! Shared fixtures for retention BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use bvkeeper::ops::{AssignRow, PruneRow};
use bvkeeper::provider::Compartment;
use bvkeeper::retry::{MutationExecutor, RetryPolicy};
use bvkeeper::test_support::{FakeProvider, FixedJitter, RecordingSleeper};
use bvkeeper::{RunReport, Session};
use chrono::{DateTime, TimeZone, Utc};
use rstest::fixture;

pub const KEYWORD: &str = "BKPAUTCITEL-";

pub type TestSession = Session<FakeProvider, RecordingSleeper, FixedJitter>;

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Prune(RunReport<PruneRow>),
    Assign(RunReport<AssignRow>),
    Failure(String),
}

/// Scenario state shared by reference between steps.
#[derive(Debug)]
pub struct RetentionContext {
    pub provider: FakeProvider,
    pub now: DateTime<Utc>,
    pub outcome: RefCell<Option<RunOutcome>>,
}

impl RetentionContext {
    pub fn record(&self, outcome: RunOutcome) {
        self.outcome.replace(Some(outcome));
    }

    pub fn session(&self) -> TestSession {
        let policy = RetryPolicy::new(3, Duration::from_secs(5), Duration::ZERO)
            .unwrap_or_else(|err| panic!("retry policy should be valid: {err}"));
        let executor =
            MutationExecutor::with_parts(policy, RecordingSleeper::new(), FixedJitter::default());
        Session::new(
            self.provider.clone(),
            executor,
            Compartment {
                id: String::from("ocid1.compartment.oc1..ops"),
                name: String::from("ops"),
                active: true,
            },
        )
    }
}

#[fixture]
pub fn retention_context() -> RetentionContext {
    let now = Utc
        .with_ymd_and_hms(2024, 6, 20, 12, 30, 0)
        .single()
        .unwrap_or_else(|| panic!("fixture timestamp should be valid"));
    RetentionContext {
        provider: FakeProvider::new(),
        now,
        outcome: RefCell::new(None),
    }
}
