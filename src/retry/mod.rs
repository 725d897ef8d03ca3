//! Rate-limited execution of provider calls.
//!
//! The executor drives one operation through the states
//! `Attempting → {Succeeded, Backoff, FailedTerminal}` and
//! `Backoff → {Attempting, FailedExhausted}`. Throttled calls back off
//! exponentially with random jitter so parallel runs do not retry in
//! lockstep; every other failure ends the operation immediately.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::provider::ProviderError;

/// Default number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default wait before the second attempt.
pub const DEFAULT_BASE_WAIT: Duration = Duration::from_secs(5);

/// Default upper bound (exclusive) of the random jitter.
pub const DEFAULT_JITTER_BOUND: Duration = Duration::from_secs(5);

/// Errors raised when building a [`RetryPolicy`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RetryPolicyError {
    /// Raised when the attempt budget is zero.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// Attempt budget and backoff parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_wait: Duration,
    jitter_bound: Duration,
}

impl RetryPolicy {
    /// Builds a policy.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError::ZeroAttempts`] when `max_attempts` is zero.
    pub const fn new(
        max_attempts: u32,
        base_wait: Duration,
        jitter_bound: Duration,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            base_wait,
            jitter_bound,
        })
    }

    /// Maximum number of calls made for one operation.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait applied after the first throttled call.
    #[must_use]
    pub const fn base_wait(&self) -> Duration {
        self.base_wait
    }

    /// Exclusive upper bound of the jitter added to every wait.
    #[must_use]
    pub const fn jitter_bound(&self) -> Duration {
        self.jitter_bound
    }

    /// Wait (without jitter) after `throttles` consecutive throttled calls:
    /// `base_wait × 2^(throttles − 1)`, saturating.
    #[must_use]
    pub fn backoff_after(&self, throttles: u32) -> Duration {
        let exponent = throttles.saturating_sub(1);
        let factor = 2_u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_wait.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_wait: DEFAULT_BASE_WAIT,
            jitter_bound: DEFAULT_JITTER_BOUND,
        }
    }
}

/// Attempt counter and current wait for one operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryState {
    attempts: u32,
    current_wait: Duration,
}

impl RetryState {
    /// Starts a fresh state at `base_wait`.
    #[must_use]
    pub const fn new(base_wait: Duration) -> Self {
        Self {
            attempts: 0,
            current_wait: base_wait,
        }
    }

    /// Number of calls made so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait that the next throttle will apply (before jitter).
    #[must_use]
    pub const fn current_wait(&self) -> Duration {
        self.current_wait
    }

    /// Records the start of a call.
    pub const fn begin_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Records a throttled call, returning the wait to apply and doubling
    /// the wait for the next one.
    pub const fn throttled(&mut self) -> Duration {
        let wait = self.current_wait;
        self.current_wait = self.current_wait.saturating_mul(2);
        wait
    }
}

/// The provider call being executed, used to interpret its errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    /// Backup creation.
    CreateBackup,
    /// Backup deletion.
    DeleteBackup,
    /// Backup policy assignment.
    AssignPolicy,
    /// Backup policy update.
    UpdatePolicy,
    /// One page of a listing call.
    ListPage,
    /// Single read of one resource.
    Lookup,
}

impl OperationKind {
    /// Label used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateBackup => "create backup",
            Self::DeleteBackup => "delete backup",
            Self::AssignPolicy => "assign policy",
            Self::UpdatePolicy => "update policy",
            Self::ListPage => "list page",
            Self::Lookup => "lookup",
        }
    }

    const fn accepts_existing(self) -> bool {
        matches!(self, Self::AssignPolicy)
    }
}

/// How the executor reacts to a failed call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Provider rate limit; retry after backing off.
    Throttled,
    /// Target state already holds; counts as success.
    AlreadySatisfied,
    /// Provider rejected the call; do not retry.
    Terminal,
    /// Failure outside the provider's error contract; do not retry.
    Unexpected,
}

impl ErrorClass {
    /// Classifies `error` raised by an operation of `kind`.
    #[must_use]
    pub fn classify(kind: OperationKind, error: &ProviderError) -> Self {
        match error.service() {
            Some(service) if service.is_throttled() => Self::Throttled,
            Some(service) if kind.accepts_existing() && service.is_already_exists() => {
                Self::AlreadySatisfied
            }
            Some(_) => Self::Terminal,
            None => Self::Unexpected,
        }
    }
}

/// Final state of an executed operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MutationOutcome<T> {
    /// The call succeeded.
    Succeeded {
        /// Value returned by the provider.
        value: T,
        /// Calls made, including throttled ones.
        attempts: u32,
    },
    /// The provider reported the target state already exists.
    AlreadySatisfied {
        /// Calls made.
        attempts: u32,
    },
    /// The provider rejected the call.
    FailedTerminal {
        /// Provider error.
        error: ProviderError,
        /// Calls made.
        attempts: u32,
    },
    /// The call failed outside the provider's error contract.
    FailedUnexpected {
        /// Underlying error.
        error: ProviderError,
        /// Calls made.
        attempts: u32,
    },
    /// Every attempt was throttled.
    FailedExhausted {
        /// Error from the final attempt.
        last_error: ProviderError,
        /// Calls made.
        attempts: u32,
    },
}

impl<T> MutationOutcome<T> {
    /// Returns `true` for [`Self::Succeeded`] and [`Self::AlreadySatisfied`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::AlreadySatisfied { .. })
    }

    /// Number of calls made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::AlreadySatisfied { attempts }
            | Self::FailedTerminal { attempts, .. }
            | Self::FailedUnexpected { attempts, .. }
            | Self::FailedExhausted { attempts, .. } => *attempts,
        }
    }

    /// Short status label for reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::AlreadySatisfied { .. } => "already-satisfied",
            Self::FailedTerminal { .. } => "failed-terminal",
            Self::FailedUnexpected { .. } => "failed-unexpected",
            Self::FailedExhausted { .. } => "failed-exhausted",
        }
    }

    /// Error that ended a failed operation.
    #[must_use]
    pub const fn error(&self) -> Option<&ProviderError> {
        match self {
            Self::FailedTerminal { error, .. } | Self::FailedUnexpected { error, .. } => {
                Some(error)
            }
            Self::FailedExhausted { last_error, .. } => Some(last_error),
            Self::Succeeded { .. } | Self::AlreadySatisfied { .. } => None,
        }
    }

    /// Converts the outcome into a `Result`; `AlreadySatisfied` yields
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended a failed operation.
    pub fn into_result(self) -> Result<Option<T>, ProviderError> {
        match self {
            Self::Succeeded { value, .. } => Ok(Some(value)),
            Self::AlreadySatisfied { .. } => Ok(None),
            Self::FailedTerminal { error, .. } | Self::FailedUnexpected { error, .. } => {
                Err(error)
            }
            Self::FailedExhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Future returned by [`Sleeper::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Suspends the current task between attempts.
pub trait Sleeper: Send + Sync {
    /// Sleeps for `duration`.
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Source of the random component added to every backoff.
pub trait Jitter: Send + Sync {
    /// Returns a duration in `[0, bound)`; zero when `bound` is zero.
    fn sample(&self, bound: Duration) -> Duration;
}

/// Uniformly distributed jitter with millisecond resolution.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformJitter;

impl Jitter for UniformJitter {
    fn sample(&self, bound: Duration) -> Duration {
        let bound_millis = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
        if bound_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound_millis))
    }
}

/// Executes provider calls under a [`RetryPolicy`].
#[derive(Clone, Debug)]
pub struct MutationExecutor<S = TokioSleeper, J = UniformJitter> {
    policy: RetryPolicy,
    sleeper: S,
    jitter: J,
}

impl MutationExecutor {
    /// Creates an executor using the tokio timer and uniform jitter.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self::with_parts(policy, TokioSleeper, UniformJitter)
    }
}

impl<S: Sleeper, J: Jitter> MutationExecutor<S, J> {
    /// Creates an executor with explicit sleeper and jitter sources.
    #[must_use]
    pub const fn with_parts(policy: RetryPolicy, sleeper: S, jitter: J) -> Self {
        Self {
            policy,
            sleeper,
            jitter,
        }
    }

    /// Returns the policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds, fails terminally, or exhausts the
    /// attempt budget. Never panics on provider errors; the outcome carries
    /// the classification.
    pub async fn execute<T, F, Fut>(
        &self,
        kind: OperationKind,
        label: &str,
        mut op: F,
    ) -> MutationOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut state = RetryState::new(self.policy.base_wait);
        loop {
            state.begin_attempt();
            let attempts = state.attempts();
            let failure = match op().await {
                Ok(value) => {
                    debug!(operation = kind.as_str(), %label, attempts, "call succeeded");
                    return MutationOutcome::Succeeded { value, attempts };
                }
                Err(failure) => failure,
            };

            match ErrorClass::classify(kind, &failure) {
                ErrorClass::AlreadySatisfied => {
                    info!(operation = kind.as_str(), %label, "target state already present");
                    return MutationOutcome::AlreadySatisfied { attempts };
                }
                ErrorClass::Terminal => {
                    warn!(operation = kind.as_str(), %label, error = %failure, "provider rejected call");
                    return MutationOutcome::FailedTerminal {
                        error: failure,
                        attempts,
                    };
                }
                ErrorClass::Unexpected => {
                    error!(operation = kind.as_str(), %label, error = %failure, "call failed unexpectedly");
                    return MutationOutcome::FailedUnexpected {
                        error: failure,
                        attempts,
                    };
                }
                ErrorClass::Throttled if attempts >= self.policy.max_attempts => {
                    warn!(operation = kind.as_str(), %label, attempts, "throttled on every attempt, giving up");
                    return MutationOutcome::FailedExhausted {
                        last_error: failure,
                        attempts,
                    };
                }
                ErrorClass::Throttled => {
                    let wait = state
                        .throttled()
                        .saturating_add(self.jitter.sample(self.policy.jitter_bound));
                    warn!(
                        operation = kind.as_str(),
                        %label,
                        attempts,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "throttled, backing off"
                    );
                    self.sleeper.sleep(wait).await;
                }
            }
        }
    }
}
