//! Per-region execution context shared by every operation.
//!
//! A [`Session`] owns the provider, the retry executor and the resolved
//! compartment. Callers build one per region and pass it explicitly.

use std::collections::HashSet;
use std::future::Future;

use thiserror::Error;
use tracing::{debug, info};

use crate::backup::{BackupRecord, VolumeKind};
use crate::provider::{
    BackupPolicy, BackupQuery, CloudProvider, Compartment, Instance, OCID_PREFIX, Page,
    ProviderError, Volume, VolumeAttachment,
};
use crate::retry::{
    Jitter, MutationExecutor, MutationOutcome, OperationKind, Sleeper, TokioSleeper,
    UniformJitter,
};

/// Errors raised while resolving scope or enumerating resources.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// No compartment with the configured name exists below the tenancy.
    #[error("compartment '{name}' not found")]
    CompartmentNotFound {
        /// Configured compartment name.
        name: String,
    },
    /// The compartment exists but is not ACTIVE.
    #[error("compartment '{name}' is not active")]
    CompartmentInactive {
        /// Configured compartment name.
        name: String,
    },
    /// A listing page could not be fetched.
    #[error("listing {resource} failed after {attempts} attempt(s): {source}")]
    Listing {
        /// Resource being listed.
        resource: String,
        /// Calls made for the failing page.
        attempts: u32,
        /// Error from the final call.
        source: Box<ProviderError>,
    },
    /// The provider handed out a page token it had already returned.
    #[error("listing {resource} repeated page token '{token}'")]
    RepeatedPageToken {
        /// Resource being listed.
        resource: String,
        /// Token seen twice.
        token: String,
    },
}

/// Drains every page of a listing, retrying each page on throttling.
///
/// `fetch` receives the page token (`None` for the first page).
///
/// # Errors
///
/// Returns [`SessionError::Listing`] when a page fails terminally or stays
/// throttled for the whole attempt budget, and
/// [`SessionError::RepeatedPageToken`] when a page token comes back twice.
pub async fn collect_pages<T, S, J, F, Fut>(
    executor: &MutationExecutor<S, J>,
    resource: &str,
    mut fetch: F,
) -> Result<Vec<T>, SessionError>
where
    S: Sleeper,
    J: Jitter,
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ProviderError>>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;
    let mut seen = HashSet::new();
    loop {
        let outcome = executor
            .execute(OperationKind::ListPage, resource, || fetch(token.clone()))
            .await;
        let attempts = outcome.attempts();
        let page = match outcome {
            MutationOutcome::Succeeded { value, .. } => value,
            MutationOutcome::AlreadySatisfied { .. } => break,
            MutationOutcome::FailedTerminal { error: source, .. }
            | MutationOutcome::FailedUnexpected { error: source, .. }
            | MutationOutcome::FailedExhausted {
                last_error: source, ..
            } => {
                return Err(SessionError::Listing {
                    resource: resource.to_owned(),
                    attempts,
                    source: Box::new(source),
                });
            }
        };
        items.extend(page.items);
        match page.next_page {
            Some(next) if !seen.insert(next.clone()) => {
                return Err(SessionError::RepeatedPageToken {
                    resource: resource.to_owned(),
                    token: next,
                });
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }
    debug!(%resource, count = items.len(), "listing complete");
    Ok(items)
}

/// Provider, executor and compartment for one region.
#[derive(Debug)]
pub struct Session<P, S = TokioSleeper, J = UniformJitter> {
    provider: P,
    executor: MutationExecutor<S, J>,
    compartment: Compartment,
}

impl<P: CloudProvider, S: Sleeper, J: Jitter> Session<P, S, J> {
    /// Creates a session for an already resolved compartment.
    #[must_use]
    pub const fn new(provider: P, executor: MutationExecutor<S, J>, compartment: Compartment) -> Self {
        Self {
            provider,
            executor,
            compartment,
        }
    }

    /// Resolves `compartment` below `tenancy_id` and opens a session.
    ///
    /// A value starting with `ocid1.` is used as the compartment id
    /// directly; anything else is matched against compartment names.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the compartment cannot be listed, does
    /// not exist, or is not ACTIVE.
    pub async fn open(
        provider: P,
        executor: MutationExecutor<S, J>,
        tenancy_id: &str,
        compartment: &str,
    ) -> Result<Self, SessionError> {
        let resolved = resolve_compartment(&provider, &executor, tenancy_id, compartment).await?;
        info!(
            region = provider.region(),
            compartment = %resolved.name,
            compartment_id = %resolved.id,
            "session opened"
        );
        Ok(Self::new(provider, executor, resolved))
    }

    /// Provider used by this session.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Executor shared by every call in this session.
    #[must_use]
    pub const fn executor(&self) -> &MutationExecutor<S, J> {
        &self.executor
    }

    /// Resolved compartment.
    #[must_use]
    pub const fn compartment(&self) -> &Compartment {
        &self.compartment
    }

    /// Region of the underlying provider.
    #[must_use]
    pub fn region(&self) -> &str {
        self.provider.region()
    }

    /// Lists every volume of `kind` in the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn volumes(&self, kind: VolumeKind) -> Result<Vec<Volume>, SessionError> {
        let compartment_id = self.compartment.id.as_str();
        collect_pages(&self.executor, "volumes", |page| {
            self.provider.list_volumes(kind, compartment_id, page)
        })
        .await
    }

    /// Lists backups matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn backups(&self, query: &BackupQuery) -> Result<Vec<BackupRecord>, SessionError> {
        collect_pages(&self.executor, "volume backups", |page| {
            self.provider.list_backups(query, page)
        })
        .await
    }

    /// Lists every backup of `kind` in the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn compartment_backups(
        &self,
        kind: VolumeKind,
    ) -> Result<Vec<BackupRecord>, SessionError> {
        let query = BackupQuery::compartment(kind, self.compartment.id.clone());
        self.backups(&query).await
    }

    /// Lists every instance in the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn instances(&self) -> Result<Vec<Instance>, SessionError> {
        let compartment_id = self.compartment.id.as_str();
        collect_pages(&self.executor, "instances", |page| {
            self.provider.list_instances(compartment_id, page)
        })
        .await
    }

    /// Lists the attachments of `kind` for one instance.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn attachments(
        &self,
        kind: VolumeKind,
        instance: &Instance,
    ) -> Result<Vec<VolumeAttachment>, SessionError> {
        collect_pages(&self.executor, "volume attachments", |page| {
            self.provider.list_attachments(kind, instance, page)
        })
        .await
    }

    /// Lists every backup policy in the compartment.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listing`] when a page cannot be fetched.
    pub async fn policies(&self) -> Result<Vec<BackupPolicy>, SessionError> {
        let compartment_id = self.compartment.id.as_str();
        collect_pages(&self.executor, "backup policies", |page| {
            self.provider.list_backup_policies(compartment_id, page)
        })
        .await
    }
}

async fn resolve_compartment<P, S, J>(
    provider: &P,
    executor: &MutationExecutor<S, J>,
    tenancy_id: &str,
    compartment: &str,
) -> Result<Compartment, SessionError>
where
    P: CloudProvider,
    S: Sleeper,
    J: Jitter,
{
    let wanted = compartment.trim();
    if wanted.starts_with(OCID_PREFIX) {
        return Ok(Compartment {
            id: wanted.to_owned(),
            name: wanted.to_owned(),
            active: true,
        });
    }
    let compartments = collect_pages(executor, "compartments", |page| {
        provider.list_compartments(tenancy_id, page)
    })
    .await?;
    let found = compartments
        .into_iter()
        .find(|compartment| compartment.name == wanted)
        .ok_or_else(|| SessionError::CompartmentNotFound {
            name: wanted.to_owned(),
        })?;
    if !found.active {
        return Err(SessionError::CompartmentInactive {
            name: wanted.to_owned(),
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::test_support::{FakeCall, FakeProvider, FixedJitter, RecordingSleeper, service_error};
    use rstest::rstest;
    use std::time::Duration;

    fn executor() -> MutationExecutor<RecordingSleeper, FixedJitter> {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::ZERO).expect("policy");
        MutationExecutor::with_parts(policy, RecordingSleeper::new(), FixedJitter::default())
    }

    #[rstest]
    #[tokio::test]
    async fn open_resolves_compartment_by_name() {
        let provider = FakeProvider::new();
        provider.add_compartment("ocid1.compartment.oc1..dev", "dev");
        provider.add_compartment("ocid1.compartment.oc1..prod", "prod");

        let session = Session::open(provider, executor(), "tenancy", "prod")
            .await
            .expect("session");

        assert_eq!(session.compartment().id, "ocid1.compartment.oc1..prod");
    }

    #[rstest]
    #[tokio::test]
    async fn open_accepts_compartment_ocid_without_listing() {
        let provider = FakeProvider::new();
        let session = Session::open(
            provider.clone(),
            executor(),
            "tenancy",
            "ocid1.compartment.oc1..direct",
        )
        .await
        .expect("session");

        assert_eq!(session.compartment().id, "ocid1.compartment.oc1..direct");
        assert!(provider.calls(FakeCall::ListCompartments).is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn open_rejects_unknown_compartment() {
        let provider = FakeProvider::new();
        provider.add_compartment("ocid1.compartment.oc1..dev", "dev");

        let err = Session::open(provider, executor(), "tenancy", "prod")
            .await
            .expect_err("missing compartment");

        assert_eq!(
            err,
            SessionError::CompartmentNotFound {
                name: String::from("prod")
            }
        );
    }

    #[rstest]
    #[tokio::test]
    async fn collect_pages_follows_tokens_and_retries_throttled_pages() {
        let provider = FakeProvider::new();
        for idx in 0..5 {
            provider.add_compartment(&format!("c-{idx}"), &format!("name-{idx}"));
        }
        provider.paginate(2);
        provider.fail_next(FakeCall::ListCompartments, service_error(429, "TooManyRequests"));
        let executor = executor();

        let items = collect_pages(&executor, "compartments", |page| {
            provider.list_compartments("tenancy", page)
        })
        .await
        .expect("all pages");

        assert_eq!(items.len(), 5);
        assert_eq!(provider.calls(FakeCall::ListCompartments).len(), 4);
    }

    #[rstest]
    #[tokio::test]
    async fn collect_pages_stops_when_a_token_repeats() {
        let executor = executor();
        let mut fetched = 0_u32;

        let err = collect_pages(&executor, "volumes", |_| {
            fetched += 1;
            std::future::ready(Ok::<_, ProviderError>(Page {
                items: vec![fetched],
                next_page: Some(String::from("again")),
            }))
        })
        .await
        .expect_err("repeated token");

        assert_eq!(
            err,
            SessionError::RepeatedPageToken {
                resource: String::from("volumes"),
                token: String::from("again"),
            }
        );
        assert_eq!(fetched, 2);
    }

    #[rstest]
    #[tokio::test]
    async fn collect_pages_reports_terminal_failures() {
        let provider = FakeProvider::new();
        provider.fail_next(FakeCall::ListInstances, service_error(404, "NotAuthorizedOrNotFound"));
        let executor = executor();

        let err = collect_pages(&executor, "instances", |page| {
            provider.list_instances("comp", page)
        })
        .await
        .expect_err("terminal failure");

        assert!(matches!(
            err,
            SessionError::Listing { attempts: 1, .. }
        ));
    }
}
