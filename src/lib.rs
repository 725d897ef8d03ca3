//! Core library for the `bvkeeper` backup maintenance tool.
//!
//! The crate wraps a cloud provider's block-storage control plane behind
//! [`provider::CloudProvider`], drives every call through a throttle-aware
//! [`retry::MutationExecutor`] and implements the batch operations
//! (retention pruning, backup creation, policy assignment, rescheduling and
//! auditing) on top of a compartment-scoped [`session::Session`].

pub mod backup;
pub mod command;
pub mod config;
pub mod oci;
pub mod ops;
pub mod provider;
pub mod report;
pub mod retention;
pub mod retry;
pub mod session;
pub mod test_support;

pub use backup::{BackupRecord, BackupType, LifecycleState, SourceType, VolumeKind};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, KeeperConfig, OciConfig};
pub use oci::{OciCli, OciCliSettings};
pub use ops::{OpsError, ReportRow, RowOutcome, RunReport, Tally};
pub use provider::{CloudProvider, ProviderError};
pub use report::{ReportError, ReportWriter};
pub use retention::{AgeRetention, CountRetention, RetentionError};
pub use retry::{MutationExecutor, MutationOutcome, OperationKind, RetryPolicy};
pub use session::{Session, SessionError};
