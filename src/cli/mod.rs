//! Command-line interface definitions for the `bvkeeper` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `bvkeeper` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bvkeeper",
    about = "Backup retention, policy and audit operations for OCI volumes",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Overrides applied on top of the layered configuration.
    #[command(flatten)]
    pub(crate) scope: ScopeArgs,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Flags shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct ScopeArgs {
    /// Region to operate in (overrides `BVKEEPER_OCI_REGION`).
    #[arg(long, global = true, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Compartment name or OCID (overrides `BVKEEPER_OCI_COMPARTMENT`).
    #[arg(long, global = true, value_name = "NAME")]
    pub(crate) compartment: Option<String>,
    /// Directory receiving JSON Lines reports; rows go to stdout otherwise.
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) report_dir: Option<String>,
}

/// Subcommands of `bvkeeper`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Keep the newest N keyword-tagged backups of every volume.
    #[command(name = "prune-count")]
    PruneCount(PruneCountCommand),
    /// Delete backups older than a number of days.
    #[command(name = "prune-age")]
    PruneAge(PruneAgeCommand),
    /// Create a full backup of every available volume.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Assign a backup policy to every volume.
    #[command(name = "assign-policy")]
    AssignPolicy(AssignPolicyCommand),
    /// Move a backup policy's schedules to the next full hour.
    #[command(name = "reschedule")]
    Reschedule(RescheduleCommand),
    /// Audit backup coverage of the compartment's instances.
    #[command(name = "audit")]
    Audit(AuditCommand),
}

/// Volume family selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum KindArg {
    /// Boot volumes.
    Boot,
    /// Block volumes.
    Block,
}

/// Arguments for `bvkeeper prune-count`.
#[derive(Debug, Args)]
pub(crate) struct PruneCountCommand {
    /// Volume family to prune.
    #[arg(long, value_enum)]
    pub(crate) kind: KindArg,
    /// Backups kept per volume (overrides `BVKEEPER_RETENTION_COUNT`).
    #[arg(long, value_name = "N")]
    pub(crate) keep: Option<u32>,
    /// Name fragment of managed backups (overrides `BVKEEPER_KEYWORD`).
    #[arg(long, value_name = "TEXT")]
    pub(crate) keyword: Option<String>,
    /// Report candidates without deleting them.
    #[arg(long)]
    pub(crate) dry_run: bool,
}

/// Arguments for `bvkeeper prune-age`.
#[derive(Debug, Args)]
pub(crate) struct PruneAgeCommand {
    /// Volume family to prune.
    #[arg(long, value_enum)]
    pub(crate) kind: KindArg,
    /// Age window in days (overrides `BVKEEPER_RETENTION_DAYS`).
    #[arg(long, value_name = "DAYS")]
    pub(crate) days: Option<u32>,
    /// Report candidates without deleting them.
    #[arg(long)]
    pub(crate) dry_run: bool,
}

/// Arguments for `bvkeeper create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Volume family to back up.
    #[arg(long, value_enum)]
    pub(crate) kind: KindArg,
    /// After each backup, delete that volume's backups older than DAYS.
    #[arg(long, value_name = "DAYS")]
    pub(crate) prune_days: Option<u32>,
}

/// Arguments for `bvkeeper assign-policy`.
#[derive(Debug, Args)]
pub(crate) struct AssignPolicyCommand {
    /// Volume family to update.
    #[arg(long, value_enum)]
    pub(crate) kind: KindArg,
    /// Policy display name or OCID.
    #[arg(long, value_name = "POLICY")]
    pub(crate) policy: String,
}

/// Arguments for `bvkeeper reschedule`.
#[derive(Debug, Args)]
pub(crate) struct RescheduleCommand {
    /// Policy display name or OCID.
    #[arg(long, value_name = "POLICY")]
    pub(crate) policy: String,
}

/// Backup origin filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum SourceArg {
    /// Manual backups.
    Manual,
    /// Policy-driven backups.
    Scheduled,
}

/// Backup content filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum TypeArg {
    /// Full backups.
    Full,
    /// Incremental backups.
    Incremental,
}

/// Arguments for `bvkeeper audit`.
#[derive(Debug, Args)]
pub(crate) struct AuditCommand {
    /// Audit at most N instances.
    #[arg(long, value_name = "N")]
    pub(crate) limit: Option<usize>,
    /// Instances audited concurrently (overrides `BVKEEPER_WORKERS`).
    #[arg(long, value_name = "N")]
    pub(crate) workers: Option<u32>,
    /// Count only backups of this origin.
    #[arg(long, value_enum)]
    pub(crate) source_type: Option<SourceArg>,
    /// Count only backups of this type.
    #[arg(long, value_enum)]
    pub(crate) backup_type: Option<TypeArg>,
    /// Count only backups in this lifecycle state (for example `AVAILABLE`).
    #[arg(long, value_name = "STATE")]
    pub(crate) lifecycle_state: Option<String>,
}
