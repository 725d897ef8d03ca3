//! Binary entry point for the `bvkeeper` CLI.

use std::io::{self, Write};
use std::process;

use chrono::{DateTime, Utc};
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bvkeeper::backup::{BackupType, LifecycleState, SourceType, VolumeKind};
use bvkeeper::config::{self, ConfigError, KeeperConfig, OciConfig};
use bvkeeper::oci::OciCli;
use bvkeeper::ops::{
    self, AuditFilter, AuditRequest, CreatePlan, OpsError, PruneMode, ReportRow, RunReport,
};
use bvkeeper::report::{ReportError, ReportWriter, render_jsonl};
use bvkeeper::retention::{AgeRetention, CountRetention};
use bvkeeper::retry::MutationExecutor;
use bvkeeper::session::{Session, SessionError};

mod cli;

use cli::{Cli, Command, KindArg, ScopeArgs, SourceArg, TypeArg};

/// Exit code when at least one item failed.
const EXIT_ITEM_FAILURES: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Ops(#[from] OpsError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
    #[error("invalid argument: {0}")]
    Usage(String),
    #[error("failed to write report to stdout: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

fn load_config(scope: ScopeArgs) -> Result<(OciConfig, KeeperConfig), CliError> {
    let mut oci = OciConfig::load_without_cli_args()?;
    let mut keeper = KeeperConfig::load_without_cli_args()?;
    if let Some(region) = scope.region {
        oci.region = region;
    }
    if let Some(compartment) = scope.compartment {
        oci.compartment = compartment;
    }
    if let Some(report_dir) = scope.report_dir {
        keeper.report_dir = Some(report_dir);
    }
    oci.validate()?;
    keeper.validate()?;
    Ok((oci, keeper))
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let (oci, keeper) = load_config(cli.scope)?;
    let started = Utc::now();
    let executor = MutationExecutor::new(keeper.retry_policy()?);
    let output = Output {
        writer: keeper.report_dir().map(ReportWriter::new),
        started,
    };
    let plan = Plan::build(cli.command, keeper)?;
    let provider = OciCli::with_process_runner(oci.cli_settings()?);
    let session = Session::open(provider, executor, &oci.tenancy_id, &oci.compartment).await?;

    match plan {
        Plan::PruneCount { kind, rule, mode } => {
            let report = ops::prune_by_count(&session, kind, &rule, mode).await?;
            output.emit("prune-count", &report)
        }
        Plan::PruneAge { kind, rule, mode } => {
            let report = ops::prune_by_age(&session, kind, &rule, started, mode).await?;
            output.emit("prune-age", &report)
        }
        Plan::Create { kind, plan } => {
            let run = ops::create_backups(&session, kind, &plan, started).await?;
            let created = output.emit("create", &run.created)?;
            let pruned = if plan.prune.is_some() {
                output.emit("create-prune", &run.pruned)?
            } else {
                0
            };
            Ok(created.max(pruned))
        }
        Plan::AssignPolicy { kind, policy } => {
            let report = ops::assign_policy(&session, kind, &policy).await?;
            output.emit("assign-policy", &report)
        }
        Plan::Reschedule { policy } => {
            let report = ops::reschedule_policy(&session, &policy, started).await?;
            output.emit("reschedule", &report)
        }
        Plan::Audit(request) => {
            let report = ops::audit_backups(&session, &request, started).await?;
            output.emit("audit", &report)
        }
    }
}

/// A subcommand with its arguments merged over the configuration.
#[derive(Debug)]
enum Plan {
    PruneCount {
        kind: VolumeKind,
        rule: CountRetention,
        mode: PruneMode,
    },
    PruneAge {
        kind: VolumeKind,
        rule: AgeRetention,
        mode: PruneMode,
    },
    Create {
        kind: VolumeKind,
        plan: CreatePlan,
    },
    AssignPolicy {
        kind: VolumeKind,
        policy: String,
    },
    Reschedule {
        policy: String,
    },
    Audit(AuditRequest),
}

impl Plan {
    /// Validates subcommand arguments before any provider call is made.
    fn build(command: Command, mut keeper: KeeperConfig) -> Result<Self, CliError> {
        match command {
            Command::PruneCount(args) => {
                if args.keep == Some(0) {
                    return Err(usage("--keep must be at least 1"));
                }
                if args.keyword.as_deref().is_some_and(|word| word.trim().is_empty()) {
                    return Err(usage("--keyword must not be empty"));
                }
                if let Some(keep) = args.keep {
                    keeper.retention_count = keep;
                }
                if let Some(keyword) = args.keyword {
                    keeper.keyword = keyword;
                }
                Ok(Self::PruneCount {
                    kind: volume_kind(args.kind),
                    rule: keeper.count_rule(),
                    mode: mode(args.dry_run),
                })
            }
            Command::PruneAge(args) => {
                if let Some(days) = args.days {
                    keeper.retention_days = days;
                }
                Ok(Self::PruneAge {
                    kind: volume_kind(args.kind),
                    rule: keeper.age_rule()?,
                    mode: mode(args.dry_run),
                })
            }
            Command::Create(args) => Ok(Self::Create {
                kind: volume_kind(args.kind),
                plan: CreatePlan {
                    prefix: keeper.backup_prefix,
                    keyword: keeper.keyword,
                    backup_type: BackupType::Full,
                    prune: args.prune_days.map(config::age_rule).transpose()?,
                },
            }),
            Command::AssignPolicy(args) => Ok(Self::AssignPolicy {
                kind: volume_kind(args.kind),
                policy: required_policy(args.policy)?,
            }),
            Command::Reschedule(args) => Ok(Self::Reschedule {
                policy: required_policy(args.policy)?,
            }),
            Command::Audit(args) => {
                if args.workers == Some(0) {
                    return Err(usage("--workers must be at least 1"));
                }
                let workers = args.workers.unwrap_or(keeper.workers);
                Ok(Self::Audit(AuditRequest {
                    rule: keeper.freshness_rule(),
                    filter: AuditFilter {
                        source_type: args.source_type.map(source_type),
                        backup_type: args.backup_type.map(backup_type),
                        lifecycle_state: args.lifecycle_state.map(LifecycleState::from),
                    },
                    limit: args.limit,
                    workers: usize::try_from(workers).unwrap_or(usize::MAX),
                }))
            }
        }
    }
}

fn usage(message: &str) -> CliError {
    CliError::Usage(message.to_owned())
}

fn required_policy(policy: String) -> Result<String, CliError> {
    if policy.trim().is_empty() {
        return Err(usage("--policy must not be empty"));
    }
    Ok(policy)
}

/// Destination of report rows for one invocation.
struct Output {
    writer: Option<ReportWriter>,
    started: DateTime<Utc>,
}

impl Output {
    fn emit<R: ReportRow>(&self, command: &str, report: &RunReport<R>) -> Result<i32, CliError> {
        let tally = report.tally();
        match &self.writer {
            Some(writer) => {
                let path = writer.write(command, report, self.started)?;
                info!(%command, report = %path, "report written");
            }
            None => {
                let rendered = render_jsonl(report.rows())?;
                io::stdout()
                    .write_all(rendered.as_bytes())
                    .map_err(|err| CliError::Output(err.to_string()))?;
            }
        }
        info!(
            %command,
            succeeded = tally.succeeded,
            failed = tally.failed,
            skipped = tally.skipped,
            "run complete"
        );
        Ok(exit_code(report))
    }
}

const fn exit_code<R: ReportRow>(report: &RunReport<R>) -> i32 {
    if report.has_failures() {
        EXIT_ITEM_FAILURES
    } else {
        0
    }
}

const fn mode(dry_run: bool) -> PruneMode {
    if dry_run {
        PruneMode::DryRun
    } else {
        PruneMode::Apply
    }
}

const fn volume_kind(kind: KindArg) -> VolumeKind {
    match kind {
        KindArg::Boot => VolumeKind::Boot,
        KindArg::Block => VolumeKind::Block,
    }
}

const fn source_type(source: SourceArg) -> SourceType {
    match source {
        SourceArg::Manual => SourceType::Manual,
        SourceArg::Scheduled => SourceType::Scheduled,
    }
}

const fn backup_type(kind: TypeArg) -> BackupType {
    match kind {
        TypeArg::Full => BackupType::Full,
        TypeArg::Incremental => BackupType::Incremental,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use bvkeeper::ops::{AssignRow, AssignStatus, Scope};
    use rstest::rstest;

    fn row(status: AssignStatus) -> AssignRow {
        AssignRow {
            scope: Scope {
                region: String::from("r"),
                compartment: String::from("c"),
            },
            kind: VolumeKind::Boot,
            volume_id: String::from("vol"),
            volume_name: String::from("vol"),
            policy_id: String::from("p"),
            status,
            attempts: 1,
            error: None,
        }
    }

    fn keeper() -> KeeperConfig {
        KeeperConfig {
            keyword: String::from(config::DEFAULT_KEYWORD),
            retention_count: 5,
            retention_days: 15,
            max_attempts: 5,
            base_wait_secs: 5,
            jitter_millis: 5000,
            workers: 5,
            backup_prefix: String::from(config::DEFAULT_BACKUP_PREFIX),
            report_dir: None,
            audit_min_backups: 3,
            audit_max_age_minutes: 90,
            audit_interval_minutes: 60,
        }
    }

    fn plan_for(args: &[&str]) -> Result<Plan, CliError> {
        let cli = Cli::try_parse_from(std::iter::once("bvkeeper").chain(args.iter().copied()))
            .expect("parse");
        Plan::build(cli.command, keeper())
    }

    #[rstest]
    #[case(&["prune-count", "--kind", "boot", "--keep", "0"], "--keep must be at least 1")]
    #[case(&["prune-count", "--kind", "boot", "--keyword", " "], "--keyword must not be empty")]
    #[case(&["audit", "--workers", "0"], "--workers must be at least 1")]
    #[case(&["reschedule", "--policy", ""], "--policy must not be empty")]
    fn plan_rejects_invalid_arguments(#[case] args: &[&str], #[case] expected: &str) {
        let err = plan_for(args).expect_err("invalid arguments");
        assert_eq!(err.to_string(), format!("invalid argument: {expected}"));
    }

    #[test]
    fn plan_merges_count_overrides_into_the_configured_rule() {
        let plan = plan_for(&["prune-count", "--kind", "block", "--keep", "3", "--keyword", "NIGHTLY-"])
            .expect("plan");
        let Plan::PruneCount { kind, rule, mode } = plan else {
            panic!("expected prune-count plan, got {plan:?}");
        };
        assert_eq!(kind, VolumeKind::Block);
        assert_eq!(rule.keep(), 3);
        assert_eq!(rule.keyword(), "NIGHTLY-");
        assert_eq!(mode, PruneMode::Apply);
    }

    #[test]
    fn plan_falls_back_to_configured_count_rule() {
        let plan = plan_for(&["prune-count", "--kind", "boot"]).expect("plan");
        let Plan::PruneCount { rule, .. } = plan else {
            panic!("expected prune-count plan, got {plan:?}");
        };
        assert_eq!(rule, keeper().count_rule());
    }

    #[test]
    fn plan_rejects_age_windows_beyond_the_calendar() {
        let err = plan_for(&["prune-age", "--kind", "boot", "--days", "4294967295"])
            .expect_err("window out of range");
        assert!(
            err.to_string().contains("BVKEEPER_RETENTION_DAYS"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    #[case(&[AssignStatus::Assigned, AssignStatus::Skipped], 0)]
    #[case(&[AssignStatus::Assigned, AssignStatus::Failed], EXIT_ITEM_FAILURES)]
    #[case(&[], 0)]
    fn exit_code_reflects_item_failures(#[case] statuses: &[AssignStatus], #[case] expected: i32) {
        let mut report = RunReport::new();
        for status in statuses {
            report.push(row(*status));
        }
        assert_eq!(exit_code(&report), expected);
    }

    #[test]
    fn write_error_prints_message() {
        let mut buffer = Vec::new();
        write_error(
            &mut buffer,
            &CliError::Usage(String::from("--keep must be at least 1")),
        );
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "invalid argument: --keep must be at least 1\n"
        );
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "bvkeeper",
            "prune-count",
            "--kind",
            "boot",
            "--dry-run",
            "--region",
            "sa-vinhedo-1",
        ])
        .expect("parse");
        assert_eq!(cli.scope.region.as_deref(), Some("sa-vinhedo-1"));
        let Command::PruneCount(args) = cli.command else {
            panic!("expected prune-count");
        };
        assert_eq!(volume_kind(args.kind), VolumeKind::Boot);
        assert_eq!(mode(args.dry_run), PruneMode::DryRun);
    }
}
