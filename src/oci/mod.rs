//! [`CloudProvider`] backed by the `oci` command-line client.
//!
//! Every call is one CLI invocation with `--output json`. Listing calls
//! fetch a single page and surface the `opc-next-page` token; failures are
//! decoded from the `ServiceError:` body the CLI prints on stderr.

mod wire;

use std::ffi::OsString;

use camino::Utf8PathBuf;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::backup::{BackupRecord, VolumeKind};
use crate::command::{CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::provider::{
    BackupPolicy, BackupQuery, CloudProvider, Compartment, CreateBackupRequest, Instance, Page,
    PolicyAssignment, PolicySchedule, ProviderError, ProviderFuture, ServiceError, Volume,
    VolumeAttachment,
};

use self::wire::{
    Envelope, WireAssignment, WireAttachment, WireBackup, WireCompartment, WireInstance,
    WirePolicy, WireVolume,
};

/// Default `oci` CLI binary name.
pub const DEFAULT_OCI_BIN: &str = "oci";

/// Marker printed by the CLI before a structured error body.
const SERVICE_ERROR_MARKER: &str = "ServiceError:";

/// Errors raised when building [`OciCliSettings`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OciSettingsError {
    /// Raised when a required field is blank.
    #[error("missing {field}")]
    Missing {
        /// Name of the missing field.
        field: String,
    },
}

/// Connection settings for one region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OciCliSettings {
    cli_bin: String,
    region: String,
    profile: Option<String>,
    config_file: Option<Utf8PathBuf>,
}

impl OciCliSettings {
    /// Creates settings, trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`OciSettingsError::Missing`] when the binary or region is
    /// blank.
    pub fn new(
        cli_bin: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, OciSettingsError> {
        let trimmed_bin = cli_bin.into().trim().to_owned();
        let trimmed_region = region.into().trim().to_owned();
        if trimmed_bin.is_empty() {
            return Err(OciSettingsError::Missing {
                field: String::from("cli_bin"),
            });
        }
        if trimmed_region.is_empty() {
            return Err(OciSettingsError::Missing {
                field: String::from("region"),
            });
        }
        Ok(Self {
            cli_bin: trimmed_bin,
            region: trimmed_region,
            profile: None,
            config_file: None,
        })
    }

    /// Selects a named profile from the CLI config file.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile.filter(|value| !value.trim().is_empty());
        self
    }

    /// Points the CLI at a non-default config file.
    #[must_use]
    pub fn with_config_file(mut self, config_file: Option<Utf8PathBuf>) -> Self {
        self.config_file = config_file;
        self
    }

    /// Region the CLI targets.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Drives the `oci` CLI through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct OciCli<R: CommandRunner> {
    settings: OciCliSettings,
    runner: R,
}

impl OciCli<ProcessCommandRunner> {
    /// Creates a client wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(settings: OciCliSettings) -> Self {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> OciCli<R> {
    /// Creates a client using the provided settings and runner.
    #[must_use]
    pub const fn new(settings: OciCliSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Appends the flags every invocation carries.
    fn finish_args(&self, mut args: Vec<OsString>) -> Vec<OsString> {
        args.push(OsString::from("--region"));
        args.push(OsString::from(&self.settings.region));
        if let Some(profile) = &self.settings.profile {
            args.push(OsString::from("--profile"));
            args.push(OsString::from(profile));
        }
        if let Some(config_file) = &self.settings.config_file {
            args.push(OsString::from("--config-file"));
            args.push(OsString::from(config_file.as_str()));
        }
        args.push(OsString::from("--output"));
        args.push(OsString::from("json"));
        args
    }

    async fn run_oci(&self, args: Vec<OsString>, resource: &str) -> Result<String, ProviderError> {
        let full_args = self.finish_args(args);
        debug!(
            program = %self.settings.cli_bin,
            region = %self.settings.region,
            %resource,
            "invoking oci"
        );
        let output = self.runner.run(&self.settings.cli_bin, &full_args).await?;
        check_output(&self.settings.cli_bin, output, resource)
    }

    async fn list_page<W, T>(
        &self,
        mut args: Vec<OsString>,
        page: Option<String>,
        resource: &str,
        convert: impl Fn(W) -> Option<T>,
    ) -> Result<Page<T>, ProviderError>
    where
        W: DeserializeOwned,
    {
        if let Some(token) = page {
            args.push(OsString::from("--page"));
            args.push(OsString::from(token));
        }
        let stdout = self.run_oci(args, resource).await?;
        if stdout.trim().is_empty() {
            return Ok(Page::last(Vec::new()));
        }
        let envelope: Envelope<Vec<W>> = parse_json(&stdout, resource)?;
        Ok(Page {
            items: envelope.data.into_iter().filter_map(convert).collect(),
            next_page: envelope.next_page,
        })
    }
}

/// Converts a failed invocation into a [`ProviderError`].
fn check_output(
    program: &str,
    output: CommandOutput,
    resource: &str,
) -> Result<String, ProviderError> {
    if output.is_success() {
        return Ok(output.stdout);
    }
    if let Some(service) = parse_service_error(&output.stderr) {
        return Err(ProviderError::Service(service));
    }
    Err(ProviderError::CommandFailure {
        program: program.to_owned(),
        status: output.code,
        status_text: output.status_text(),
        stderr: format!("{resource}: {}", output.stderr.trim()),
    })
}

/// Extracts the JSON body following `ServiceError:` on stderr.
pub(crate) fn parse_service_error(stderr: &str) -> Option<ServiceError> {
    let marker = stderr.find(SERVICE_ERROR_MARKER)?;
    let tail = stderr.get(marker..)?;
    let start = tail.find('{')?;
    let end = tail.rfind('}')?;
    let body = tail.get(start..=end)?;
    serde_json::from_str(body).ok()
}

fn parse_json<T: DeserializeOwned>(stdout: &str, resource: &str) -> Result<T, ProviderError> {
    serde_json::from_str(stdout).map_err(|err| ProviderError::Parse {
        resource: resource.to_owned(),
        message: err.to_string(),
    })
}

fn os_args(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

const fn backup_family(kind: VolumeKind) -> &'static str {
    match kind {
        VolumeKind::Boot => "boot-volume-backup",
        VolumeKind::Block => "backup",
    }
}

const fn volume_family(kind: VolumeKind) -> &'static str {
    match kind {
        VolumeKind::Boot => "boot-volume",
        VolumeKind::Block => "volume",
    }
}

const fn volume_id_flag(kind: VolumeKind) -> &'static str {
    match kind {
        VolumeKind::Boot => "--boot-volume-id",
        VolumeKind::Block => "--volume-id",
    }
}

const fn backup_id_flag(kind: VolumeKind) -> &'static str {
    match kind {
        VolumeKind::Boot => "--boot-volume-backup-id",
        VolumeKind::Block => "--volume-backup-id",
    }
}

impl<R: CommandRunner> CloudProvider for OciCli<R> {
    fn region(&self) -> &str {
        self.settings.region()
    }

    fn list_compartments<'a>(
        &'a self,
        tenancy_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Compartment>> {
        Box::pin(async move {
            let args = os_args(&[
                "iam",
                "compartment",
                "list",
                "--compartment-id",
                tenancy_id,
                "--compartment-id-in-subtree",
                "true",
                "--access-level",
                "ANY",
            ]);
            self.list_page(args, page, "compartments", |wire: WireCompartment| {
                Some(Compartment::from(wire))
            })
            .await
        })
    }

    fn list_volumes<'a>(
        &'a self,
        kind: VolumeKind,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Volume>> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                volume_family(kind),
                "list",
                "--compartment-id",
                compartment_id,
            ]);
            self.list_page(args, page, "volumes", |wire: WireVolume| {
                Some(wire.into_volume(kind))
            })
            .await
        })
    }

    fn get_volume<'a>(
        &'a self,
        kind: VolumeKind,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Volume> {
        Box::pin(async move {
            let args = os_args(&["bv", volume_family(kind), "get", volume_id_flag(kind), volume_id]);
            let stdout = self.run_oci(args, "volume").await?;
            let envelope: Envelope<WireVolume> = parse_json(&stdout, "volume")?;
            Ok(envelope.data.into_volume(kind))
        })
    }

    fn list_backups<'a>(
        &'a self,
        query: &'a BackupQuery,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupRecord>> {
        Box::pin(async move {
            let mut args = os_args(&[
                "bv",
                backup_family(query.kind),
                "list",
                "--compartment-id",
                &query.compartment_id,
            ]);
            if let Some(volume_id) = &query.volume_id {
                args.push(OsString::from(volume_id_flag(query.kind)));
                args.push(OsString::from(volume_id));
            }
            let kind = query.kind;
            self.list_page(args, page, "volume backups", |wire: WireBackup| {
                Some(wire.into_record(kind))
            })
            .await
        })
    }

    fn list_instances<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Instance>> {
        Box::pin(async move {
            let args = os_args(&[
                "compute",
                "instance",
                "list",
                "--compartment-id",
                compartment_id,
            ]);
            self.list_page(args, page, "instances", |wire: WireInstance| {
                Some(Instance::from(wire))
            })
            .await
        })
    }

    fn list_attachments<'a>(
        &'a self,
        kind: VolumeKind,
        instance: &'a Instance,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<VolumeAttachment>> {
        Box::pin(async move {
            let mut args = match kind {
                VolumeKind::Boot => os_args(&[
                    "compute",
                    "boot-volume-attachment",
                    "list",
                    "--availability-domain",
                    &instance.availability_domain,
                ]),
                VolumeKind::Block => os_args(&["compute", "volume-attachment", "list"]),
            };
            args.extend(os_args(&[
                "--compartment-id",
                &instance.compartment_id,
                "--instance-id",
                &instance.id,
            ]));
            self.list_page(args, page, "volume attachments", |wire: WireAttachment| {
                wire.into_attachment(kind)
            })
            .await
        })
    }

    fn list_backup_policies<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupPolicy>> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                "volume-backup-policy",
                "list",
                "--compartment-id",
                compartment_id,
            ]);
            self.list_page(args, page, "backup policies", |wire: WirePolicy| {
                Some(BackupPolicy::from(wire))
            })
            .await
        })
    }

    fn get_policy_assignment<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> ProviderFuture<'a, Option<PolicyAssignment>> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                "volume-backup-policy-assignment",
                "get-volume-backup-policy-asset-assignment",
                "--asset-id",
                asset_id,
            ]);
            let stdout = self.run_oci(args, "policy assignment").await?;
            if stdout.trim().is_empty() {
                return Ok(None);
            }
            let envelope: Envelope<Vec<WireAssignment>> =
                parse_json(&stdout, "policy assignment")?;
            Ok(envelope
                .data
                .into_iter()
                .next()
                .map(PolicyAssignment::from))
        })
    }

    fn create_backup<'a>(
        &'a self,
        request: &'a CreateBackupRequest,
    ) -> ProviderFuture<'a, BackupRecord> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                backup_family(request.kind),
                "create",
                volume_id_flag(request.kind),
                &request.volume_id,
                "--display-name",
                &request.display_name,
                "--type",
                request.backup_type.as_str(),
            ]);
            let stdout = self.run_oci(args, "backup create").await?;
            let envelope: Envelope<WireBackup> = parse_json(&stdout, "backup create")?;
            Ok(envelope.data.into_record(request.kind))
        })
    }

    fn delete_backup<'a>(
        &'a self,
        kind: VolumeKind,
        backup_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                backup_family(kind),
                "delete",
                backup_id_flag(kind),
                backup_id,
                "--force",
            ]);
            self.run_oci(args, "backup delete").await.map(|_| ())
        })
    }

    fn assign_policy<'a>(
        &'a self,
        asset_id: &'a str,
        policy_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let args = os_args(&[
                "bv",
                "volume-backup-policy-assignment",
                "create",
                "--asset-id",
                asset_id,
                "--policy-id",
                policy_id,
            ]);
            self.run_oci(args, "policy assignment").await.map(|_| ())
        })
    }

    fn update_policy_schedules<'a>(
        &'a self,
        policy_id: &'a str,
        schedules: &'a [PolicySchedule],
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let encoded = serde_json::to_string(schedules).map_err(|err| ProviderError::Parse {
                resource: String::from("policy schedules"),
                message: err.to_string(),
            })?;
            let args = os_args(&[
                "bv",
                "volume-backup-policy",
                "update",
                "--policy-id",
                policy_id,
                "--schedules",
                &encoded,
                "--force",
            ]);
            self.run_oci(args, "policy update").await.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests;
