//! Test support utilities shared across unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::backup::{BackupRecord, BackupType, LifecycleState, SourceType, VolumeKind};
use crate::command::{CommandError, CommandOutput, CommandRunner, RunnerFuture};
use crate::provider::{
    BackupPolicy, BackupQuery, CloudProvider, Compartment, CreateBackupRequest, Instance, Page,
    PolicyAssignment, PolicySchedule, ProviderError, ProviderFuture, ServiceError, Volume,
    VolumeAttachment,
};
use crate::retry::{Jitter, SleepFuture, Sleeper};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        self.args
            .iter()
            .skip_while(|arg| arg.to_string_lossy() != flag)
            .nth(1)
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status with `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failure carrying a provider service error on stderr.
    pub fn push_service_error(&self, status: u16, code: &str) {
        self.push_output(Some(1), "", service_error_stderr(status, code));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> RunnerFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            });
        Box::pin(std::future::ready(response))
    }
}

/// Sleeper that records requested waits and returns immediately.
#[derive(Clone, Debug, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Creates a sleeper with no recorded waits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the waits requested so far.
    #[must_use]
    pub fn waits(&self) -> Vec<Duration> {
        lock(&self.waits).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        lock(&self.waits).push(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Jitter source that always returns the same duration, capped below the
/// bound.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedJitter(pub Duration);

impl Jitter for FixedJitter {
    fn sample(&self, bound: Duration) -> Duration {
        if bound.is_zero() {
            return Duration::ZERO;
        }
        self.0.min(bound.saturating_sub(Duration::from_nanos(1)))
    }
}

/// Builds a [`ServiceError`] with the given status and code.
#[must_use]
pub fn service_error(status: u16, code: &str) -> ProviderError {
    ProviderError::Service(ServiceError {
        status,
        code: code.to_owned(),
        message: format!("simulated {code}"),
        request_id: Some(String::from("req-test")),
    })
}

/// Renders the stderr produced by the OCI CLI for a service error.
#[must_use]
pub fn service_error_stderr(status: u16, code: &str) -> String {
    let body = json!({
        "code": code,
        "message": format!("simulated {code}"),
        "opc-request-id": "req-test",
        "operation_name": "simulated",
        "status": status,
        "target_service": "blockstorage",
    });
    format!("ServiceError:\n{body:#}\n")
}

/// Builds an AVAILABLE manual full backup record.
#[must_use]
pub fn backup(
    id: &str,
    display_name: &str,
    volume_id: &str,
    time_created: DateTime<Utc>,
) -> BackupRecord {
    BackupRecord {
        id: id.to_owned(),
        display_name: display_name.to_owned(),
        volume_id: volume_id.to_owned(),
        time_created,
        lifecycle_state: LifecycleState::Available,
        source_type: SourceType::Manual,
        backup_type: BackupType::Full,
        kind: VolumeKind::Boot,
    }
}

/// Builds an AVAILABLE volume record.
#[must_use]
pub fn volume(id: &str, display_name: &str, kind: VolumeKind) -> Volume {
    Volume {
        id: id.to_owned(),
        display_name: display_name.to_owned(),
        kind,
        lifecycle_state: LifecycleState::Available,
        size_in_gbs: Some(50),
    }
}

/// Wraps `items` in the CLI's `{"data": [...]}` envelope.
#[must_use]
pub fn json_page(items: &[Value], next_page: Option<&str>) -> String {
    let mut envelope = json!({ "data": items });
    if let (Some(token), Some(map)) = (next_page, envelope.as_object_mut()) {
        map.insert(String::from("opc-next-page"), json!(token));
    }
    envelope.to_string()
}

/// Renders one backup as the CLI prints it.
#[must_use]
pub fn json_backup(record: &BackupRecord) -> Value {
    let volume_key = match record.kind {
        VolumeKind::Boot => "boot-volume-id",
        VolumeKind::Block => "volume-id",
    };
    let mut value = json!({
        "id": record.id,
        "display-name": record.display_name,
        "time-created": record.time_created.to_rfc3339(),
        "lifecycle-state": record.lifecycle_state.as_str(),
        "source-type": record.source_type.as_str(),
        "type": record.backup_type.as_str(),
    });
    if let Some(map) = value.as_object_mut() {
        map.insert(volume_key.to_owned(), json!(record.volume_id));
    }
    value
}

/// Calls recorded by [`FakeProvider`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FakeCall {
    /// `list_compartments`.
    ListCompartments,
    /// `list_volumes`.
    ListVolumes,
    /// `get_volume`.
    GetVolume,
    /// `list_backups`.
    ListBackups,
    /// `list_instances`.
    ListInstances,
    /// `list_attachments`.
    ListAttachments,
    /// `list_backup_policies`.
    ListPolicies,
    /// `get_policy_assignment`.
    GetAssignment,
    /// `create_backup`.
    CreateBackup,
    /// `delete_backup`.
    DeleteBackup,
    /// `assign_policy`.
    AssignPolicy,
    /// `update_policy_schedules`.
    UpdatePolicy,
}

#[derive(Debug, Default)]
struct FakeState {
    compartments: Vec<Compartment>,
    volumes: Vec<Volume>,
    backups: Vec<BackupRecord>,
    instances: Vec<Instance>,
    attachments: Vec<VolumeAttachment>,
    policies: Vec<BackupPolicy>,
    assignments: Vec<PolicyAssignment>,
    failures: HashMap<FakeCall, VecDeque<ProviderError>>,
    calls: Vec<(FakeCall, String)>,
    page_size: Option<usize>,
    next_id: usize,
}

/// In-memory provider used to exercise the operations without a cloud.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ACTIVE compartment.
    pub fn add_compartment(&self, id: &str, name: &str) {
        lock(&self.state).compartments.push(Compartment {
            id: id.to_owned(),
            name: name.to_owned(),
            active: true,
        });
    }

    /// Adds a volume.
    pub fn add_volume(&self, volume: Volume) {
        lock(&self.state).volumes.push(volume);
    }

    /// Adds a backup record.
    pub fn add_backup(&self, record: BackupRecord) {
        lock(&self.state).backups.push(record);
    }

    /// Adds an instance.
    pub fn add_instance(&self, instance: Instance) {
        lock(&self.state).instances.push(instance);
    }

    /// Adds a volume attachment.
    pub fn add_attachment(&self, attachment: VolumeAttachment) {
        lock(&self.state).attachments.push(attachment);
    }

    /// Adds a backup policy.
    pub fn add_policy(&self, policy: BackupPolicy) {
        lock(&self.state).policies.push(policy);
    }

    /// Records an existing policy assignment.
    pub fn add_assignment(&self, asset_id: &str, policy_id: &str) {
        let mut state = lock(&self.state);
        state.next_id = state.next_id.saturating_add(1);
        let id = format!("assignment-{}", state.next_id);
        state.assignments.push(PolicyAssignment {
            id,
            policy_id: policy_id.to_owned(),
            asset_id: asset_id.to_owned(),
        });
    }

    /// Splits every listing into pages of `size` records.
    pub fn paginate(&self, size: usize) {
        lock(&self.state).page_size = Some(size.max(1));
    }

    /// Makes the next call of `call` fail with `error`. Errors queue up in
    /// FIFO order per call.
    pub fn fail_next(&self, call: FakeCall, error: ProviderError) {
        lock(&self.state)
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Returns the target of every recorded call of `call`.
    #[must_use]
    pub fn calls(&self, call: FakeCall) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|(recorded, _)| *recorded == call)
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// Returns the backups currently known, including terminating ones.
    #[must_use]
    pub fn backups(&self) -> Vec<BackupRecord> {
        lock(&self.state).backups.clone()
    }

    /// Returns the current policies.
    #[must_use]
    pub fn policies(&self) -> Vec<BackupPolicy> {
        lock(&self.state).policies.clone()
    }

    /// Returns the current policy assignments.
    #[must_use]
    pub fn assignments(&self) -> Vec<PolicyAssignment> {
        lock(&self.state).assignments.clone()
    }

    fn record<T>(
        &self,
        call: FakeCall,
        target: &str,
        respond: impl FnOnce(&mut FakeState) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut state = lock(&self.state);
        state.calls.push((call, target.to_owned()));
        if let Some(error) = state
            .failures
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        respond(&mut state)
    }

    fn page<'a, T: Clone + Send + 'a>(
        &self,
        call: FakeCall,
        target: &str,
        page: Option<&str>,
        select: impl FnOnce(&FakeState) -> Vec<T>,
    ) -> ProviderFuture<'a, Page<T>> {
        let result = self.record(call, target, |state| {
            let all = select(state);
            let start = page.and_then(|token| token.parse::<usize>().ok()).unwrap_or(0);
            let size = state.page_size.unwrap_or(usize::MAX);
            let items: Vec<T> = all.iter().skip(start).take(size).cloned().collect();
            let end = start.saturating_add(items.len());
            let next_page = (end < all.len()).then(|| end.to_string());
            Ok(Page { items, next_page })
        });
        Box::pin(std::future::ready(result))
    }
}

impl CloudProvider for FakeProvider {
    fn region(&self) -> &str {
        "fake-region-1"
    }

    fn list_compartments<'a>(
        &'a self,
        tenancy_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Compartment>> {
        self.page(
            FakeCall::ListCompartments,
            tenancy_id,
            page.as_deref(),
            |state| state.compartments.clone(),
        )
    }

    fn list_volumes<'a>(
        &'a self,
        kind: VolumeKind,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Volume>> {
        self.page(FakeCall::ListVolumes, compartment_id, page.as_deref(), |state| {
            state
                .volumes
                .iter()
                .filter(|vol| vol.kind == kind)
                .cloned()
                .collect()
        })
    }

    fn get_volume<'a>(
        &'a self,
        kind: VolumeKind,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Volume> {
        let result = self.record(FakeCall::GetVolume, volume_id, |state| {
            state
                .volumes
                .iter()
                .find(|vol| vol.id == volume_id && vol.kind == kind)
                .cloned()
                .ok_or_else(|| not_found(volume_id))
        });
        Box::pin(std::future::ready(result))
    }

    fn list_backups<'a>(
        &'a self,
        query: &'a BackupQuery,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupRecord>> {
        let target = query.volume_id.as_deref().unwrap_or(&query.compartment_id);
        self.page(FakeCall::ListBackups, target, page.as_deref(), |state| {
            state
                .backups
                .iter()
                .filter(|record| record.kind == query.kind)
                .filter(|record| {
                    query
                        .volume_id
                        .as_deref()
                        .is_none_or(|id| record.volume_id == id)
                })
                .cloned()
                .collect()
        })
    }

    fn list_instances<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Instance>> {
        self.page(
            FakeCall::ListInstances,
            compartment_id,
            page.as_deref(),
            |state| state.instances.clone(),
        )
    }

    fn list_attachments<'a>(
        &'a self,
        kind: VolumeKind,
        instance: &'a Instance,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<VolumeAttachment>> {
        self.page(
            FakeCall::ListAttachments,
            &instance.id,
            page.as_deref(),
            |state| {
                state
                    .attachments
                    .iter()
                    .filter(|att| att.kind == kind && att.instance_id == instance.id)
                    .cloned()
                    .collect()
            },
        )
    }

    fn list_backup_policies<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupPolicy>> {
        self.page(
            FakeCall::ListPolicies,
            compartment_id,
            page.as_deref(),
            |state| state.policies.clone(),
        )
    }

    fn get_policy_assignment<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> ProviderFuture<'a, Option<PolicyAssignment>> {
        let result = self.record(FakeCall::GetAssignment, asset_id, |state| {
            Ok(state
                .assignments
                .iter()
                .find(|assignment| assignment.asset_id == asset_id)
                .cloned())
        });
        Box::pin(std::future::ready(result))
    }

    fn create_backup<'a>(
        &'a self,
        request: &'a CreateBackupRequest,
    ) -> ProviderFuture<'a, BackupRecord> {
        let result = self.record(FakeCall::CreateBackup, &request.volume_id, |state| {
            state.next_id = state.next_id.saturating_add(1);
            let record = BackupRecord {
                id: format!("backup-new-{}", state.next_id),
                display_name: request.display_name.clone(),
                volume_id: request.volume_id.clone(),
                time_created: Utc::now(),
                lifecycle_state: LifecycleState::Creating,
                source_type: SourceType::Manual,
                backup_type: request.backup_type.clone(),
                kind: request.kind,
            };
            state.backups.push(record.clone());
            Ok(record)
        });
        Box::pin(std::future::ready(result))
    }

    fn delete_backup<'a>(
        &'a self,
        kind: VolumeKind,
        backup_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        let result = self.record(FakeCall::DeleteBackup, backup_id, |state| {
            let record = state
                .backups
                .iter_mut()
                .find(|record| record.id == backup_id && record.kind == kind)
                .ok_or_else(|| not_found(backup_id))?;
            record.lifecycle_state = LifecycleState::Terminating;
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn assign_policy<'a>(
        &'a self,
        asset_id: &'a str,
        policy_id: &'a str,
    ) -> ProviderFuture<'a, ()> {
        let result = self.record(FakeCall::AssignPolicy, asset_id, |state| {
            if state
                .assignments
                .iter()
                .any(|assignment| assignment.asset_id == asset_id)
            {
                return Err(ProviderError::Service(ServiceError {
                    status: 409,
                    code: String::from("PolicyAssignmentAlreadyExists"),
                    message: String::from("asset already has a policy"),
                    request_id: None,
                }));
            }
            state.next_id = state.next_id.saturating_add(1);
            let id = format!("assignment-{}", state.next_id);
            state.assignments.push(PolicyAssignment {
                id,
                policy_id: policy_id.to_owned(),
                asset_id: asset_id.to_owned(),
            });
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }

    fn update_policy_schedules<'a>(
        &'a self,
        policy_id: &'a str,
        schedules: &'a [PolicySchedule],
    ) -> ProviderFuture<'a, ()> {
        let result = self.record(FakeCall::UpdatePolicy, policy_id, |state| {
            let policy = state
                .policies
                .iter_mut()
                .find(|policy| policy.id == policy_id)
                .ok_or_else(|| not_found(policy_id))?;
            policy.schedules = schedules.to_vec();
            Ok(())
        });
        Box::pin(std::future::ready(result))
    }
}

fn not_found(id: &str) -> ProviderError {
    ProviderError::Service(ServiceError {
        status: 404,
        code: String::from("NotAuthorizedOrNotFound"),
        message: format!("{id} not found"),
        request_id: None,
    })
}
