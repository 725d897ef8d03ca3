//! Provider capability consumed by the retention and audit operations.
//!
//! Listing methods return a single page so callers control pagination and
//! can retry each page independently. Mutating methods perform exactly one
//! provider call; retries belong to [`crate::retry::MutationExecutor`].

mod error;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::backup::{BackupRecord, BackupType, LifecycleState, VolumeKind};

pub use error::{ALREADY_EXISTS_CODES, ProviderError, ServiceError, THROTTLED_STATUS};

/// Prefix shared by every provider identifier.
pub const OCID_PREFIX: &str = "ocid1.";

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// One page of a listing call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page<T> {
    /// Records on this page.
    pub items: Vec<T>,
    /// Token for the next page, absent on the last page.
    pub next_page: Option<String>,
}

impl<T> Page<T> {
    /// Builds the final page of a listing.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

/// A compartment within the tenancy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Compartment {
    /// Compartment OCID.
    pub id: String,
    /// Compartment name (unique among siblings).
    pub name: String,
    /// Whether the compartment is in the `ACTIVE` state.
    pub active: bool,
}

/// A boot or block volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Volume OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Volume family.
    pub kind: VolumeKind,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Size in GiB when reported.
    pub size_in_gbs: Option<u64>,
}

/// A compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Instance OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Compartment holding the instance.
    pub compartment_id: String,
    /// Availability domain, required to list boot volume attachments.
    pub availability_domain: String,
    /// Provider lifecycle state (for example `RUNNING`).
    pub lifecycle_state: String,
}

/// Attachment of a volume to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeAttachment {
    /// Instance the volume is attached to.
    pub instance_id: String,
    /// Attached volume.
    pub volume_id: String,
    /// Volume family.
    pub kind: VolumeKind,
    /// Attachment lifecycle state (for example `ATTACHED`).
    pub lifecycle_state: String,
}

/// One schedule entry of a backup policy.
///
/// Only the hour is interpreted; every other field is carried through
/// unchanged so an update never drops provider settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PolicySchedule {
    /// Hour of the day (UTC) at which the backup runs.
    #[serde(
        default,
        rename = "hour-of-day",
        skip_serializing_if = "Option::is_none"
    )]
    pub hour_of_day: Option<u32>,
    /// Remaining schedule fields, untouched.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// A volume backup policy.
#[derive(Clone, Debug, PartialEq)]
pub struct BackupPolicy {
    /// Policy OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Schedules configured on the policy.
    pub schedules: Vec<PolicySchedule>,
}

/// Assignment of a backup policy to a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PolicyAssignment {
    /// Assignment OCID.
    pub id: String,
    /// Assigned policy.
    pub policy_id: String,
    /// Volume the policy applies to.
    pub asset_id: String,
}

/// Filter for listing backups.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackupQuery {
    /// Volume family to list.
    pub kind: VolumeKind,
    /// Compartment holding the backups.
    pub compartment_id: String,
    /// Restrict to backups of a single volume.
    pub volume_id: Option<String>,
}

impl BackupQuery {
    /// Lists every backup of `kind` in the compartment.
    #[must_use]
    pub fn compartment(kind: VolumeKind, compartment_id: impl Into<String>) -> Self {
        Self {
            kind,
            compartment_id: compartment_id.into(),
            volume_id: None,
        }
    }

    /// Restricts the query to one volume.
    #[must_use]
    pub fn for_volume(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = Some(volume_id.into());
        self
    }
}

/// Parameters for a backup creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateBackupRequest {
    /// Volume family.
    pub kind: VolumeKind,
    /// Volume to back up.
    pub volume_id: String,
    /// Display name for the new backup.
    pub display_name: String,
    /// Full or incremental.
    pub backup_type: BackupType,
}

/// Capability interface over the provider management API.
pub trait CloudProvider: Send + Sync {
    /// Region this provider instance talks to.
    fn region(&self) -> &str;

    /// Lists compartments below the tenancy root.
    fn list_compartments<'a>(
        &'a self,
        tenancy_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Compartment>>;

    /// Lists volumes of `kind` in a compartment.
    fn list_volumes<'a>(
        &'a self,
        kind: VolumeKind,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Volume>>;

    /// Fetches a single volume.
    fn get_volume<'a>(&'a self, kind: VolumeKind, volume_id: &'a str)
    -> ProviderFuture<'a, Volume>;

    /// Lists backups matching `query`.
    fn list_backups<'a>(
        &'a self,
        query: &'a BackupQuery,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupRecord>>;

    /// Lists compute instances in a compartment.
    fn list_instances<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<Instance>>;

    /// Lists volume attachments of `kind` for one instance.
    fn list_attachments<'a>(
        &'a self,
        kind: VolumeKind,
        instance: &'a Instance,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<VolumeAttachment>>;

    /// Lists backup policies in a compartment.
    fn list_backup_policies<'a>(
        &'a self,
        compartment_id: &'a str,
        page: Option<String>,
    ) -> ProviderFuture<'a, Page<BackupPolicy>>;

    /// Returns the policy assigned to a volume, if any.
    fn get_policy_assignment<'a>(
        &'a self,
        asset_id: &'a str,
    ) -> ProviderFuture<'a, Option<PolicyAssignment>>;

    /// Requests a new backup.
    fn create_backup<'a>(
        &'a self,
        request: &'a CreateBackupRequest,
    ) -> ProviderFuture<'a, BackupRecord>;

    /// Requests deletion of a backup.
    fn delete_backup<'a>(&'a self, kind: VolumeKind, backup_id: &'a str)
    -> ProviderFuture<'a, ()>;

    /// Assigns a backup policy to a volume.
    fn assign_policy<'a>(
        &'a self,
        asset_id: &'a str,
        policy_id: &'a str,
    ) -> ProviderFuture<'a, ()>;

    /// Replaces the schedules of a backup policy.
    fn update_policy_schedules<'a>(
        &'a self,
        policy_id: &'a str,
        schedules: &'a [PolicySchedule],
    ) -> ProviderFuture<'a, ()>;
}
