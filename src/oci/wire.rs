//! JSON shapes printed by the `oci` CLI.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::backup::{BackupRecord, BackupType, LifecycleState, SourceType, VolumeKind};
use crate::provider::{
    BackupPolicy, Compartment, Instance, PolicyAssignment, PolicySchedule, Volume,
    VolumeAttachment,
};

#[derive(Debug, Deserialize)]
pub(super) struct Envelope<T> {
    pub(super) data: T,
    #[serde(default, rename = "opc-next-page")]
    pub(super) next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireCompartment {
    id: String,
    name: String,
    lifecycle_state: String,
}

impl From<WireCompartment> for Compartment {
    fn from(value: WireCompartment) -> Self {
        Self {
            active: value.lifecycle_state.eq_ignore_ascii_case("ACTIVE"),
            id: value.id,
            name: value.name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireVolume {
    id: String,
    #[serde(default)]
    display_name: String,
    lifecycle_state: String,
    #[serde(default)]
    size_in_gbs: Option<u64>,
}

impl WireVolume {
    pub(super) fn into_volume(self, kind: VolumeKind) -> Volume {
        Volume {
            id: self.id,
            display_name: self.display_name,
            kind,
            lifecycle_state: LifecycleState::from(self.lifecycle_state),
            size_in_gbs: self.size_in_gbs,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireBackup {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    boot_volume_id: Option<String>,
    #[serde(default)]
    volume_id: Option<String>,
    time_created: DateTime<Utc>,
    lifecycle_state: String,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default, rename = "type")]
    backup_type: Option<String>,
}

impl WireBackup {
    pub(super) fn into_record(self, kind: VolumeKind) -> BackupRecord {
        let volume_id = match kind {
            VolumeKind::Boot => self.boot_volume_id,
            VolumeKind::Block => self.volume_id,
        };
        BackupRecord {
            id: self.id,
            display_name: self.display_name,
            volume_id: volume_id.unwrap_or_default(),
            time_created: self.time_created,
            lifecycle_state: LifecycleState::from(self.lifecycle_state),
            source_type: SourceType::from(self.source_type.unwrap_or_default()),
            backup_type: BackupType::from(self.backup_type.unwrap_or_default()),
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireInstance {
    id: String,
    #[serde(default)]
    display_name: String,
    compartment_id: String,
    #[serde(default)]
    availability_domain: String,
    lifecycle_state: String,
}

impl From<WireInstance> for Instance {
    fn from(value: WireInstance) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            compartment_id: value.compartment_id,
            availability_domain: value.availability_domain,
            lifecycle_state: value.lifecycle_state,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireAttachment {
    instance_id: String,
    #[serde(default)]
    boot_volume_id: Option<String>,
    #[serde(default)]
    volume_id: Option<String>,
    lifecycle_state: String,
}

impl WireAttachment {
    pub(super) fn into_attachment(self, kind: VolumeKind) -> Option<VolumeAttachment> {
        let volume_id = match kind {
            VolumeKind::Boot => self.boot_volume_id,
            VolumeKind::Block => self.volume_id,
        }?;
        Some(VolumeAttachment {
            instance_id: self.instance_id,
            volume_id,
            kind,
            lifecycle_state: self.lifecycle_state,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WirePolicy {
    id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    schedules: Option<Vec<PolicySchedule>>,
}

impl From<WirePolicy> for BackupPolicy {
    fn from(value: WirePolicy) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            schedules: value.schedules.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) struct WireAssignment {
    id: String,
    policy_id: String,
    asset_id: String,
}

impl From<WireAssignment> for PolicyAssignment {
    fn from(value: WireAssignment) -> Self {
        Self {
            id: value.id,
            policy_id: value.policy_id,
            asset_id: value.asset_id,
        }
    }
}
