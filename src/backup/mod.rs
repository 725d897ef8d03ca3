//! Volume backup records as observed from the provider.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which family of volume a backup belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeKind {
    /// Boot volume attached as an instance's system disk.
    Boot,
    /// Block volume attached as additional storage.
    Block,
}

impl VolumeKind {
    /// Returns the label used in reports and log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! provider_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Value not known to this release, kept verbatim.
            Unknown(String),
        }

        impl $name {
            /// Returns the provider's spelling of the value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown(raw) => raw.as_str(),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($wire => Self::$variant,)+
                    _ => Self::Unknown(value.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from(value.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

provider_enum!(
    /// Provider-reported lifecycle state of a backup or volume.
    LifecycleState {
        /// Provider accepted the request but has not started work.
        RequestReceived => "REQUEST_RECEIVED",
        /// Resource is being created.
        Creating => "CREATING",
        /// Resource is usable; the only state in which backups are deleted.
        Available => "AVAILABLE",
        /// Volume is being provisioned.
        Provisioning => "PROVISIONING",
        /// Volume is being restored from a backup.
        Restoring => "RESTORING",
        /// Resource is being removed.
        Terminating => "TERMINATING",
        /// Resource has been removed.
        Terminated => "TERMINATED",
        /// Resource is in an unrecoverable state.
        Faulty => "FAULTY",
        /// Resource is being updated.
        Updating => "UPDATING",
    }
);

provider_enum!(
    /// How a backup came to exist.
    SourceType {
        /// Requested explicitly by an operator or script.
        Manual => "MANUAL",
        /// Produced by an assigned backup policy.
        Scheduled => "SCHEDULED",
    }
);

provider_enum!(
    /// Whether a backup holds the whole volume or only changed blocks.
    BackupType {
        /// Complete copy of the volume.
        Full => "FULL",
        /// Changes since the previous backup.
        Incremental => "INCREMENTAL",
    }
);

impl LifecycleState {
    /// Returns `true` for [`LifecycleState::Available`].
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// A point-in-time backup of one boot or block volume.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BackupRecord {
    /// Provider identifier (OCID).
    pub id: String,
    /// Display name chosen when the backup was created.
    pub display_name: String,
    /// Identifier of the volume the backup was taken from.
    pub volume_id: String,
    /// Creation timestamp in UTC.
    pub time_created: DateTime<Utc>,
    /// Lifecycle state at the time of listing.
    pub lifecycle_state: LifecycleState,
    /// Manual or policy-driven origin.
    pub source_type: SourceType,
    /// Full or incremental content.
    pub backup_type: BackupType,
    /// Volume family the backup belongs to.
    pub kind: VolumeKind,
}

impl BackupRecord {
    /// Returns `true` when the display name contains `keyword`.
    ///
    /// An empty keyword matches every backup.
    #[must_use]
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        self.display_name.contains(keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("AVAILABLE", LifecycleState::Available)]
    #[case("available", LifecycleState::Available)]
    #[case("TERMINATING", LifecycleState::Terminating)]
    #[case("FAULTY", LifecycleState::Faulty)]
    #[case("ARCHIVED", LifecycleState::Unknown(String::from("ARCHIVED")))]
    fn lifecycle_state_parses_provider_spelling(
        #[case] raw: &str,
        #[case] expected: LifecycleState,
    ) {
        assert_eq!(LifecycleState::from(raw), expected);
    }

    #[test]
    fn unknown_values_keep_their_spelling() {
        let state = SourceType::from("IMPORTED");
        assert_eq!(state.as_str(), "IMPORTED");
        assert_eq!(
            serde_json::to_string(&state).expect("serialise"),
            "\"IMPORTED\""
        );
    }

    #[test]
    fn volume_kind_serialises_in_kebab_case() {
        assert_eq!(
            serde_json::to_string(&VolumeKind::Boot).expect("serialise"),
            "\"boot\""
        );
    }
}
