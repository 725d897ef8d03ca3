//! Configuration loading via `ortho-config`.
//!
//! Two structs share one discovery chain (`bvkeeper.toml`,
//! `.bvkeeper.toml`, or the file named by `BVKEEPER_CONFIG_PATH`), layered
//! under environment variables: [`OciConfig`] describes how to reach the
//! tenancy and [`KeeperConfig`] holds retention, retry and audit settings.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::oci::{DEFAULT_OCI_BIN, OciCliSettings};
use crate::ops::FreshnessRule;
use crate::provider::OCID_PREFIX;
use crate::retention::{AgeRetention, CountRetention};
use crate::retry::RetryPolicy;

/// Name of the configuration file looked up by discovery.
pub const CONFIG_FILE_NAME: &str = "bvkeeper.toml";

/// Keyword stamped into the names of managed backups.
pub const DEFAULT_KEYWORD: &str = "BKPAUTCITEL-";

/// Prefix of backup names produced by `create`.
pub const DEFAULT_BACKUP_PREFIX: &str = "BootBackup";

/// Tenancy access settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BVKEEPER_OCI",
    discovery(
        app_name = "bvkeeper",
        env_var = "BVKEEPER_CONFIG_PATH",
        config_file_name = "bvkeeper.toml",
        dotfile_name = ".bvkeeper.toml",
        project_file_name = "bvkeeper.toml"
    )
)]
pub struct OciConfig {
    /// Path to the `oci` executable.
    #[ortho_config(default = DEFAULT_OCI_BIN.to_owned())]
    pub cli_bin: String,
    /// Profile in the CLI config file; the CLI default applies when unset.
    pub profile: Option<String>,
    /// CLI config file override.
    pub config_file: Option<String>,
    /// Region to operate in (for example `sa-saopaulo-1`).
    #[ortho_config(default = String::new())]
    pub region: String,
    /// Tenancy OCID, used to resolve the compartment by name.
    #[ortho_config(default = String::new())]
    pub tenancy_id: String,
    /// Target compartment name or OCID.
    #[ortho_config(default = String::new())]
    pub compartment: String,
}

/// Retention, retry and audit settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BVKEEPER",
    discovery(
        app_name = "bvkeeper",
        env_var = "BVKEEPER_CONFIG_PATH",
        config_file_name = "bvkeeper.toml",
        dotfile_name = ".bvkeeper.toml",
        project_file_name = "bvkeeper.toml"
    )
)]
pub struct KeeperConfig {
    /// Name fragment identifying managed backups.
    #[ortho_config(default = DEFAULT_KEYWORD.to_owned())]
    pub keyword: String,
    /// Backups kept per volume by `prune-count`.
    #[ortho_config(default = 5)]
    pub retention_count: u32,
    /// Age window in days used by `prune-age` and `create --prune`.
    #[ortho_config(default = 15)]
    pub retention_days: u32,
    /// Calls per provider operation before giving up on throttling.
    #[ortho_config(default = 5)]
    pub max_attempts: u32,
    /// Wait after the first throttled call, in seconds.
    #[ortho_config(default = 5)]
    pub base_wait_secs: u64,
    /// Exclusive upper bound of the random wait added to every backoff.
    #[ortho_config(default = 5000)]
    pub jitter_millis: u64,
    /// Instances audited concurrently.
    #[ortho_config(default = 5)]
    pub workers: u32,
    /// Leading part of backup names produced by `create`.
    #[ortho_config(default = DEFAULT_BACKUP_PREFIX.to_owned())]
    pub backup_prefix: String,
    /// Directory receiving JSON Lines reports; stdout when unset.
    pub report_dir: Option<String>,
    /// Recent backups each audited volume must have.
    #[ortho_config(default = 3)]
    pub audit_min_backups: u32,
    /// Allowed age of the newest backup, in minutes.
    #[ortho_config(default = 90)]
    pub audit_max_age_minutes: u32,
    /// Expected spacing between backups, in minutes.
    #[ortho_config(default = 60)]
    pub audit_interval_minutes: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} {reason}: check {} or {} in [{}] of {CONFIG_FILE_NAME}",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

fn require_optional_field(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    match value {
        Some(present) if present.trim().is_empty() => Err(metadata.missing()),
        Some(_) | None => Ok(()),
    }
}

impl OciConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("bvkeeper")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// The tenancy is only required when the compartment is given by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.cli_bin,
            &FieldMetadata::new("oci CLI binary", "BVKEEPER_OCI_CLI_BIN", "cli_bin", "oci"),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("region", "BVKEEPER_OCI_REGION", "region", "oci"),
        )?;
        require_field(
            &self.compartment,
            &FieldMetadata::new(
                "compartment name or OCID",
                "BVKEEPER_OCI_COMPARTMENT",
                "compartment",
                "oci",
            ),
        )?;
        if !self.compartment.trim().starts_with(OCID_PREFIX) {
            require_field(
                &self.tenancy_id,
                &FieldMetadata::new(
                    "tenancy OCID",
                    "BVKEEPER_OCI_TENANCY_ID",
                    "tenancy_id",
                    "oci",
                ),
            )?;
        }
        require_optional_field(
            self.profile.as_deref(),
            &FieldMetadata::new("CLI profile", "BVKEEPER_OCI_PROFILE", "profile", "oci"),
        )?;
        require_optional_field(
            self.config_file.as_deref(),
            &FieldMetadata::new(
                "CLI config file",
                "BVKEEPER_OCI_CONFIG_FILE",
                "config_file",
                "oci",
            ),
        )?;
        Ok(())
    }

    /// Builds CLI settings for the configured region.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn cli_settings(&self) -> Result<OciCliSettings, ConfigError> {
        self.validate()?;
        let settings = OciCliSettings::new(&self.cli_bin, &self.region)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(settings
            .with_profile(self.profile.clone())
            .with_config_file(self.config_file.as_ref().map(Utf8PathBuf::from)))
    }
}

impl KeeperConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("bvkeeper")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending env var and TOML key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.keyword,
            &FieldMetadata::new("backup keyword", "BVKEEPER_KEYWORD", "keyword", "keeper"),
        )?;
        require_field(
            &self.backup_prefix,
            &FieldMetadata::new(
                "backup name prefix",
                "BVKEEPER_BACKUP_PREFIX",
                "backup_prefix",
                "keeper",
            ),
        )?;
        require_optional_field(
            self.report_dir.as_deref(),
            &FieldMetadata::new(
                "report directory",
                "BVKEEPER_REPORT_DIR",
                "report_dir",
                "keeper",
            ),
        )?;
        for (value, metadata) in [
            (
                self.retention_count,
                FieldMetadata::new(
                    "retention count",
                    "BVKEEPER_RETENTION_COUNT",
                    "retention_count",
                    "keeper",
                ),
            ),
            (
                self.max_attempts,
                FieldMetadata::new(
                    "attempt budget",
                    "BVKEEPER_MAX_ATTEMPTS",
                    "max_attempts",
                    "keeper",
                ),
            ),
            (
                self.workers,
                FieldMetadata::new("worker count", "BVKEEPER_WORKERS", "workers", "keeper"),
            ),
            (
                self.audit_min_backups,
                FieldMetadata::new(
                    "audit minimum backups",
                    "BVKEEPER_AUDIT_MIN_BACKUPS",
                    "audit_min_backups",
                    "keeper",
                ),
            ),
        ] {
            if value == 0 {
                return Err(metadata.invalid("must be at least 1"));
            }
        }
        self.age_rule().map(|_| ())
    }

    /// Retry policy built from the attempt budget and waits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_attempts` is zero.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_wait_secs),
            Duration::from_millis(self.jitter_millis),
        )
        .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Count rule for `prune-count`.
    #[must_use]
    pub fn count_rule(&self) -> CountRetention {
        CountRetention::new(
            self.keyword.clone(),
            usize::try_from(self.retention_count).unwrap_or(usize::MAX),
        )
    }

    /// Age rule for `prune-age`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the window is out of range.
    pub fn age_rule(&self) -> Result<AgeRetention, ConfigError> {
        age_rule(self.retention_days)
    }

    /// Freshness rule for `audit`.
    #[must_use]
    pub fn freshness_rule(&self) -> FreshnessRule {
        FreshnessRule {
            min_backups: usize::try_from(self.audit_min_backups).unwrap_or(usize::MAX),
            max_age: TimeDelta::minutes(i64::from(self.audit_max_age_minutes)),
            interval: TimeDelta::minutes(i64::from(self.audit_interval_minutes)),
        }
    }

    /// Report directory, if configured.
    #[must_use]
    pub fn report_dir(&self) -> Option<Utf8PathBuf> {
        self.report_dir.as_ref().map(Utf8PathBuf::from)
    }
}

/// Builds an age rule, mapping range errors to configuration errors.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the window is out of range.
pub fn age_rule(days: u32) -> Result<AgeRetention, ConfigError> {
    AgeRetention::new(days).map_err(|err| {
        FieldMetadata::new(
            "retention window",
            "BVKEEPER_RETENTION_DAYS",
            "retention_days",
            "keeper",
        )
        .invalid(&err.to_string())
    })
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
