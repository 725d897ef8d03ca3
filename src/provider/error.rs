//! Error types for provider calls.

use serde::Deserialize;
use thiserror::Error;

use crate::command::CommandError;

/// HTTP status the provider uses to signal request-rate throttling.
pub const THROTTLED_STATUS: u16 = 429;

/// Error codes meaning the requested state is already in place.
pub const ALREADY_EXISTS_CODES: &[&str] = &["PolicyAssignmentAlreadyExists", "AlreadyExists"];

/// Structured error body returned by the provider API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServiceError {
    /// HTTP status code of the failed request.
    pub status: u16,
    /// Provider error code (for example `TooManyRequests`).
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Request identifier for support cases.
    #[serde(default, rename = "opc-request-id")]
    pub request_id: Option<String>,
}

impl ServiceError {
    /// Returns `true` when the provider throttled the request.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        self.status == THROTTLED_STATUS
    }

    /// Returns `true` when the error code says the target state already
    /// exists.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        ALREADY_EXISTS_CODES.contains(&self.code.as_str())
    }
}

/// Errors raised by [`crate::provider::CloudProvider`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The provider rejected the request with a structured error.
    #[error("provider returned {} {}: {}", .0.status, .0.code, .0.message)]
    Service(ServiceError),
    /// The client exited unsuccessfully without a structured error body.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Output from the client could not be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource being parsed (for example `volume backups`).
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// The client could not be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

impl ProviderError {
    /// Returns the structured service error, if the provider produced one.
    #[must_use]
    pub const fn service(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(service) => Some(service),
            _ => None,
        }
    }

    /// Returns `true` when the provider throttled the request.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.service().is_some_and(ServiceError::is_throttled)
    }
}

impl From<ServiceError> for ProviderError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}
