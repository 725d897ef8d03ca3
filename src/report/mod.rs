//! JSON Lines rendering and persistence of run reports.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::ops::{ReportRow, RunReport};

/// Errors raised while rendering or writing a report.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ReportError {
    /// Raised when a row cannot be serialised.
    #[error("failed to serialise report row: {message}")]
    Serialise {
        /// Serialiser message.
        message: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Renders rows as JSON Lines: one object per line, newline terminated.
///
/// # Errors
///
/// Returns [`ReportError::Serialise`] when a row cannot be serialised.
pub fn render_jsonl<R: Serialize>(rows: &[R]) -> Result<String, ReportError> {
    let mut rendered = String::new();
    for row in rows {
        let line = serde_json::to_string(row).map_err(|err| ReportError::Serialise {
            message: err.to_string(),
        })?;
        rendered.push_str(&line);
        rendered.push('\n');
    }
    Ok(rendered)
}

/// File name for a report of `command` started at `started`.
#[must_use]
pub fn report_file_name(command: &str, started: DateTime<Utc>) -> String {
    format!("{command}-{}.jsonl", started.format("%Y%m%dT%H%M%SZ"))
}

/// Writes reports into a directory, creating it when needed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportWriter {
    dir: Utf8PathBuf,
}

impl ReportWriter {
    /// Creates a writer targeting `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory receiving reports.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Writes every row of `report` and returns the file path.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when rendering or writing fails.
    pub fn write<R: ReportRow>(
        &self,
        command: &str,
        report: &RunReport<R>,
        started: DateTime<Utc>,
    ) -> Result<Utf8PathBuf, ReportError> {
        let rendered = render_jsonl(report.rows())?;
        let file_name = report_file_name(command, started);
        let path = self.dir.join(&file_name);

        Dir::create_ambient_dir_all(&self.dir, ambient_authority()).map_err(|err| {
            ReportError::Io {
                path: self.dir.clone(),
                message: err.to_string(),
            }
        })?;
        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(|err| {
            ReportError::Io {
                path: self.dir.clone(),
                message: err.to_string(),
            }
        })?;
        dir.write(&file_name, rendered)
            .map_err(|err| ReportError::Io {
                path: path.clone(),
                message: err.to_string(),
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests;
