//! Completion marker written once an environment is fully provisioned.
//!
//! An environment directory without the marker was interrupted during
//! creation and is not reused.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files;

/// File name of the marker inside the environment root.
pub const MARKER_FILE_NAME: &str = ".v6bridge-complete";

/// Errors raised while reading or writing the marker.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MarkerError {
    /// Raised when the marker cannot be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Marker path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the marker content is not valid JSON.
    #[error("corrupt provisioning marker {path}: {message}")]
    Parse {
        /// Marker path.
        path: Utf8PathBuf,
        /// Parser error.
        message: String,
    },
}

/// Contents of the marker.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CompletionMarker {
    /// Pip requirement that was installed.
    pub requirement: String,
    /// Interpreter version the environment was created with.
    pub python_version: String,
}

impl CompletionMarker {
    /// Creates a marker for `requirement`.
    #[must_use]
    pub fn new(requirement: impl Into<String>, python_version: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            python_version: python_version.into(),
        }
    }

    /// Marker path for the environment at `venv`.
    #[must_use]
    pub fn path(venv: &Utf8Path) -> Utf8PathBuf {
        venv.join(MARKER_FILE_NAME)
    }

    /// Reads the marker of `venv`, returning `None` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError`] when the marker exists but cannot be read or
    /// parsed.
    pub fn read(venv: &Utf8Path) -> Result<Option<Self>, MarkerError> {
        let path = Self::path(venv);
        let io_error = |err: std::io::Error| MarkerError::Io {
            path: path.clone(),
            message: err.to_string(),
        };
        if !files::exists(&path).map_err(io_error)? {
            return Ok(None);
        }
        let contents = files::read_to_string(&path).map_err(io_error)?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| MarkerError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })
    }

    /// Writes the marker into `venv`, creating the directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError::Io`] when the marker cannot be written.
    pub fn write(&self, venv: &Utf8Path) -> Result<(), MarkerError> {
        let path = Self::path(venv);
        let io_error = |message: String| MarkerError::Io {
            path: path.clone(),
            message,
        };
        let contents =
            serde_json::to_string_pretty(self).map_err(|err| io_error(err.to_string()))?;
        files::create_dir_all(venv).map_err(|err| io_error(err.to_string()))?;
        files::write(&path, &contents).map_err(|err| io_error(err.to_string()))
    }
}
