//! Algorithm input descriptors.
//!
//! A descriptor names the algorithm image to run, the node databases to run
//! it against, and the method plus keyword arguments forwarded to the
//! algorithm wrapper:
//!
//! ```json
//! {
//!   "name": "average",
//!   "description": "Average age",
//!   "image": "harbor2.vantage6.ai/demo/average",
//!   "databaseLabels": "default",
//!   "input": { "method": "central_average", "kwargs": { "column_name": "Age" } }
//! }
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::files;
use crate::marshal::{HostValue, NumberMode};

/// Parsed algorithm input descriptor.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmDescriptor {
    /// Task name shown on the server.
    pub name: String,
    /// Free-form task description.
    #[serde(default)]
    pub description: String,
    /// Algorithm image reference.
    pub image: String,
    /// Node database labels; a bare string is read as a single label.
    #[serde(default, deserialize_with = "one_or_many")]
    pub database_labels: Vec<String>,
    /// Payload passed to the algorithm wrapper.
    pub input: TaskInput,
}

/// Method plus keyword arguments for the algorithm wrapper.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TaskInput {
    /// Algorithm method to invoke.
    pub method: String,
    /// Keyword arguments, kept as parsed for later conversion.
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl TaskInput {
    /// Builds the `{method, kwargs}` payload, converting JSON numbers
    /// according to `mode`.
    #[must_use]
    pub fn to_host(&self, mode: NumberMode) -> HostValue {
        let kwargs = self
            .kwargs
            .iter()
            .map(|(key, value)| (key.clone(), HostValue::from_document(value, mode)))
            .collect();
        HostValue::Map(vec![
            (String::from("method"), HostValue::from(self.method.as_str())),
            (String::from("kwargs"), HostValue::Map(kwargs)),
        ])
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(label) => vec![label],
        OneOrMany::Many(labels) => labels,
    })
}

/// Errors raised while reading a descriptor.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DescriptorError {
    /// Raised when the descriptor file does not exist.
    #[error("descriptor file not found: {path}")]
    NotFound {
        /// Path that was requested.
        path: Utf8PathBuf,
    },
    /// Raised when the descriptor file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the document is not a valid descriptor.
    #[error("invalid descriptor: {0}")]
    Parse(String),
}

impl AlgorithmDescriptor {
    /// Parses a descriptor document.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] when the JSON is malformed or lacks a
    /// required field.
    pub fn from_json(contents: &str) -> Result<Self, DescriptorError> {
        serde_json::from_str(contents).map_err(|err| DescriptorError::Parse(err.to_string()))
    }

    /// Reads and parses a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::NotFound`] when `path` does not exist,
    /// [`DescriptorError::Io`] when it cannot be read, and
    /// [`DescriptorError::Parse`] for invalid content.
    pub fn load(path: &Utf8Path) -> Result<Self, DescriptorError> {
        let io_error = |err: std::io::Error| DescriptorError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        if !files::exists(path).map_err(io_error)? {
            return Err(DescriptorError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = files::read_to_string(path).map_err(io_error)?;
        Self::from_json(&contents)
    }
}
