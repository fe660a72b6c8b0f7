//! Runtime options loaded via `ortho-config` or from an appsettings-style
//! JSON options document.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::files;
use crate::marshal::NumberMode;

/// Default API port of a vantage6 server.
pub const DEFAULT_PORT: u16 = 443;
/// Default API path of a vantage6 server.
pub const DEFAULT_API_PATH: &str = "/api";
/// Interpreter version the embedded runtime is built against.
pub const DEFAULT_PYTHON_VERSION: &str = "3.10";
/// Section of the JSON options document holding the bridge options.
pub const DEFAULT_OPTIONS_SECTION: &str = "Vantage6";
/// Name of the isolated environment directory under the base directory.
pub const VENV_DIR_NAME: &str = ".venv";
/// Python distribution installed into the isolated environment.
pub const PACKAGE_NAME: &str = "vantage6";

/// Connection credentials, interpreter location and task defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "V6",
    discovery(
        app_name = "v6bridge",
        env_var = "V6BRIDGE_CONFIG_PATH",
        config_file_name = "v6bridge.toml",
        dotfile_name = ".v6bridge.toml",
        project_file_name = "v6bridge.toml"
    )
)]
pub struct RuntimeOptions {
    /// Hostname of the vantage6 server, including the scheme.
    pub host: String,
    /// API port of the vantage6 server.
    #[ortho_config(default = DEFAULT_PORT)]
    pub port: u16,
    /// API path prefix on the server.
    #[ortho_config(default = DEFAULT_API_PATH.to_owned())]
    pub api_path: String,
    /// Account used to authenticate.
    pub username: String,
    /// Password for [`RuntimeOptions::username`].
    pub password: String,
    /// Shared secret for one-time-password generation, when the account
    /// requires multi-factor login.
    pub mfa_key: Option<String>,
    /// Installation directory of the host CPython runtime.
    pub python_home: String,
    /// `major.minor` version of the host CPython runtime.
    #[ortho_config(default = DEFAULT_PYTHON_VERSION.to_owned())]
    pub python_version: String,
    /// Directory that hosts the isolated environment. Defaults to the
    /// directory of the running executable.
    pub base_dir: Option<String>,
    /// Private key of the organization, used for end-to-end encryption.
    pub organization_key: Option<String>,
    /// Collaboration used when a task does not name one.
    pub default_collaboration_id: Option<i64>,
    /// Organizations used when a task does not name any.
    #[ortho_config(default = Vec::new())]
    pub default_organization_ids: Vec<i64>,
    /// Pinned `vantage6` version; the latest release is installed when unset.
    pub vantage6_version: Option<String>,
    /// Keep JSON integers as Python `int` instead of converting them to
    /// `float`.
    #[ortho_config(default = false)]
    pub preserve_integers: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    json_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        json_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            json_key,
        }
    }
}

const HOST_FIELD: FieldMetadata =
    FieldMetadata::new("vantage6 server host", "V6_HOST", "host", "host");
const USERNAME_FIELD: FieldMetadata =
    FieldMetadata::new("vantage6 username", "V6_USERNAME", "username", "username");
const PASSWORD_FIELD: FieldMetadata =
    FieldMetadata::new("vantage6 password", "V6_PASSWORD", "password", "password");
const PYTHON_HOME_FIELD: FieldMetadata = FieldMetadata::new(
    "CPython installation directory",
    "V6_PYTHON_HOME",
    "python_home",
    "pythonHome",
);

impl RuntimeOptions {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {}, add {} to v6bridge.toml, or add {} to the options document",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.json_key
            )));
        }
        Ok(())
    }

    fn reject_whitespace(field: &'static str, path: &str) -> Result<(), ConfigError> {
        if path.chars().any(char::is_whitespace) {
            return Err(ConfigError::PathContainsWhitespace {
                field,
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("v6bridge")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses an appsettings-style JSON document and reads the options nested
    /// under `section`. Keys use camelCase (`pythonHome`, `apiPath`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::MissingSection`] when `section` is absent.
    pub fn from_json_document(contents: &str, section: &str) -> Result<Self, ConfigError> {
        let root: serde_json::Value =
            serde_json::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let nested = root
            .get(section)
            .cloned()
            .ok_or_else(|| ConfigError::MissingSection {
                section: section.to_owned(),
            })?;
        let document: OptionsDocument =
            serde_json::from_value(nested).map_err(|err| ConfigError::Parse(err.to_string()))?;
        Ok(document.into())
    }

    /// Reads a JSON options document from disk. See
    /// [`RuntimeOptions::from_json_document`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise the
    /// errors of [`RuntimeOptions::from_json_document`].
    pub fn load_json_file(path: &Utf8Path, section: &str) -> Result<Self, ConfigError> {
        let contents = files::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_json_document(&contents, section)
    }

    /// Validates credentials and interpreter paths. Runs before any
    /// filesystem access.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank,
    /// [`ConfigError::PathContainsWhitespace`] when `python_home` contains
    /// whitespace, and [`ConfigError::InvalidPort`] for port zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.host, &HOST_FIELD)?;
        Self::require_field(&self.username, &USERNAME_FIELD)?;
        Self::require_field(&self.password, &PASSWORD_FIELD)?;
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        self.validate_python_home()
    }

    /// Validates only the interpreter location. The provisioner calls this so
    /// a runtime can be prepared before credentials are known.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty `python_home` and
    /// [`ConfigError::PathContainsWhitespace`] when it contains whitespace.
    pub fn validate_python_home(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.python_home, &PYTHON_HOME_FIELD)?;
        Self::reject_whitespace("python_home", &self.python_home)
    }

    /// Resolves the directory that hosts the isolated environment and checks
    /// it for whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedBaseDir`] when the executable path
    /// cannot be determined or is not UTF-8, and
    /// [`ConfigError::PathContainsWhitespace`] when the directory contains
    /// whitespace.
    pub fn resolve_base_dir(&self) -> Result<Utf8PathBuf, ConfigError> {
        let base = match self.base_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => Utf8PathBuf::from(dir),
            _ => executable_dir()?,
        };
        Self::reject_whitespace("base_dir", base.as_str())?;
        Ok(base)
    }

    /// Path of the isolated environment (`<base_dir>/.venv`).
    ///
    /// # Errors
    ///
    /// Propagates [`RuntimeOptions::resolve_base_dir`] failures.
    pub fn venv_path(&self) -> Result<Utf8PathBuf, ConfigError> {
        Ok(self.resolve_base_dir()?.join(VENV_DIR_NAME))
    }

    /// Pip requirement for the `vantage6` package, pinned when configured.
    #[must_use]
    pub fn package_requirement(&self) -> String {
        match self.pinned_version() {
            Some(version) => format!("{PACKAGE_NAME}=={version}"),
            None => PACKAGE_NAME.to_owned(),
        }
    }

    /// Returns the trimmed pinned version, treating blank values as unset.
    #[must_use]
    pub fn pinned_version(&self) -> Option<&str> {
        self.vantage6_version
            .as_deref()
            .map(str::trim)
            .filter(|version| !version.is_empty())
    }

    /// Organization key, treating blank values as unset.
    #[must_use]
    pub fn organization_key(&self) -> Option<&str> {
        self.organization_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }

    /// Numeric conversion mode for parsed documents.
    #[must_use]
    pub const fn number_mode(&self) -> NumberMode {
        if self.preserve_integers {
            NumberMode::PreserveIntegers
        } else {
            NumberMode::Lossy
        }
    }
}

fn executable_dir() -> Result<Utf8PathBuf, ConfigError> {
    let exe = std::env::current_exe()
        .map_err(|err| ConfigError::UnresolvedBaseDir(err.to_string()))?;
    let utf8 = Utf8PathBuf::from_path_buf(exe).map_err(|path| {
        ConfigError::UnresolvedBaseDir(format!("non-UTF-8 executable path {}", path.display()))
    })?;
    utf8.parent().map(Utf8Path::to_path_buf).ok_or_else(|| {
        ConfigError::UnresolvedBaseDir(format!("executable {utf8} has no parent directory"))
    })
}

/// Options as they appear in the JSON options document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsDocument {
    #[serde(default)]
    host: String,
    port: Option<u16>,
    api_path: Option<String>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    mfa_key: Option<String>,
    #[serde(default)]
    python_home: String,
    python_version: Option<String>,
    base_dir: Option<String>,
    organization_key: Option<String>,
    default_collaboration_id: Option<i64>,
    #[serde(default)]
    default_organization_ids: Vec<i64>,
    vantage6_version: Option<String>,
    #[serde(default)]
    preserve_integers: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

impl From<OptionsDocument> for RuntimeOptions {
    fn from(value: OptionsDocument) -> Self {
        Self {
            host: value.host,
            port: value.port.unwrap_or(DEFAULT_PORT),
            api_path: value
                .api_path
                .unwrap_or_else(|| DEFAULT_API_PATH.to_owned()),
            username: value.username,
            password: value.password,
            mfa_key: non_blank(value.mfa_key),
            python_home: value.python_home,
            python_version: value
                .python_version
                .unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_owned()),
            base_dir: non_blank(value.base_dir),
            organization_key: non_blank(value.organization_key),
            default_collaboration_id: value.default_collaboration_id,
            default_organization_ids: value.default_organization_ids,
            vantage6_version: non_blank(value.vantage6_version),
            preserve_integers: value.preserve_integers,
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader or the JSON parser.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// The embedded runtime cannot tokenise search paths containing spaces.
    #[error(
        "{field} must not contain whitespace (got {path:?}); move the installation to a path \
         without spaces"
    )]
    PathContainsWhitespace {
        /// Option that holds the offending path.
        field: &'static str,
        /// Offending path.
        path: String,
    },
    /// Raised when the port is zero.
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    /// Raised when the executable directory cannot be determined.
    #[error("cannot determine the base directory: {0}; set V6_BASE_DIR")]
    UnresolvedBaseDir(String),
    /// Raised when the JSON options document lacks the requested section.
    #[error("options document has no {section:?} section")]
    MissingSection {
        /// Section that was requested.
        section: String,
    },
    /// Raised when an options document cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
