//! Where the host runtime and the isolated environment keep their files.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Operating system family, selecting file names and directory shapes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Platform {
    /// `python310.dll`, `Scripts\`, `Lib\site-packages`.
    Windows,
    /// `lib/libpython3.10.dylib`, `bin/`, `lib/python3.10/site-packages`.
    MacOs,
    /// `lib/libpython3.10.so`, `bin/`, `lib/python3.10/site-packages`.
    Linux,
}

impl Platform {
    /// Platform the crate was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }

    /// Separator used in `PATH`-style variables.
    #[must_use]
    pub const fn path_list_separator(self) -> char {
        match self {
            Self::Windows => ';',
            Self::MacOs | Self::Linux => ':',
        }
    }
}

/// Raised when the configured interpreter version is not `major.minor`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("python_version must look like 3.10 (got {0:?})")]
pub struct InvalidPythonVersion(pub String);

/// `major.minor` interpreter version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PythonVersion {
    major: u32,
    minor: u32,
}

impl PythonVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Version without the dot, as used in Windows library names (`310`).
    #[must_use]
    pub fn compact(self) -> String {
        format!("{}{}", self.major, self.minor)
    }
}

impl FromStr for PythonVersion {
    type Err = InvalidPythonVersion;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidPythonVersion(value.to_owned());
        let (major, minor) = value.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Paths derived from the host runtime home and the environment directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentLayout {
    platform: Platform,
    python_home: Utf8PathBuf,
    venv: Utf8PathBuf,
    version: PythonVersion,
}

impl EnvironmentLayout {
    /// Creates a layout for `platform`.
    #[must_use]
    pub const fn new(
        platform: Platform,
        python_home: Utf8PathBuf,
        venv: Utf8PathBuf,
        version: PythonVersion,
    ) -> Self {
        Self {
            platform,
            python_home,
            venv,
            version,
        }
    }

    /// Platform the layout was built for.
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Host runtime installation directory.
    #[must_use]
    pub fn python_home(&self) -> &Utf8Path {
        &self.python_home
    }

    /// Isolated environment root.
    #[must_use]
    pub fn venv(&self) -> &Utf8Path {
        &self.venv
    }

    /// Interpreter version the layout targets.
    #[must_use]
    pub const fn version(&self) -> PythonVersion {
        self.version
    }

    /// Shared library the embedded runtime links against.
    #[must_use]
    pub fn library_file(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self
                .python_home
                .join(format!("python{}.dll", self.version.compact())),
            Platform::MacOs => self
                .python_home
                .join("lib")
                .join(format!("libpython{}.dylib", self.version)),
            Platform::Linux => self
                .python_home
                .join("lib")
                .join(format!("libpython{}.so", self.version)),
        }
    }

    /// Host interpreter used to create the environment.
    #[must_use]
    pub fn host_python(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.python_home.join("python.exe"),
            Platform::MacOs | Platform::Linux => self.python_home.join("bin").join("python3"),
        }
    }

    /// Directory holding the environment's executables.
    #[must_use]
    pub fn scripts_dir(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.venv.join("Scripts"),
            Platform::MacOs | Platform::Linux => self.venv.join("bin"),
        }
    }

    /// Interpreter inside the environment, used for pip.
    #[must_use]
    pub fn venv_python(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.scripts_dir().join("python.exe"),
            Platform::MacOs | Platform::Linux => self.scripts_dir().join("python"),
        }
    }

    /// Standard library directory of the environment.
    #[must_use]
    pub fn venv_lib(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.venv.join("Lib"),
            Platform::MacOs | Platform::Linux => self
                .venv
                .join("lib")
                .join(format!("python{}", self.version)),
        }
    }

    /// Package directory of the environment.
    #[must_use]
    pub fn venv_site_packages(&self) -> Utf8PathBuf {
        self.venv_lib().join("site-packages")
    }

    /// Standard library directory of the host runtime.
    #[must_use]
    pub fn host_lib(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.python_home.join("Lib"),
            Platform::MacOs | Platform::Linux => self
                .python_home
                .join("lib")
                .join(format!("python{}", self.version)),
        }
    }

    /// Compiled extension modules of the host runtime.
    #[must_use]
    pub fn host_binary_modules(&self) -> Utf8PathBuf {
        match self.platform {
            Platform::Windows => self.python_home.join("DLLs"),
            Platform::MacOs | Platform::Linux => self.host_lib().join("lib-dynload"),
        }
    }

    /// Candidate `sys.path` entries in resolution order. Callers keep only
    /// the directories that exist.
    #[must_use]
    pub fn search_path_candidates(&self) -> Vec<Utf8PathBuf> {
        vec![
            self.venv_site_packages(),
            self.venv_lib(),
            self.scripts_dir(),
            self.venv.clone(),
            self.host_lib(),
            self.host_binary_modules(),
            self.python_home.clone(),
        ]
    }
}
