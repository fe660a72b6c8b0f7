//! Provisioning of the isolated environment and the lifecycle of the
//! embedded runtime.
//!
//! [`Provisioner::initialize`] validates the configured paths before touching
//! the filesystem, creates `<base_dir>/.venv` on first run, installs the
//! `vantage6` requirement into it, and starts the interpreter with a search
//! path confined to the environment. A later [`Provisioner::dispose`]
//! finalises the interpreter; it cannot be started again in the same process.

use std::ffi::OsString;
use std::sync::MutexGuard;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::interpreter::{
    EmbeddedPython, Interpreter, InterpreterError, LaunchPlan, RuntimeState, ShutdownOutcome,
};
use super::layout::{EnvironmentLayout, InvalidPythonVersion, Platform, PythonVersion};
use super::marker::{CompletionMarker, MarkerError};
use crate::config::{ConfigError, RuntimeOptions, VENV_DIR_NAME};
use crate::files;
use crate::process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};

/// Errors raised while provisioning or disposing of the runtime.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The options fail validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The configured interpreter version is malformed.
    #[error(transparent)]
    Version(#[from] InvalidPythonVersion),
    /// The interpreter shared library is missing from `python_home`.
    #[error("Python runtime library not found at {path}; check python_home")]
    MissingRuntimeLibrary {
        /// Expected library path.
        path: Utf8PathBuf,
    },
    /// A filesystem check failed.
    #[error("failed to inspect {path}: {message}")]
    Io {
        /// Path being inspected.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// A provisioning subprocess failed.
    #[error("{step} failed: {source}")]
    Command {
        /// Provisioning step, for example `create environment`.
        step: &'static str,
        /// Underlying process error, including captured stderr.
        source: ProcessError,
    },
    /// The environment directory exists but was never completed.
    #[error(
        "environment at {venv} is incomplete (a previous provisioning run was interrupted); \
         remove the directory and retry"
    )]
    IncompleteEnvironment {
        /// Environment directory.
        venv: Utf8PathBuf,
    },
    /// The completion marker could not be read or written.
    #[error(transparent)]
    Marker(#[from] MarkerError),
    /// The interpreter failed to start or stop.
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    /// The runtime was disposed earlier in this process.
    #[error("the embedded runtime has been shut down")]
    AlreadyShutDown,
}

/// Provisions the environment and drives the interpreter's lifecycle.
///
/// The lifecycle state lives with the interpreter, so every provisioner over
/// [`EmbeddedPython`] observes the same process-wide state.
#[derive(Debug)]
pub struct Provisioner<R = ProcessCommandRunner, I = EmbeddedPython> {
    options: RuntimeOptions,
    runner: R,
    interpreter: I,
    platform: Platform,
}

impl Provisioner {
    /// Creates a provisioner that runs real subprocesses and embeds CPython.
    #[must_use]
    pub const fn new(options: RuntimeOptions) -> Self {
        Self::with_parts(
            options,
            ProcessCommandRunner,
            EmbeddedPython,
            Platform::current(),
        )
    }
}

impl<R: CommandRunner, I: Interpreter> Provisioner<R, I> {
    /// Creates a provisioner from explicit collaborators.
    #[must_use]
    pub const fn with_parts(
        options: RuntimeOptions,
        runner: R,
        interpreter: I,
        platform: Platform,
    ) -> Self {
        Self {
            options,
            runner,
            interpreter,
            platform,
        }
    }

    /// Options the provisioner was created with.
    #[must_use]
    pub const fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Current lifecycle state of the interpreter.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.interpreter.lifecycle().state()
    }

    /// Whether the runtime is ready for use.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.interpreter.lifecycle().lock()
    }

    /// Validates the options and derives the environment layout. Performs no
    /// filesystem access.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Config`] for empty or whitespace-containing
    /// paths and [`ProvisionError::Version`] for a malformed version.
    pub fn layout(&self) -> Result<EnvironmentLayout, ProvisionError> {
        self.options.validate_python_home()?;
        let base_dir = self.options.resolve_base_dir()?;
        let version: PythonVersion = self.options.python_version.parse()?;
        Ok(EnvironmentLayout::new(
            self.platform,
            Utf8PathBuf::from(self.options.python_home.trim()),
            base_dir.join(VENV_DIR_NAME),
            version,
        ))
    }

    /// Provisions the environment and starts the runtime. Calling it again
    /// once ready does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when validation, environment creation or
    /// interpreter start fails; the state reverts to
    /// [`RuntimeState::Uninitialized`]. Returns
    /// [`ProvisionError::AlreadyShutDown`] after [`Provisioner::dispose`].
    pub fn initialize(&self) -> Result<(), ProvisionError> {
        let mut state = self.lock_state();
        match *state {
            RuntimeState::Ready => return Ok(()),
            RuntimeState::ShutDown => return Err(ProvisionError::AlreadyShutDown),
            RuntimeState::Uninitialized | RuntimeState::Provisioning => {}
        }
        *state = RuntimeState::Provisioning;
        match self.provision() {
            Ok(()) => {
                *state = RuntimeState::Ready;
                info!("embedded runtime ready");
                Ok(())
            }
            Err(err) => {
                *state = RuntimeState::Uninitialized;
                Err(err)
            }
        }
    }

    fn provision(&self) -> Result<(), ProvisionError> {
        let layout = self.layout()?;
        let library = layout.library_file();
        if !path_exists(&library)? {
            return Err(ProvisionError::MissingRuntimeLibrary { path: library });
        }

        let requirement = self.options.package_requirement();
        if files::dir_exists(layout.venv()) {
            Self::check_marker(&layout, &requirement)?;
        } else {
            self.create_environment(&layout, &requirement)?;
        }

        let plan = Self::launch_plan(&layout);
        self.interpreter.start(&plan)?;
        Ok(())
    }

    fn check_marker(layout: &EnvironmentLayout, requirement: &str) -> Result<(), ProvisionError> {
        let Some(marker) = CompletionMarker::read(layout.venv())? else {
            return Err(ProvisionError::IncompleteEnvironment {
                venv: layout.venv().to_path_buf(),
            });
        };
        if marker.requirement == requirement {
            debug!(venv = %layout.venv(), requirement, "reusing environment");
        } else {
            warn!(
                venv = %layout.venv(),
                installed = %marker.requirement,
                configured = requirement,
                "environment was provisioned for a different vantage6 requirement; \
                 remove it to reinstall"
            );
        }
        Ok(())
    }

    fn create_environment(
        &self,
        layout: &EnvironmentLayout,
        requirement: &str,
    ) -> Result<(), ProvisionError> {
        info!(venv = %layout.venv(), requirement, "creating isolated environment");
        self.run_step(
            "create environment",
            &layout.host_python(),
            &["-m", "venv", layout.venv().as_str()],
        )?;
        let python = layout.venv_python();
        self.run_step(
            "upgrade pip",
            &python,
            &["-m", "pip", "install", "--upgrade", "pip"],
        )?;
        self.run_step(
            "install vantage6",
            &python,
            &["-m", "pip", "install", requirement],
        )?;
        self.run_step("verify installation", &python, &["-m", "pip", "list"])?;
        CompletionMarker::new(requirement, layout.version().to_string()).write(layout.venv())?;
        info!(venv = %layout.venv(), "environment provisioned");
        Ok(())
    }

    fn run_step(
        &self,
        step: &'static str,
        program: &Utf8Path,
        args: &[&str],
    ) -> Result<CommandOutput, ProvisionError> {
        let argv: Vec<OsString> = args.iter().map(|arg| OsString::from(*arg)).collect();
        info!(step, program = %program, "running provisioning step");
        let output = self
            .runner
            .run_checked(program.as_str(), &argv)
            .map_err(|source| {
                if let ProcessError::CommandFailure { stderr, .. } = &source {
                    warn!(step, stderr = %stderr.trim_end(), "provisioning step failed");
                }
                ProvisionError::Command { step, source }
            })?;
        for line in output.stdout.lines() {
            debug!(step, "{line}");
        }
        if !output.stderr.trim().is_empty() {
            warn!(step, stderr = %output.stderr.trim_end(), "provisioning step wrote to stderr");
        }
        Ok(output)
    }

    fn launch_plan(layout: &EnvironmentLayout) -> LaunchPlan {
        let separator = layout.platform().path_list_separator();
        let python_path = format!(
            "{}{separator}{}",
            layout.venv_site_packages(),
            layout.venv_lib()
        );
        let mut path = OsString::from(layout.scripts_dir().as_str());
        if let Some(existing) = std::env::var_os("PATH")
            && !existing.is_empty()
        {
            path.push(separator.to_string());
            path.push(existing);
        }

        let search_path: Vec<Utf8PathBuf> = layout
            .search_path_candidates()
            .into_iter()
            .filter(|dir| files::dir_exists(dir))
            .collect();
        for entry in &search_path {
            debug!(entry = %entry, "search path entry");
        }

        LaunchPlan {
            environment: vec![
                (
                    String::from("PYTHONHOME"),
                    OsString::from(layout.python_home().as_str()),
                ),
                (
                    String::from("VIRTUAL_ENV"),
                    OsString::from(layout.venv().as_str()),
                ),
                (String::from("PYTHONPATH"), OsString::from(python_path)),
                (String::from("PATH"), path),
            ],
            search_path,
        }
    }

    /// Shuts the runtime down if it was started. Never-initialised and
    /// already-disposed provisioners are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Interpreter`] for shutdown failures other
    /// than the harmless flush warning. The state becomes
    /// [`RuntimeState::ShutDown`] either way.
    pub fn dispose(&self) -> Result<(), ProvisionError> {
        let mut state = self.lock_state();
        if *state != RuntimeState::Ready {
            debug!(state = ?*state, "dispose skipped");
            return Ok(());
        }
        *state = RuntimeState::ShutDown;
        match self.interpreter.shutdown()? {
            ShutdownOutcome::Clean => info!("embedded runtime shut down"),
            ShutdownOutcome::FlushWarning => {
                warn!("embedded runtime could not flush buffered output during shutdown");
            }
        }
        Ok(())
    }
}

fn path_exists(path: &Utf8Path) -> Result<bool, ProvisionError> {
    files::exists(path).map_err(|err| ProvisionError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
