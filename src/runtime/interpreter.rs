//! Starting and stopping the embedded interpreter.

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use pyo3::prelude::*;
use pyo3::types::PyList;
use thiserror::Error;

use super::section::{self, RuntimeUnavailable};

/// Process environment and module search path applied on start.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchPlan {
    /// Variables set before the interpreter starts.
    pub environment: Vec<(String, OsString)>,
    /// Replacement `sys.path`, in order.
    pub search_path: Vec<Utf8PathBuf>,
}

impl LaunchPlan {
    /// Returns the value planned for `key`.
    #[must_use]
    pub fn variable(&self, key: &str) -> Option<&OsString> {
        self.environment
            .iter()
            .find_map(|(name, value)| (name == key).then_some(value))
    }
}

/// How a shutdown completed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownOutcome {
    /// The runtime finalised without complaint.
    Clean,
    /// Buffered output could not be flushed while finalising. The runtime is
    /// gone; the warning is harmless.
    FlushWarning,
}

/// Errors raised while starting or stopping the interpreter.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InterpreterError {
    /// The runtime was finalised earlier in this process.
    #[error("the embedded runtime was shut down and cannot be restarted in this process")]
    Finalized,
    /// `sys.path` could not be replaced.
    #[error("failed to configure sys.path: {0}")]
    SearchPath(String),
    /// Shutdown was requested by a thread that is inside the section.
    #[error("cannot shut down the runtime from inside an interpreter call")]
    ShutdownInsideSection,
    /// Finalisation reported an unexpected status.
    #[error("runtime shutdown failed with status {0}")]
    Shutdown(i32),
    /// The runtime is not running.
    #[error(transparent)]
    Unavailable(#[from] RuntimeUnavailable),
}

/// Lifecycle of the embedded runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuntimeState {
    /// Nothing has been provisioned, or the last attempt failed.
    Uninitialized,
    /// A provisioning run is in progress.
    Provisioning,
    /// The interpreter is running.
    Ready,
    /// The interpreter was finalised.
    ShutDown,
}

/// Lifecycle state shared by every provisioner driving one interpreter.
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<RuntimeState>,
}

impl Lifecycle {
    /// Creates an uninitialised lifecycle.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RuntimeState::Uninitialized),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.lock()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of the interpreter hosted by this process.
pub trait Interpreter {
    /// State shared by every handle to this interpreter.
    fn lifecycle(&self) -> &Lifecycle;

    /// Applies `plan` and starts the interpreter. Starting a running
    /// interpreter is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`InterpreterError`] when the search path cannot be applied or
    /// the runtime was already finalised.
    fn start(&self, plan: &LaunchPlan) -> Result<(), InterpreterError>;

    /// Whether the interpreter is running.
    fn is_running(&self) -> bool;

    /// Finalises the interpreter.
    ///
    /// # Errors
    ///
    /// Returns [`InterpreterError`] for failures other than the flush
    /// warning.
    fn shutdown(&self) -> Result<ShutdownOutcome, InterpreterError>;
}

static STARTED: AtomicBool = AtomicBool::new(false);
static LIFECYCLE: Lifecycle = Lifecycle::new();

/// CPython linked into this process.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedPython;

impl Interpreter for EmbeddedPython {
    fn lifecycle(&self) -> &Lifecycle {
        &LIFECYCLE
    }

    fn start(&self, plan: &LaunchPlan) -> Result<(), InterpreterError> {
        section::exclusive(|| {
            if STARTED.load(Ordering::SeqCst) {
                return if section::runtime_available() {
                    Ok(())
                } else {
                    Err(InterpreterError::Finalized)
                };
            }
            for (key, value) in &plan.environment {
                // SAFETY: variables are written under the section lock before
                // the interpreter starts, so no interpreter thread reads them
                // concurrently.
                unsafe { std::env::set_var(key, value) };
            }
            pyo3::prepare_freethreaded_python();
            STARTED.store(true, Ordering::SeqCst);
            section::run(|py| {
                replace_search_path(py, &plan.search_path)
                    .map_err(|err| InterpreterError::SearchPath(err.to_string()))
            })
        })
    }

    fn is_running(&self) -> bool {
        section::runtime_available()
    }

    fn shutdown(&self) -> Result<ShutdownOutcome, InterpreterError> {
        if section::is_held() {
            return Err(InterpreterError::ShutdownInsideSection);
        }
        section::exclusive(|| {
            if !section::runtime_available() {
                return Ok(ShutdownOutcome::Clean);
            }
            // SAFETY: the section lock is held, so no other thread is inside
            // the interpreter. The thread state acquired here is never
            // released because finalisation destroys it.
            let status = unsafe {
                let _state = pyo3::ffi::PyGILState_Ensure();
                pyo3::ffi::Py_FinalizeEx()
            };
            match status {
                0 => Ok(ShutdownOutcome::Clean),
                -1 => Ok(ShutdownOutcome::FlushWarning),
                other => Err(InterpreterError::Shutdown(other)),
            }
        })
    }
}

fn replace_search_path(py: Python<'_>, entries: &[Utf8PathBuf]) -> PyResult<()> {
    let path = py
        .import_bound("sys")?
        .getattr("path")?
        .downcast_into::<PyList>()?;
    path.call_method0("clear")?;
    for entry in entries {
        path.append(entry.as_str())?;
    }
    Ok(())
}
