//! Process-wide exclusive execution section.
//!
//! Every call into the embedded interpreter runs inside [`enter`]: the caller
//! takes the section lock and then the interpreter lock, and both are released
//! when the closure returns or unwinds. Nested entry from the same thread does
//! not take the lock again, so a facade operation may call another one while
//! already inside the section.

use std::cell::Cell;
use std::sync::{Mutex, MutexGuard, PoisonError};

use pyo3::Python;
use thiserror::Error;

static SECTION: Mutex<()> = Mutex::new(());

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Raised when the section is entered while no interpreter is running.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("the embedded Python runtime is not running; initialise the provisioner first")]
pub struct RuntimeUnavailable;

/// Returns whether an interpreter is running in this process.
#[must_use]
pub fn runtime_available() -> bool {
    // SAFETY: `Py_IsInitialized` only reads interpreter state and may be
    // called at any time, including before initialisation.
    unsafe { pyo3::ffi::Py_IsInitialized() != 0 }
}

/// Returns whether the current thread is inside the section.
#[must_use]
pub fn is_held() -> bool {
    DEPTH.get() > 0
}

struct Entry {
    _lock: Option<MutexGuard<'static, ()>>,
}

impl Entry {
    fn acquire() -> Self {
        let lock = if is_held() {
            None
        } else {
            Some(SECTION.lock().unwrap_or_else(PoisonError::into_inner))
        };
        DEPTH.set(DEPTH.get() + 1);
        Self { _lock: lock }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        DEPTH.set(DEPTH.get().saturating_sub(1));
    }
}

/// Runs `f` inside the section with the interpreter lock held.
///
/// # Errors
///
/// Returns [`RuntimeUnavailable`] without running `f` when no interpreter is
/// running once the section is held.
pub fn enter<F, R>(f: F) -> Result<R, RuntimeUnavailable>
where
    F: for<'py> FnOnce(Python<'py>) -> R,
{
    // Checked under the lock: a shutdown holding the section may finalise the
    // runtime while this thread waits.
    let _entry = Entry::acquire();
    if !runtime_available() {
        return Err(RuntimeUnavailable);
    }
    Ok(Python::with_gil(f))
}

/// Runs `f` holding the section lock but not the interpreter lock. Used to
/// start and stop the runtime.
pub(crate) fn exclusive<R>(f: impl FnOnce() -> R) -> R {
    let _entry = Entry::acquire();
    f()
}

/// Runs a fallible closure inside the section, folding
/// [`RuntimeUnavailable`] into the closure's error type.
///
/// # Errors
///
/// Returns the closure's error, or `E::from(RuntimeUnavailable)`.
pub fn run<F, T, E>(f: F) -> Result<T, E>
where
    F: for<'py> FnOnce(Python<'py>) -> Result<T, E>,
    E: From<RuntimeUnavailable>,
{
    enter(f)?
}
