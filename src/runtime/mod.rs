//! Embedded runtime: environment layout, provisioning, interpreter lifecycle
//! and the exclusive section every interpreter call runs in.

pub mod interpreter;
pub mod layout;
pub mod marker;
pub mod provisioner;
pub mod section;

pub use interpreter::{
    EmbeddedPython, Interpreter, InterpreterError, LaunchPlan, Lifecycle, RuntimeState,
    ShutdownOutcome,
};
pub use layout::{EnvironmentLayout, InvalidPythonVersion, Platform, PythonVersion};
pub use marker::{CompletionMarker, MARKER_FILE_NAME, MarkerError};
pub use provisioner::{ProvisionError, Provisioner};
pub use section::RuntimeUnavailable;
