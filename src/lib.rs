//! Core library for driving the vantage6 Python client from Rust.
//!
//! The crate embeds CPython in the host process. [`Provisioner`] prepares an
//! isolated environment with the `vantage6` package and starts the runtime,
//! [`Marshaler`] converts values across the boundary, [`Vantage6Client`]
//! exposes the client library as async operations, and [`TaskOrchestrator`]
//! runs the submit → wait → fetch sequence for one task.

pub mod client;
pub mod config;
pub mod descriptor;
mod files;
pub mod foreign;
pub mod marshal;
pub mod process;
pub mod runtime;
pub mod test_support;
pub mod workflow;

pub use client::{
    ClientError, ClientSource, MfaCodeSource, MfaError, StaticMfaCode, TaskHandle, Vantage6Client,
};
pub use config::{ConfigError, DEFAULT_OPTIONS_SECTION, RuntimeOptions};
pub use descriptor::{AlgorithmDescriptor, DescriptorError, TaskInput};
pub use foreign::{ForeignError, ForeignKey, ForeignValue};
pub use marshal::{HostValue, MarshalError, Marshaler, NumberMode};
pub use process::{CommandOutput, CommandRunner, ProcessCommandRunner, ProcessError};
pub use runtime::{ProvisionError, Provisioner, RuntimeState, RuntimeUnavailable};
pub use workflow::{ResultRecord, TaskOrchestrator, TaskRequest, WorkflowError};
