//! BDD step definitions for runtime provisioning.

use std::fs;

use rstest_bdd_macros::{given, then, when};
use v6bridge::runtime::{CompletionMarker, ShutdownOutcome};
use v6bridge::{ProvisionError, RuntimeState};

use super::test_helpers::{ProvisionContext, ProvisionTestError, seed_runtime_library};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] ProvisionTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a host runtime without an environment")]
fn runtime_without_environment(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
}

#[given("a host runtime with a completed environment")]
fn runtime_with_completed_environment(
    provision_context: ProvisionContext,
) -> Result<ProvisionContext, StepError> {
    CompletionMarker::new(provision_context.options.package_requirement(), "3.10")
        .write(&provision_context.venv())
        .map_err(|err| StepError::Assertion(format!("seed marker: {err}")))?;
    Ok(provision_context)
}

#[given("a host runtime with an unmarked environment")]
fn runtime_with_unmarked_environment(
    provision_context: ProvisionContext,
) -> Result<ProvisionContext, StepError> {
    let venv = provision_context.venv();
    fs::create_dir_all(&venv).map_err(|err| StepError::Assertion(format!("mkdir {venv}: {err}")))?;
    Ok(provision_context)
}

#[given("a host runtime installed under \"{relative}\"")]
fn runtime_installed_under(
    mut provision_context: ProvisionContext,
    relative: String,
) -> Result<ProvisionContext, StepError> {
    let home = provision_context.root_path()?.join(relative);
    seed_runtime_library(&home)?;
    provision_context.options.python_home = home.into_string();
    Ok(provision_context)
}

#[given("a host runtime without its shared library")]
fn runtime_without_library(
    provision_context: ProvisionContext,
) -> Result<ProvisionContext, StepError> {
    let library = provision_context.library();
    fs::remove_file(&library)
        .map_err(|err| StepError::Assertion(format!("remove {library}: {err}")))?;
    Ok(provision_context)
}

#[given("the environment commands succeed")]
fn environment_commands_succeed(provision_context: ProvisionContext) -> ProvisionContext {
    for _ in 0..4 {
        provision_context.runner.push_success();
    }
    provision_context
}

#[given("environment creation fails with \"{message}\"")]
fn environment_creation_fails(
    provision_context: ProvisionContext,
    message: String,
) -> ProvisionContext {
    provision_context
        .runner
        .push_output(Some(1), "", format!("{message}\n"));
    provision_context
}

#[given("the interpreter reports a flush warning on shutdown")]
fn interpreter_reports_flush_warning(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
        .interpreter
        .set_shutdown_result(Ok(ShutdownOutcome::FlushWarning));
    provision_context
}

#[when("I initialize the runtime")]
fn initialize_runtime(
    mut provision_context: ProvisionContext,
) -> Result<ProvisionContext, StepError> {
    let provisioner = provision_context.provisioner();
    provision_context.outcome = Some(provisioner.initialize());
    Ok(provision_context)
}

#[when("I dispose the runtime")]
fn dispose_runtime(mut provision_context: ProvisionContext) -> Result<ProvisionContext, StepError> {
    let provisioner = provision_context.provisioner();
    provision_context.outcome = Some(provisioner.dispose());
    Ok(provision_context)
}

fn failure(provision_context: &ProvisionContext) -> Result<&ProvisionError, StepError> {
    match provision_context.outcome {
        Some(Err(ref err)) => Ok(err),
        Some(Ok(())) => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the operation succeeds")]
fn operation_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match provision_context.outcome {
        Some(Ok(())) => Ok(()),
        Some(Err(ref err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the error kind is \"{kind}\"")]
fn error_kind(provision_context: &ProvisionContext, kind: String) -> Result<(), StepError> {
    let err = failure(provision_context)?;
    let actual = failure_kind(err);
    if actual == kind {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {kind}, got {actual}: {err}"
        )))
    }
}

#[then("the error mentions \"{text}\"")]
fn error_mentions(provision_context: &ProvisionContext, text: String) -> Result<(), StepError> {
    let message = failure(provision_context)?.to_string();
    if message.contains(&text) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected error to mention {text:?}, got: {message}"
        )))
    }
}

#[then("the runner recorded \"{count}\" commands")]
fn runner_recorded(provision_context: &ProvisionContext, count: usize) -> Result<(), StepError> {
    let invocations = provision_context.runner.invocations();
    if invocations.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} commands, got {:?}",
            invocations
                .iter()
                .map(|invocation| invocation.command_string())
                .collect::<Vec<_>>()
        )))
    }
}

#[then("the first command creates the environment")]
fn first_command_creates_environment(
    provision_context: &ProvisionContext,
) -> Result<(), StepError> {
    let invocations = provision_context.runner.invocations();
    let command = invocations
        .first()
        .map(|invocation| invocation.command_string())
        .ok_or_else(|| StepError::Assertion(String::from("no command was run")))?;
    let expected = format!("-m venv {}", provision_context.venv());
    if command.ends_with(&expected) && command.contains("python310/bin/python3") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected host interpreter to run `{expected}`, got: {command}"
        )))
    }
}

#[then("the environment is marked complete")]
fn environment_marked(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let marker = CompletionMarker::read(&provision_context.venv())
        .map_err(|err| StepError::Assertion(err.to_string()))?
        .ok_or_else(|| StepError::Assertion(String::from("completion marker missing")))?;
    if marker.requirement == "vantage6" && marker.python_version == "3.10" {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected marker: {marker:?}")))
    }
}

#[then("the interpreter started \"{count}\" times")]
fn interpreter_started(provision_context: &ProvisionContext, count: usize) -> Result<(), StepError> {
    let actual = provision_context.interpreter.start_count();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} interpreter starts, got {actual}"
        )))
    }
}

#[then("the interpreter was shut down \"{count}\" times")]
fn interpreter_shut_down(
    provision_context: &ProvisionContext,
    count: usize,
) -> Result<(), StepError> {
    let actual = provision_context.interpreter.shutdown_count();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} shutdowns, got {actual}"
        )))
    }
}

#[then("the runtime state is \"{state}\"")]
fn runtime_state(provision_context: &ProvisionContext, state: String) -> Result<(), StepError> {
    let expected = parse_state(&state)?;
    let actual = provision_context
        .provisioner
        .as_ref()
        .map_or(RuntimeState::Uninitialized, |provisioner| provisioner.state());
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected state {expected:?}, got {actual:?}"
        )))
    }
}

const fn failure_kind(err: &ProvisionError) -> &'static str {
    match err {
        ProvisionError::Config(_) | ProvisionError::Version(_) => "config",
        ProvisionError::MissingRuntimeLibrary { .. } => "missing-library",
        ProvisionError::Io { .. } | ProvisionError::Marker(_) => "io",
        ProvisionError::Command { .. } => "command",
        ProvisionError::IncompleteEnvironment { .. } => "incomplete",
        ProvisionError::Interpreter(_) => "interpreter",
        ProvisionError::AlreadyShutDown => "already-shut-down",
    }
}

fn parse_state(state: &str) -> Result<RuntimeState, StepError> {
    match state {
        "uninitialized" => Ok(RuntimeState::Uninitialized),
        "provisioning" => Ok(RuntimeState::Provisioning),
        "ready" => Ok(RuntimeState::Ready),
        "shut-down" => Ok(RuntimeState::ShutDown),
        other => Err(StepError::Assertion(format!("unknown state {other}"))),
    }
}
