//! BDD scenarios for runtime provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContextResult, provision_context_result};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Create the environment on first run"
)]
fn scenario_first_run(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Initialize twice and provision once"
)]
fn scenario_initialize_twice(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reuse a completed environment"
)]
fn scenario_reuse_environment(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Refuse an interrupted environment"
)]
fn scenario_incomplete_environment(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reject a runtime path containing spaces"
)]
fn scenario_whitespace_home(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Report a missing runtime library"
)]
fn scenario_missing_library(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Surface environment creation failures"
)]
fn scenario_creation_failure(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Dispose a runtime that never started"
)]
fn scenario_dispose_uninitialized(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Dispose tolerates the flush warning"
)]
fn scenario_dispose_flush_warning(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Refuse to initialize after disposal"
)]
fn scenario_initialize_after_dispose(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}
