//! BDD scenarios for task orchestration.

use rstest_bdd_macros::scenario;

use super::test_helpers::{WorkflowContextResult, workflow_context_result};

#[scenario(path = "tests/features/workflow.feature", name = "Run a descriptor against the configured defaults")]
fn scenario_default_targets(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}

#[scenario(path = "tests/features/workflow.feature", name = "Preserve database label order")]
fn scenario_label_order(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}

#[scenario(path = "tests/features/workflow.feature", name = "Read task ids from attribute-style task objects")]
fn scenario_task_objects(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}

#[scenario(path = "tests/features/workflow.feature", name = "Treat an empty result set as no result")]
fn scenario_empty_results(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}

#[scenario(path = "tests/features/workflow.feature", name = "Refuse to run before connecting")]
fn scenario_disconnected(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}

#[scenario(path = "tests/features/workflow.feature", name = "Require a collaboration")]
fn scenario_missing_collaboration(workflow_context_result: WorkflowContextResult) {
    drop(workflow_context_result);
}
