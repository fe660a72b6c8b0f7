//! BDD step definitions for task orchestration.

use rstest_bdd_macros::{given, then, when};
use serde_json::json;
use tokio::runtime::Runtime;
use v6bridge::test_support::RecordedCall;
use v6bridge::{AlgorithmDescriptor, HostValue, TaskOrchestrator, TaskRequest, WorkflowError};

use super::test_helpers::{WorkflowContext, WorkflowTestError};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] WorkflowTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

#[given("a connected vantage6 client")]
fn connected_client(mut workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.connect = true;
    workflow_context
}

#[given("a connected vantage6 client without a default collaboration")]
fn connected_client_without_collaboration(
    mut workflow_context: WorkflowContext,
) -> WorkflowContext {
    workflow_context.connect = true;
    workflow_context.options.default_collaboration_id = None;
    workflow_context
}

#[given("a disconnected vantage6 client")]
fn disconnected_client(mut workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.connect = false;
    workflow_context
}

#[given("the descriptor targets databases \"{labels}\"")]
fn descriptor_targets(mut workflow_context: WorkflowContext, labels: String) -> WorkflowContext {
    workflow_context.database_labels = split_list(&labels);
    workflow_context
}

#[given("the client returns task objects")]
fn client_returns_task_objects(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.fake.return_task_objects();
    workflow_context
}

#[given("the task produces no results")]
fn task_produces_no_results(workflow_context: WorkflowContext) -> WorkflowContext {
    workflow_context.fake.set_results(&HostValue::List(Vec::new()));
    workflow_context
}

#[when("I run the task")]
fn run_task(mut workflow_context: WorkflowContext) -> Result<WorkflowContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let client = workflow_context.client(&runtime)?;
    let document = json!({
        "name": "average-age",
        "description": "Average age across nodes",
        "image": "harbor2.vantage6.ai/demo/average",
        "databaseLabels": workflow_context.database_labels,
        "input": { "method": "central_average", "kwargs": { "column_name": "Age" } },
    });
    let descriptor = AlgorithmDescriptor::from_json(&document.to_string())
        .map_err(|err| StepError::Assertion(format!("descriptor: {err}")))?;

    let outcome = runtime.block_on(async move {
        let request = TaskRequest::from_descriptor(&descriptor, &client.marshaler())?;
        let record = TaskOrchestrator::new(client)
            .create_and_wait_for_task(request)
            .await?;
        let first = match record.first_result()? {
            Some(value) => Some(value.to_host()?),
            None => None,
        };
        Ok::<_, WorkflowError>(first)
    });

    workflow_context.outcome = Some(outcome);
    Ok(workflow_context)
}

fn single_create(workflow_context: &WorkflowContext) -> Result<RecordedCall, StepError> {
    let mut calls = workflow_context.fake.calls_named("task.create");
    if calls.len() != 1 {
        return Err(StepError::Assertion(format!(
            "expected one task.create call, got {}",
            calls.len()
        )));
    }
    calls
        .pop()
        .ok_or_else(|| StepError::Assertion(String::from("missing task.create call")))
}

fn expect_kwarg(
    call: &RecordedCall,
    key: &str,
    expected: &HostValue,
) -> Result<(), StepError> {
    match call.kwargs.get(key) {
        Some(actual) if actual == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {key} = {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the workflow succeeds")]
fn workflow_succeeds(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context.outcome {
        Some(Ok(_)) => Ok(()),
        Some(Err(ref err)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the workflow fails with \"{text}\"")]
fn workflow_fails_with(workflow_context: &WorkflowContext, text: String) -> Result<(), StepError> {
    match workflow_context.outcome {
        Some(Err(ref err)) if err.to_string().contains(&text) => Ok(()),
        Some(Err(ref err)) => Err(StepError::Assertion(format!(
            "expected error mentioning {text:?}, got: {err}"
        ))),
        Some(Ok(_)) => Err(StepError::Assertion(String::from(
            "expected failure, got success",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("exactly one task is created")]
fn exactly_one_task(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    single_create(workflow_context).map(drop)
}

#[then("no task is created")]
fn no_task_created(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    let calls = workflow_context.fake.calls_named("task.create");
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no task.create call, got {calls:?}"
        )))
    }
}

#[then("the task targets collaboration \"{id}\"")]
fn task_targets_collaboration(
    workflow_context: &WorkflowContext,
    id: i64,
) -> Result<(), StepError> {
    expect_kwarg(
        &single_create(workflow_context)?,
        "collaboration",
        &HostValue::Int(id),
    )
}

#[then("the task targets organizations \"{ids}\"")]
fn task_targets_organizations(
    workflow_context: &WorkflowContext,
    ids: String,
) -> Result<(), StepError> {
    let expected = split_list(&ids)
        .iter()
        .map(|id| {
            id.parse::<i64>()
                .map(HostValue::Int)
                .map_err(|err| StepError::Assertion(format!("organization id {id}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    expect_kwarg(
        &single_create(workflow_context)?,
        "organizations",
        &HostValue::List(expected),
    )
}

#[then("the task databases are \"{labels}\"")]
fn task_databases(workflow_context: &WorkflowContext, labels: String) -> Result<(), StepError> {
    let expected = split_list(&labels)
        .into_iter()
        .map(|label| HostValue::Map(vec![(String::from("label"), HostValue::from(label))]))
        .collect();
    expect_kwarg(
        &single_create(workflow_context)?,
        "databases",
        &HostValue::List(expected),
    )
}

#[then("the task input column is \"{column}\"")]
fn task_input_column(workflow_context: &WorkflowContext, column: String) -> Result<(), StepError> {
    let call = single_create(workflow_context)?;
    let actual = call
        .kwargs
        .get("input_")
        .and_then(|input| input.get("kwargs"))
        .and_then(|kwargs| kwargs.get("column_name"))
        .and_then(HostValue::as_str);
    if actual == Some(column.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected column_name {column:?}, got {actual:?}"
        )))
    }
}

#[then("the client waited for task \"{id}\"")]
fn client_waited_for(workflow_context: &WorkflowContext, id: i64) -> Result<(), StepError> {
    let calls = workflow_context.fake.calls_named("wait_for_results");
    let args: Vec<_> = calls.iter().map(|call| call.args.clone()).collect();
    if args == [vec![HostValue::Int(id)]] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one wait for task {id}, got {args:?}"
        )))
    }
}

#[then("results were fetched for task \"{id}\"")]
fn results_fetched_for(workflow_context: &WorkflowContext, id: i64) -> Result<(), StepError> {
    let calls = workflow_context.fake.calls_named("result.from_task");
    let ids: Vec<_> = calls
        .iter()
        .map(|call| call.kwargs.get("task_id").cloned())
        .collect();
    if ids == [Some(HostValue::Int(id))] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one fetch for task {id}, got {ids:?}"
        )))
    }
}

#[then("the first result reports an average of \"{average}\"")]
fn first_result_average(
    workflow_context: &WorkflowContext,
    average: String,
) -> Result<(), StepError> {
    let Some(Ok(Some(HostValue::Str(ref text)))) = workflow_context.outcome else {
        return Err(StepError::Assertion(format!(
            "expected a string result, got {:?}",
            workflow_context.outcome
        )));
    };
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| StepError::Assertion(format!("result is not JSON: {err}")))?;
    let actual = parsed.get("average").map(ToString::to_string);
    if actual.as_deref() == Some(average.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected average {average}, got {actual:?} in {text}"
        )))
    }
}

#[then("there is no first result")]
fn no_first_result(workflow_context: &WorkflowContext) -> Result<(), StepError> {
    match workflow_context.outcome {
        Some(Ok(None)) => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected no first result, got {other:?}"
        ))),
    }
}
