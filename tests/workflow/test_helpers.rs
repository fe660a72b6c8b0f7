//! Shared fixtures for task orchestration BDD scenarios.

use rstest::fixture;
use thiserror::Error;
use tokio::runtime::Runtime;
use v6bridge::test_support::{FakeVantage6, options_for};
use v6bridge::{HostValue, RuntimeOptions, Vantage6Client, WorkflowError};

#[derive(Clone, Debug)]
pub struct WorkflowContext {
    pub fake: FakeVantage6,
    pub options: RuntimeOptions,
    pub connect: bool,
    pub database_labels: Vec<String>,
    pub outcome: Option<Result<Option<HostValue>, WorkflowError>>,
}

pub type WorkflowContextResult = Result<WorkflowContext, WorkflowTestError>;

#[derive(Clone, Debug, Error)]
pub enum WorkflowTestError {
    #[error("invalid workflow fixture: {0}")]
    Fixture(String),
}

impl WorkflowContext {
    /// Builds the facade, connecting it when the scenario asks for a
    /// connected client.
    pub fn client(&self, runtime: &Runtime) -> Result<Vantage6Client, WorkflowTestError> {
        let client = Vantage6Client::with_source(self.options.clone(), self.fake.source());
        if self.connect {
            let connected = runtime
                .block_on(client.connect())
                .map_err(|err| WorkflowTestError::Fixture(err.to_string()))?;
            if !connected {
                return Err(WorkflowTestError::Fixture(String::from(
                    "fake client refused the connection",
                )));
            }
        }
        Ok(client)
    }
}

#[fixture]
pub fn workflow_context_result() -> WorkflowContextResult {
    Ok(WorkflowContext {
        fake: FakeVantage6::install(),
        options: options_for("/opt/python310", "/srv/v6bridge"),
        connect: false,
        database_labels: Vec::new(),
        outcome: None,
    })
}

#[fixture]
pub fn workflow_context(workflow_context_result: WorkflowContextResult) -> WorkflowContext {
    workflow_context_result
        .unwrap_or_else(|err| panic!("workflow fixture should initialise: {err}"))
}
