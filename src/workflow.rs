//! Create a task, wait for it, and fetch its results as one operation.

use pyo3::prelude::*;
use pyo3::types::PyDict;
use thiserror::Error;
use tracing::info;

use crate::client::{ClientError, Inner, TaskHandle, Vantage6Client};
use crate::descriptor::AlgorithmDescriptor;
use crate::foreign::{ForeignError, ForeignValue};
use crate::marshal::{self, HostValue, MarshalError, Marshaler};
use crate::runtime::section::{self, RuntimeUnavailable};

/// Errors raised by [`TaskOrchestrator::create_and_wait_for_task`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkflowError {
    /// The request is missing a required value.
    #[error("invalid task request: {0}")]
    InvalidRequest(String),
    /// Neither the request nor the options name a collaboration.
    #[error(
        "no collaboration id given and no default configured; set V6_DEFAULT_COLLABORATION_ID \
         or defaultCollaborationId"
    )]
    MissingCollaboration,
    /// A facade operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The client library raised.
    #[error(transparent)]
    Foreign(#[from] ForeignError),
    /// An argument could not be converted.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// No interpreter is running.
    #[error(transparent)]
    Unavailable(#[from] RuntimeUnavailable),
}

/// Arguments of a task submission.
#[derive(Debug)]
pub struct TaskRequest {
    name: String,
    image: String,
    input: ForeignValue,
    description: String,
    collaboration_id: Option<i64>,
    organization_ids: Option<Vec<i64>>,
    database_labels: Vec<String>,
}

impl TaskRequest {
    /// Creates a request for `image` with an already converted `input`.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>, input: ForeignValue) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            input,
            description: String::new(),
            collaboration_id: None,
            organization_ids: None,
            database_labels: Vec::new(),
        }
    }

    /// Builds a request from a parsed descriptor, converting its input with
    /// `marshaler`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Marshal`] when the input cannot be converted.
    pub fn from_descriptor(
        descriptor: &AlgorithmDescriptor,
        marshaler: &Marshaler,
    ) -> Result<Self, WorkflowError> {
        let input = marshaler.to_foreign(&descriptor.input.to_host(marshaler.mode()))?;
        Ok(Self::new(descriptor.name.clone(), descriptor.image.clone(), input)
            .description(descriptor.description.clone())
            .database_labels(descriptor.database_labels.clone()))
    }

    /// Sets the task description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Targets `collaboration_id` instead of the configured default.
    #[must_use]
    pub const fn collaboration_id(mut self, collaboration_id: i64) -> Self {
        self.collaboration_id = Some(collaboration_id);
        self
    }

    /// Targets `organization_ids` instead of the configured defaults. An
    /// explicit empty list is sent as is.
    #[must_use]
    pub fn organization_ids(mut self, organization_ids: Vec<i64>) -> Self {
        self.organization_ids = Some(organization_ids);
        self
    }

    /// Restricts the task to the node databases with these labels.
    #[must_use]
    pub fn database_labels(mut self, labels: Vec<String>) -> Self {
        self.database_labels = labels;
        self
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(String::from(
                "task name must not be empty",
            )));
        }
        if self.image.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest(String::from(
                "algorithm image must not be empty",
            )));
        }
        Ok(())
    }

    fn databases(&self) -> HostValue {
        HostValue::List(
            self.database_labels
                .iter()
                .map(|label| {
                    HostValue::Map(vec![(String::from("label"), HostValue::from(label.as_str()))])
                })
                .collect(),
        )
    }
}

/// Record returned by `result.from_task`, exposing a `data` sequence whose
/// items carry a `result` field.
#[derive(Debug)]
pub struct ResultRecord {
    record: ForeignValue,
}

impl ResultRecord {
    /// Wraps a record returned by the client library.
    #[must_use]
    pub const fn new(record: ForeignValue) -> Self {
        Self { record }
    }

    /// The record as returned by the library.
    #[must_use]
    pub const fn record(&self) -> &ForeignValue {
        &self.record
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_inner(self) -> ForeignValue {
        self.record
    }

    /// `result` of the first item, or `None` when `data` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError`] when the record has no `data` sequence or the
    /// first item has no `result`.
    pub fn first_result(&self) -> Result<Option<ForeignValue>, ForeignError> {
        let data = self.record.lookup("data")?;
        if data.len()? == 0 {
            return Ok(None);
        }
        data.index(0_usize)?.lookup("result").map(Some)
    }

    /// `result` of every item, in order.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError`] when the record has no `data` sequence or an
    /// item has no `result`.
    pub fn results(&self) -> Result<Vec<ForeignValue>, ForeignError> {
        let data = self.record.lookup("data")?;
        (0..data.len()?)
            .map(|position| data.index(position)?.lookup("result"))
            .collect()
    }

    /// Converts the whole record into a host value.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Marshal`] for unsupported shapes.
    pub fn to_host(&self) -> Result<HostValue, ForeignError> {
        self.record.to_host()
    }
}

/// Runs the submit, wait and fetch sequence on a connected facade.
#[derive(Clone, Debug)]
pub struct TaskOrchestrator {
    client: Vantage6Client,
}

impl TaskOrchestrator {
    /// Creates an orchestrator driving `client`.
    #[must_use]
    pub const fn new(client: Vantage6Client) -> Self {
        Self { client }
    }

    /// Submits `request` through `task.create`, waits for the task to finish,
    /// and fetches its record with `result.from_task`.
    ///
    /// A missing collaboration or organization list falls back to the
    /// configured defaults. The worker stays blocked for the whole wait.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Client`] with [`ClientError::NotConnected`]
    /// before a successful connect, [`WorkflowError::InvalidRequest`] and
    /// [`WorkflowError::MissingCollaboration`] for incomplete requests, and
    /// [`WorkflowError::Foreign`] when the library raises.
    pub async fn create_and_wait_for_task(
        &self,
        request: TaskRequest,
    ) -> Result<ResultRecord, WorkflowError> {
        if !self.client.is_connected() {
            return Err(ClientError::NotConnected.into());
        }
        request.validate()?;
        let options = self.client.options();
        let collaboration_id = request
            .collaboration_id
            .or(options.default_collaboration_id)
            .ok_or(WorkflowError::MissingCollaboration)?;
        let organization_ids = request
            .organization_ids
            .clone()
            .unwrap_or_else(|| options.default_organization_ids.clone());

        self.client
            .offload("create_and_wait_for_task", move |inner| {
                Ok(run_task(inner, &request, collaboration_id, &organization_ids))
            })
            .await?
    }
}

fn create_kwargs<'py>(
    py: Python<'py>,
    request: &TaskRequest,
    collaboration_id: i64,
    organization_ids: &[i64],
) -> Result<Bound<'py, PyDict>, MarshalError> {
    let kwargs = PyDict::new_bound(py);
    kwargs.set_item("collaboration", marshal::to_py(py, &HostValue::Int(collaboration_id))?)?;
    kwargs.set_item(
        "organizations",
        marshal::to_py(py, &HostValue::from(organization_ids.to_vec()))?,
    )?;
    kwargs.set_item("name", marshal::to_py(py, &HostValue::from(request.name.as_str()))?)?;
    kwargs.set_item("image", marshal::to_py(py, &HostValue::from(request.image.as_str()))?)?;
    kwargs.set_item(
        "description",
        marshal::to_py(py, &HostValue::from(request.description.as_str()))?,
    )?;
    kwargs.set_item("databases", marshal::to_py(py, &request.databases())?)?;
    kwargs.set_item("input_", request.input.bind(py))?;
    Ok(kwargs)
}

fn run_task(
    inner: &Inner,
    request: &TaskRequest,
    collaboration_id: i64,
    organization_ids: &[i64],
) -> Result<ResultRecord, WorkflowError> {
    section::run(|py| {
        let client = inner.connected_client(py)?;
        let kwargs = create_kwargs(py, request, collaboration_id, organization_ids)?;
        let task = client
            .getattr("task")
            .and_then(|tasks| tasks.call_method("create", (), Some(&kwargs)))
            .map_err(|err| ForeignError::python("task.create", &err))?;

        let handle = TaskHandle::from_bound(&task)?;
        info!(
            task = %request.name,
            task_id = %describe(handle.id().bind(py)),
            "waiting for task results"
        );
        inner.wait_for_results(&handle)?.release();

        let fetch = PyDict::new_bound(py);
        fetch
            .set_item("task_id", handle.id().bind(py))
            .map_err(MarshalError::from)?;
        let record = client
            .getattr("result")
            .and_then(|results| results.call_method("from_task", (), Some(&fetch)))
            .map_err(|err| ForeignError::python("result.from_task", &err))?;
        Ok(ResultRecord::new(ForeignValue::from_bound(record)))
    })
}

fn describe(object: &Bound<'_, PyAny>) -> String {
    object
        .str()
        .map_or_else(|_| String::from("<unprintable>"), |text| text.to_string())
}
