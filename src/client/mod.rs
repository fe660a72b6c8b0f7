//! Facade over the `vantage6` Python client.
//!
//! [`Vantage6Client`] owns one client object inside the embedded runtime. It
//! starts `Disconnected`; [`Vantage6Client::connect`] constructs the client
//! on first use and authenticates, after which the remaining operations are
//! available. Every operation runs on a blocking worker inside the exclusive
//! section, so awaiting one never yields while the interpreter is held.

mod error;
mod mfa;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, info, warn};

pub use error::ClientError;
pub use mfa::{MfaCodeSource, MfaError, StaticMfaCode};

use crate::config::RuntimeOptions;
use crate::foreign::{self, ForeignError, ForeignValue};
use crate::marshal::Marshaler;
use crate::runtime::section;

/// Python module and class the facade instantiates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientSource {
    /// Importable module name.
    pub module: String,
    /// Class within [`ClientSource::module`].
    pub class: String,
}

impl ClientSource {
    /// Creates a source for `module.class`.
    #[must_use]
    pub fn new(module: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class: class.into(),
        }
    }
}

impl Default for ClientSource {
    fn default() -> Self {
        Self::new("vantage6.client", "Client")
    }
}

/// Identifier of a submitted task, as returned by the server.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: Arc<ForeignValue>,
}

impl TaskHandle {
    /// Wraps an identifier obtained elsewhere.
    #[must_use]
    pub fn new(id: ForeignValue) -> Self {
        Self { id: Arc::new(id) }
    }

    /// Reads the `id` of a task object, by key for mappings and by attribute
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when the task has no `id`.
    pub fn from_task(task: &ForeignValue) -> Result<Self, ForeignError> {
        task.lookup("id").map(Self::new)
    }

    pub(crate) fn from_bound(task: &Bound<'_, PyAny>) -> Result<Self, ForeignError> {
        foreign::lookup_bound(task, "id").map(|id| Self::new(ForeignValue::from_bound(id)))
    }

    /// The identifier object.
    #[must_use]
    pub fn id(&self) -> &ForeignValue {
        &self.id
    }
}

pub(crate) struct Inner {
    options: RuntimeOptions,
    source: ClientSource,
    marshaler: Marshaler,
    mfa: Option<Arc<dyn MfaCodeSource>>,
    client: Mutex<Option<Py<PyAny>>>,
    connected: AtomicBool,
    encrypted: AtomicBool,
}

/// Host-side handle to the remote vantage6 server.
///
/// Clones share the same client object. Create one facade per runtime.
#[derive(Clone)]
pub struct Vantage6Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Vantage6Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vantage6Client")
            .field("host", &self.inner.options.host)
            .field("source", &self.inner.source)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Vantage6Client {
    /// Creates a facade for the `vantage6.client.Client` class.
    #[must_use]
    pub fn new(options: RuntimeOptions) -> Self {
        Self::with_source(options, ClientSource::default())
    }

    /// Creates a facade that instantiates `source` instead of the default
    /// client class.
    #[must_use]
    pub fn with_source(options: RuntimeOptions, source: ClientSource) -> Self {
        let marshaler = Marshaler::new(options.number_mode());
        Self {
            inner: Arc::new(Inner {
                options,
                source,
                marshaler,
                mfa: None,
                client: Mutex::new(None),
                connected: AtomicBool::new(false),
                encrypted: AtomicBool::new(false),
            }),
        }
    }

    /// Installs a one-time code source used by [`Vantage6Client::connect`].
    /// Has no effect on clones created earlier.
    #[must_use]
    pub fn with_mfa(self, source: Arc<dyn MfaCodeSource>) -> Self {
        let inner = Arc::try_unwrap(self.inner).unwrap_or_else(|shared| Inner {
            options: shared.options.clone(),
            source: shared.source.clone(),
            marshaler: shared.marshaler,
            mfa: shared.mfa.clone(),
            client: Mutex::new(None),
            connected: AtomicBool::new(false),
            encrypted: AtomicBool::new(false),
        });
        Self {
            inner: Arc::new(Inner {
                mfa: Some(source),
                ..inner
            }),
        }
    }

    /// Options the facade was created with.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    /// Marshaler configured with the options' numeric mode.
    #[must_use]
    pub fn marshaler(&self) -> Marshaler {
        self.inner.marshaler
    }

    /// Whether [`Vantage6Client::connect`] has succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Whether end-to-end encryption has been configured.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.inner.encrypted.load(Ordering::SeqCst)
    }

    pub(crate) async fn offload<T, F>(&self, operation: &'static str, f: F) -> Result<T, ClientError>
    where
        F: FnOnce(&Inner) -> Result<T, ClientError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|err| ClientError::Worker {
                operation,
                message: err.to_string(),
            })?
    }

    /// Constructs the client on first use and authenticates with the
    /// configured credentials.
    ///
    /// Python errors are logged and reported as `Ok(false)`; there is no
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Unavailable`] when no interpreter is running and
    /// [`ClientError::Worker`] when the worker is cancelled.
    pub async fn connect(&self) -> Result<bool, ClientError> {
        self.offload("connect", Inner::connect).await
    }

    /// Configures end-to-end encryption with `organization_key`, falling back
    /// to the configured key. Does nothing when neither is set.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] before a successful connect and
    /// [`ClientError::Foreign`] when the library rejects the key.
    pub async fn setup_encryption(
        &self,
        organization_key: Option<String>,
    ) -> Result<(), ClientError> {
        self.inner.require_connected()?;
        self.offload("setup_encryption", move |inner| {
            inner.setup_encryption(organization_key)
        })
        .await
    }

    /// Lists the collaborations visible to the account.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] before a successful connect and
    /// [`ClientError::Foreign`] when the call raises.
    pub async fn get_collaborations(&self) -> Result<ForeignValue, ClientError> {
        self.inner.require_connected()?;
        self.offload("get_collaborations", Inner::get_collaborations)
            .await
    }

    /// Submits a task through `post_task` and returns the task object as the
    /// library produced it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] before a successful connect and
    /// [`ClientError::Foreign`] when the call raises.
    pub async fn create_task(
        &self,
        collaboration_id: i64,
        image: &str,
        input: ForeignValue,
    ) -> Result<ForeignValue, ClientError> {
        self.inner.require_connected()?;
        let image_ref = image.to_owned();
        self.offload("create_task", move |inner| {
            inner.create_task(collaboration_id, &image_ref, &input)
        })
        .await
    }

    /// Blocks a worker until the library reports the task finished. The
    /// polling interval is the library's; the wait cannot be cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] before a successful connect and
    /// [`ClientError::Foreign`] when the call raises.
    pub async fn wait_for_results(&self, task: &TaskHandle) -> Result<ForeignValue, ClientError> {
        self.inner.require_connected()?;
        let handle = task.clone();
        self.offload("wait_for_results", move |inner| {
            inner.wait_for_results(&handle)
        })
        .await
    }

    /// Fetches the results of a finished task.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] before a successful connect and
    /// [`ClientError::Foreign`] when the call raises.
    pub async fn get_task_result(&self, task: &TaskHandle) -> Result<ForeignValue, ClientError> {
        self.inner.require_connected()?;
        let handle = task.clone();
        self.offload("get_task_result", move |inner| {
            inner.get_task_result(&handle)
        })
        .await
    }
}

impl Inner {
    pub(crate) fn require_connected(&self) -> Result<(), ClientError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Py<PyAny>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn client_object<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        let mut slot = self.slot();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.bind(py).clone());
        }
        let class = py
            .import_bound(self.source.module.as_str())?
            .getattr(self.source.class.as_str())?;
        let client = class.call1((
            self.options.host.as_str(),
            self.options.port,
            self.options.api_path.as_str(),
        ))?;
        *slot = Some(client.clone().unbind());
        debug!(module = %self.source.module, class = %self.source.class, "client constructed");
        Ok(client)
    }

    /// Client object for an operation that requires a connection. Must be
    /// called inside the section.
    pub(crate) fn connected_client<'py>(
        &self,
        py: Python<'py>,
    ) -> Result<Bound<'py, PyAny>, ClientError> {
        self.require_connected()?;
        self.slot()
            .as_ref()
            .map(|client| client.bind(py).clone())
            .ok_or(ClientError::NotConnected)
    }

    fn mfa_code(&self) -> Result<Option<String>, MfaError> {
        match &self.mfa {
            Some(source) => source.current_code(),
            None => {
                if self.options.mfa_key.is_some() {
                    warn!("mfa_key is configured but no MFA code source is installed");
                }
                Ok(None)
            }
        }
    }

    fn authenticate(&self, client: &Bound<'_, PyAny>, mfa_code: Option<&str>) -> PyResult<()> {
        let kwargs = PyDict::new_bound(client.py());
        if let Some(code) = mfa_code {
            kwargs.set_item("mfa_code", code)?;
        }
        client.call_method(
            "authenticate",
            (
                self.options.username.as_str(),
                self.options.password.as_str(),
            ),
            Some(&kwargs),
        )?;
        Ok(())
    }

    fn connect(&self) -> Result<bool, ClientError> {
        let mfa_code = match self.mfa_code() {
            Ok(code) => code,
            Err(err) => {
                warn!(error = %err, "failed to connect to vantage6");
                return Ok(false);
            }
        };
        section::run(|py| {
            let attempt = self
                .client_object(py)
                .and_then(|client| self.authenticate(&client, mfa_code.as_deref()));
            match attempt {
                Ok(()) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(host = %self.options.host, port = self.options.port, "connected to vantage6");
                    Ok(true)
                }
                Err(err) => {
                    warn!(host = %self.options.host, error = %err, "failed to connect to vantage6");
                    Ok(false)
                }
            }
        })
    }

    fn setup_encryption(&self, organization_key: Option<String>) -> Result<(), ClientError> {
        let key = organization_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.options.organization_key().map(str::to_owned));
        let Some(organization_key) = key else {
            debug!("no organization key configured; encryption left disabled");
            return Ok(());
        };
        section::run(|py| {
            self.connected_client(py)?
                .call_method1("setup_encryption", (organization_key.as_str(),))
                .map_err(|err| ForeignError::python("setup_encryption", &err))?;
            self.encrypted.store(true, Ordering::SeqCst);
            info!("end-to-end encryption configured");
            Ok(())
        })
    }

    fn get_collaborations(&self) -> Result<ForeignValue, ClientError> {
        section::run(|py| {
            self.connected_client(py)?
                .getattr("collaboration")
                .and_then(|collaboration| collaboration.call_method0("list"))
                .map(ForeignValue::from_bound)
                .map_err(|err| ForeignError::python("collaboration.list", &err).into())
        })
    }

    fn create_task(
        &self,
        collaboration_id: i64,
        image: &str,
        input: &ForeignValue,
    ) -> Result<ForeignValue, ClientError> {
        section::run(|py| {
            let client = self.connected_client(py)?;
            post_task(&client, collaboration_id, image, input.bind(py))
                .map(ForeignValue::from_bound)
                .map_err(|err| ForeignError::python("post_task", &err).into())
        })
    }

    pub(crate) fn wait_for_results(&self, task: &TaskHandle) -> Result<ForeignValue, ClientError> {
        self.call_with_task("wait_for_results", task)
    }

    fn get_task_result(&self, task: &TaskHandle) -> Result<ForeignValue, ClientError> {
        self.call_with_task("get_task_result", task)
    }

    fn call_with_task(
        &self,
        method: &'static str,
        task: &TaskHandle,
    ) -> Result<ForeignValue, ClientError> {
        section::run(|py| {
            self.connected_client(py)?
                .call_method1(method, (task.id().bind(py).clone(),))
                .map(ForeignValue::from_bound)
                .map_err(|err| ForeignError::python(method, &err).into())
        })
    }
}

fn post_task<'py>(
    client: &Bound<'py, PyAny>,
    collaboration_id: i64,
    image: &str,
    input: &Bound<'py, PyAny>,
) -> PyResult<Bound<'py, PyAny>> {
    let kwargs = PyDict::new_bound(client.py());
    kwargs.set_item("collaboration_id", collaboration_id)?;
    kwargs.set_item("image", image)?;
    kwargs.set_item("input", input)?;
    client.call_method("post_task", (), Some(&kwargs))
}
