//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyModule;
use tokio::sync::{Mutex, MutexGuard};

use crate::client::ClientSource;
use crate::config::{
    DEFAULT_API_PATH, DEFAULT_PORT, DEFAULT_PYTHON_VERSION, RuntimeOptions,
};
use crate::foreign::ForeignValue;
use crate::marshal::{self, HostValue};
use crate::process::{CommandOutput, CommandRunner, ProcessError};
use crate::runtime::interpreter::{
    Interpreter, InterpreterError, LaunchPlan, Lifecycle, ShutdownOutcome,
};
use crate::runtime::section;

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ProcessError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug)]
struct InterpreterLog {
    plans: Vec<LaunchPlan>,
    shutdowns: usize,
    running: bool,
    start_failure: Option<InterpreterError>,
    shutdown_result: Result<ShutdownOutcome, InterpreterError>,
}

/// Interpreter double that records launch plans instead of embedding a
/// runtime.
///
/// Clones share one log and one lifecycle, standing in for a single process.
#[derive(Clone, Debug)]
pub struct RecordingInterpreter {
    log: Rc<RefCell<InterpreterLog>>,
    lifecycle: Rc<Lifecycle>,
}

impl Default for RecordingInterpreter {
    fn default() -> Self {
        Self {
            log: Rc::new(RefCell::new(InterpreterLog {
                plans: Vec::new(),
                shutdowns: 0,
                running: false,
                start_failure: None,
                shutdown_result: Ok(ShutdownOutcome::Clean),
            })),
            lifecycle: Rc::new(Lifecycle::new()),
        }
    }
}

impl RecordingInterpreter {
    /// Creates an interpreter that starts and stops cleanly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of start attempts.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.log.borrow().plans.len()
    }

    /// Number of shutdown requests.
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.log.borrow().shutdowns
    }

    /// Plan passed to the most recent start.
    #[must_use]
    pub fn last_plan(&self) -> Option<LaunchPlan> {
        self.log.borrow().plans.last().cloned()
    }

    /// Makes the next start fail with `error`.
    pub fn fail_next_start(&self, error: InterpreterError) {
        self.log.borrow_mut().start_failure = Some(error);
    }

    /// Sets the outcome reported by shutdown.
    pub fn set_shutdown_result(&self, result: Result<ShutdownOutcome, InterpreterError>) {
        self.log.borrow_mut().shutdown_result = result;
    }
}

impl Interpreter for RecordingInterpreter {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn start(&self, plan: &LaunchPlan) -> Result<(), InterpreterError> {
        let mut log = self.log.borrow_mut();
        log.plans.push(plan.clone());
        if let Some(error) = log.start_failure.take() {
            return Err(error);
        }
        log.running = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.log.borrow().running
    }

    fn shutdown(&self) -> Result<ShutdownOutcome, InterpreterError> {
        let mut log = self.log.borrow_mut();
        log.shutdowns += 1;
        log.running = false;
        log.shutdown_result.clone()
    }
}

/// Options with test credentials, the given interpreter home and base
/// directory, and collaboration 1 with organizations 2 and 3 as defaults.
#[must_use]
pub fn options_for(python_home: &str, base_dir: &str) -> RuntimeOptions {
    RuntimeOptions {
        host: String::from("https://v6.example.org"),
        port: DEFAULT_PORT,
        api_path: DEFAULT_API_PATH.to_owned(),
        username: String::from("researcher"),
        password: String::from("secret"),
        mfa_key: None,
        python_home: python_home.to_owned(),
        python_version: DEFAULT_PYTHON_VERSION.to_owned(),
        base_dir: Some(base_dir.to_owned()),
        organization_key: None,
        default_collaboration_id: Some(1),
        default_organization_ids: vec![2, 3],
        vantage6_version: None,
        preserve_integers: false,
    }
}

/// Starts the interpreter linked into the test binary, if needed.
pub fn ensure_interpreter() {
    pyo3::prepare_freethreaded_python();
}

fn in_section<T>(what: &str, f: impl for<'py> FnOnce(Python<'py>) -> PyResult<T>) -> T {
    match section::enter(f) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => panic!("{what} failed: {err}"),
        Err(err) => panic!("{what} failed: {err}"),
    }
}

/// Evaluates a Python expression and returns the promoted result.
///
/// # Panics
///
/// Panics when the expression raises.
#[must_use]
pub fn eval(expression: &str) -> ForeignValue {
    ensure_interpreter();
    in_section("eval", |py| {
        py.eval_bound(expression, None, None)
            .map(ForeignValue::from_bound)
    })
}

const FAKE_CLIENT_SOURCE: &str = r#"
import types

CALLS = []
SETTINGS = {
    "fail_auth": False,
    "task_style": "mapping",
    "results": [{"result": "{\"average\": 42.0}"}],
}


def _record(name, args=(), kwargs=None):
    CALLS.append((name, tuple(args), dict(kwargs or {})))


class _Collaborations:
    def list(self):
        _record("collaboration.list")
        return [{"id": 1, "name": "demo"}]


class _Tasks:
    def create(self, **kwargs):
        _record("task.create", (), kwargs)
        if SETTINGS["task_style"] == "object":
            return types.SimpleNamespace(id=7)
        return {"id": 7}


class _Results:
    def from_task(self, task_id):
        _record("result.from_task", (), {"task_id": task_id})
        return {"data": list(SETTINGS["results"])}


class Client:
    def __init__(self, host, port, path="/api"):
        _record("__init__", (host, port, path))
        self.collaboration = _Collaborations()
        self.task = _Tasks()
        self.result = _Results()

    def authenticate(self, username, password, mfa_code=None):
        kwargs = {} if mfa_code is None else {"mfa_code": mfa_code}
        _record("authenticate", (username, password), kwargs)
        if SETTINGS["fail_auth"]:
            raise RuntimeError("invalid credentials")

    def setup_encryption(self, key):
        _record("setup_encryption", (key,))

    def post_task(self, **kwargs):
        _record("post_task", (), kwargs)
        return {"id": 8, "image": kwargs.get("image")}

    def wait_for_results(self, task_id):
        _record("wait_for_results", (task_id,))
        return {"status": "completed"}

    def get_task_result(self, task_id):
        _record("get_task_result", (task_id,))
        return list(SETTINGS["results"])
"#;

static NEXT_MODULE: AtomicUsize = AtomicUsize::new(0);

/// Call recorded by the fake client module.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    /// Method name, for example `task.create`.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<HostValue>,
    /// Keyword arguments.
    pub kwargs: HostValue,
}

/// In-interpreter stand-in for the `vantage6.client` module.
///
/// Each installation registers a uniquely named module in `sys.modules`, so
/// tests running in parallel do not share recorded calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FakeVantage6 {
    module: String,
}

impl FakeVantage6 {
    /// Loads a fresh fake module.
    ///
    /// # Panics
    ///
    /// Panics when the module cannot be loaded.
    #[must_use]
    pub fn install() -> Self {
        ensure_interpreter();
        let module = format!(
            "v6bridge_fake_vantage6_{}",
            NEXT_MODULE.fetch_add(1, Ordering::SeqCst)
        );
        in_section("install fake vantage6", |py| {
            let fake = PyModule::from_code_bound(
                py,
                FAKE_CLIENT_SOURCE,
                "fake_vantage6.py",
                module.as_str(),
            )?;
            py.import_bound("sys")?
                .getattr("modules")?
                .set_item(module.as_str(), fake)
        });
        Self { module }
    }

    /// Source to pass to [`crate::Vantage6Client::with_source`].
    #[must_use]
    pub fn source(&self) -> ClientSource {
        ClientSource::new(self.module.clone(), "Client")
    }

    /// Sets `SETTINGS[key]` in the fake module.
    ///
    /// # Panics
    ///
    /// Panics when the value cannot be converted.
    pub fn set(&self, key: &str, value: &HostValue) {
        in_section("configure fake vantage6", |py| {
            let converted = marshal::to_py(py, value)
                .map_err(|err| PyRuntimeError::new_err(err.to_string()))?;
            py.import_bound(self.module.as_str())?
                .getattr("SETTINGS")?
                .set_item(key, converted)
        });
    }

    /// Makes `authenticate` raise.
    pub fn fail_authentication(&self) {
        self.set("fail_auth", &HostValue::Bool(true));
    }

    /// Makes `task.create` return an object with an `id` attribute instead
    /// of a mapping.
    pub fn return_task_objects(&self) {
        self.set("task_style", &HostValue::from("object"));
    }

    /// Replaces the `data` items returned for a task.
    pub fn set_results(&self, results: &HostValue) {
        self.set("results", results);
    }

    /// Every call recorded so far, in order.
    ///
    /// # Panics
    ///
    /// Panics when the call log cannot be read.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        let log = in_section("read fake vantage6 calls", |py| {
            let calls = py.import_bound(self.module.as_str())?.getattr("CALLS")?;
            marshal::from_py(&calls).map_err(|err| PyRuntimeError::new_err(err.to_string()))
        });
        let entries = match log {
            HostValue::List(entries) => entries,
            other => panic!("CALLS should be a list, got {other:?}"),
        };
        entries
            .into_iter()
            .map(|entry| {
                let parts = match entry {
                    HostValue::List(parts) => parts,
                    other => panic!("call entries should be tuples, got {other:?}"),
                };
                let mut fields = parts.into_iter();
                let name = fields
                    .next()
                    .and_then(|name| name.as_str().map(str::to_owned))
                    .unwrap_or_default();
                let args = match fields.next() {
                    Some(HostValue::List(args)) => args,
                    _ => Vec::new(),
                };
                let kwargs = fields.next().unwrap_or_default();
                RecordedCall { name, args, kwargs }
            })
            .collect()
    }

    /// Recorded calls of the method `name`.
    #[must_use]
    pub fn calls_named(&self, name: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.name == name)
            .collect()
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
