//! Shared fixtures for provisioning BDD scenarios.

use std::fs;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;
use v6bridge::RuntimeOptions;
use v6bridge::config::VENV_DIR_NAME;
use v6bridge::runtime::{Platform, ProvisionError, Provisioner};
use v6bridge::test_support::{RecordingInterpreter, ScriptedRunner, options_for};

pub type TestProvisioner = Provisioner<ScriptedRunner, RecordingInterpreter>;
pub type ProvisionContextResult = Result<ProvisionContext, ProvisionTestError>;

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub root: Rc<TempDir>,
    pub options: RuntimeOptions,
    pub runner: ScriptedRunner,
    pub interpreter: RecordingInterpreter,
    pub provisioner: Option<Rc<TestProvisioner>>,
    pub outcome: Option<Result<(), ProvisionError>>,
}

#[derive(Clone, Debug, Error)]
pub enum ProvisionTestError {
    #[error("invalid provisioning fixture: {0}")]
    Fixture(String),
}

impl ProvisionContext {
    pub fn root_path(&self) -> Result<Utf8PathBuf, ProvisionTestError> {
        Utf8PathBuf::from_path_buf(self.root.path().to_path_buf()).map_err(|path| {
            ProvisionTestError::Fixture(format!("non-UTF-8 temp dir {}", path.display()))
        })
    }

    pub fn venv(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(self.options.base_dir.clone().unwrap_or_default()).join(VENV_DIR_NAME)
    }

    pub fn library(&self) -> Utf8PathBuf {
        Utf8Path::new(&self.options.python_home)
            .join("lib")
            .join("libpython3.10.so")
    }

    /// Provisioner built from the current options; created on first use so
    /// given steps can still adjust the options.
    pub fn provisioner(&mut self) -> Rc<TestProvisioner> {
        let options = self.options.clone();
        let runner = self.runner.clone();
        let interpreter = self.interpreter.clone();
        Rc::clone(self.provisioner.get_or_insert_with(|| {
            Rc::new(Provisioner::with_parts(
                options,
                runner,
                interpreter,
                Platform::Linux,
            ))
        }))
    }
}

#[fixture]
pub fn provision_context_result() -> ProvisionContextResult {
    build_provision_context()
}

#[fixture]
pub fn provision_context(provision_context_result: ProvisionContextResult) -> ProvisionContext {
    provision_context_result
        .unwrap_or_else(|err| panic!("provisioning fixture should initialise: {err}"))
}

pub fn seed_runtime_library(home: &Utf8Path) -> Result<(), ProvisionTestError> {
    let lib = home.join("lib");
    fs::create_dir_all(&lib)
        .and_then(|()| fs::write(lib.join("libpython3.10.so"), ""))
        .map_err(|err| ProvisionTestError::Fixture(format!("seed {lib}: {err}")))
}

fn build_provision_context() -> Result<ProvisionContext, ProvisionTestError> {
    let tmp = TempDir::new().map_err(|err| ProvisionTestError::Fixture(err.to_string()))?;
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).map_err(|path| {
        ProvisionTestError::Fixture(format!("non-UTF-8 temp dir {}", path.display()))
    })?;
    let home = root.join("python310");
    let base = root.join("app");
    seed_runtime_library(&home)?;
    fs::create_dir_all(&base)
        .map_err(|err| ProvisionTestError::Fixture(format!("create {base}: {err}")))?;

    Ok(ProvisionContext {
        root: Rc::new(tmp),
        options: options_for(home.as_str(), base.as_str()),
        runner: ScriptedRunner::new(),
        interpreter: RecordingInterpreter::new(),
        provisioner: None,
        outcome: None,
    })
}
