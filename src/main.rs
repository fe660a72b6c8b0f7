//! Binary entry point for the v6bridge CLI.

use std::error::Error;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use v6bridge::{
    AlgorithmDescriptor, ClientError, ConfigError, DescriptorError, ForeignError, HostValue,
    ProvisionError, Provisioner, RuntimeOptions, TaskOrchestrator, TaskRequest, Vantage6Client,
    WorkflowError,
};

mod cli;

use cli::Cli;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("provisioning failed")]
    Provision(#[from] ProvisionError),
    #[error("could not connect to vantage6 at {host}; see the log for details")]
    ConnectionFailed { host: String },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("task failed")]
    Workflow(#[from] WorkflowError),
    #[error("failed to read the task result")]
    Result(#[from] ForeignError),
    #[error("failed to render the task result: {0}")]
    Render(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("V6BRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let Some(descriptor_arg) = cli.descriptor.as_deref() else {
        writeln!(
            io::stderr(),
            "usage: v6bridge [--options <PATH>] <DESCRIPTOR>\nno algorithm descriptor given; nothing to do"
        )
        .ok();
        return Ok(());
    };
    let descriptor = match AlgorithmDescriptor::load(&Utf8PathBuf::from(descriptor_arg)) {
        Ok(descriptor) => descriptor,
        Err(DescriptorError::NotFound { path }) => {
            writeln!(io::stderr(), "algorithm descriptor not found: {path}").ok();
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let options = load_options(&cli)?;
    options.validate()?;

    let provisioner = Provisioner::new(options.clone());
    provisioner.initialize()?;
    let outcome = execute(&options, &descriptor).await;
    let disposal = provisioner.dispose();
    let result = outcome?;
    disposal?;

    write_result(io::stdout(), &result)
}

fn load_options(cli: &Cli) -> Result<RuntimeOptions, ConfigError> {
    match cli.options.as_deref() {
        Some(path) => RuntimeOptions::load_json_file(&Utf8PathBuf::from(path), &cli.section),
        None => RuntimeOptions::load_without_cli_args(),
    }
}

async fn execute(
    options: &RuntimeOptions,
    descriptor: &AlgorithmDescriptor,
) -> Result<HostValue, CliError> {
    let client = Vantage6Client::new(options.clone());
    if !client.connect().await? {
        return Err(CliError::ConnectionFailed {
            host: options.host.clone(),
        });
    }
    client.setup_encryption(None).await?;

    let request = TaskRequest::from_descriptor(descriptor, &client.marshaler())?;
    info!(task = %descriptor.name, image = %descriptor.image, "submitting task");
    let record = TaskOrchestrator::new(client)
        .create_and_wait_for_task(request)
        .await?;

    let value = match record.first_result()? {
        Some(first) => first.to_host()?,
        None => record.to_host()?,
    };
    Ok(value)
}

fn write_result(mut target: impl Write, result: &HostValue) -> Result<(), CliError> {
    let rendered = match result {
        HostValue::Str(text) => text.clone(),
        other => serde_json::to_string_pretty(&other.to_document())
            .map_err(|err| CliError::Render(err.to_string()))?,
    };
    writeln!(target, "{rendered}").map_err(|err| CliError::Render(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

/// Writes the error and each cause whose text the line before does not
/// already carry.
fn write_error(mut target: impl Write, err: &CliError) {
    let mut previous = err.to_string();
    writeln!(target, "{previous}").ok();
    let mut cause = Error::source(err);
    while let Some(current) = cause {
        let text = current.to_string();
        if !previous.contains(&text) {
            writeln!(target, "  caused by: {text}").ok();
        }
        previous = text;
        cause = current.source();
    }
}
