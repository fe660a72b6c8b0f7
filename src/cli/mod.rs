//! Command-line interface definitions for the `v6bridge` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `v6bridge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "v6bridge",
    version,
    about = "Run a vantage6 algorithm task described by a JSON descriptor"
)]
pub(crate) struct Cli {
    /// Algorithm descriptor naming the image, databases and input.
    ///
    /// When omitted, or when the file does not exist, the command prints a
    /// message and exits without running anything.
    #[arg(value_name = "DESCRIPTOR")]
    pub(crate) descriptor: Option<String>,
    /// Read options from an appsettings-style JSON document instead of
    /// `v6bridge.toml` and `V6_*` environment variables.
    #[arg(long, value_name = "PATH")]
    pub(crate) options: Option<String>,
    /// Section of the options document that holds the options.
    #[arg(long, value_name = "NAME", default_value = "Vantage6", requires = "options")]
    pub(crate) section: String,
}
