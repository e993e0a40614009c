//! Command-line entry point.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::Dispatch;

use crate::exit::ExitCode;
use crate::logging::bootstrap_dispatch;
use crate::meta::{Meta, META_FILE};
use crate::runner::{RunOptions, Runner};
use crate::DEFAULT_CONFIG_FILE;

/// Process flags.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(about = "Run the registered service phases", long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Set config file for this server
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Display version of this server
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    /// Run options for these flags.
    ///
    /// The extension file is taken from the environment.
    #[must_use]
    pub fn run_options(&self, meta: Meta) -> RunOptions {
        RunOptions::new(&self.config)
            .with_env_ext_config()
            .with_meta(meta)
    }
}

impl Runner {
    /// Parse the process arguments, then either print the version line or
    /// execute a run.
    ///
    /// ```no_run
    /// use proc_runner::{Context, Runner};
    ///
    /// #[tokio::main]
    /// async fn main() -> std::process::ExitCode {
    ///     let mut builder = Runner::builder();
    ///     builder.add_server("", |_ctx: Context| async {});
    ///     builder.build().main().await.into()
    /// }
    /// ```
    pub async fn main(&self) -> ExitCode {
        self.main_with(Cli::parse()).await
    }

    /// Like [`Runner::main`] with already parsed flags.
    pub async fn main_with(&self, cli: Cli) -> ExitCode {
        let meta = load_meta(Path::new(META_FILE), &bootstrap_dispatch());
        if cli.version {
            println!("{}", meta.version_line());
            return ExitCode::Ok;
        }
        self.run(&cli.run_options(meta)).await
    }
}

// The run's logger does not exist yet; warnings go to `dispatch`.
fn load_meta(path: &Path, dispatch: &Dispatch) -> Meta {
    tracing::dispatcher::with_default(dispatch, || Meta::load_from(path))
}
