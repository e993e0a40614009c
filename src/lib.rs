#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//! # proc-runner: Process Lifecycle Runner
//!
//! Register business callbacks against the phases of a service process and
//! let the runner execute them in a fixed order with well-defined exit codes.
//!
//! ## Phases
//!
//! | Phase            | Registration                            | Execution                      |
//! |------------------|-----------------------------------------|--------------------------------|
//! | config loaders   | [`RunnerBuilder::add_config_loader`]    | sequential, stop on failure    |
//! | clients          | [`RunnerBuilder::add_client`]           | sequential, stop on failure    |
//! | start hooks      | [`RunnerBuilder::on_start`]             | sequential, stop on failure    |
//! | servers          | [`RunnerBuilder::add_server`]           | parallel, wait for all         |
//! | exit hooks       | [`RunnerBuilder::on_exit`]              | sequential, always             |
//!
//! Every handler is an async function taking the run [`Context`] and,
//! optionally, a configuration structure filled from the section it was
//! registered under. It returns nothing or `Result<(), E>`.
//!
//! ## Exit codes
//!
//! - [`ExitCode::Ok`] (0): every phase succeeded
//! - [`ExitCode::InvalidHandler`] (1): a registered handler has the wrong shape
//! - [`ExitCode::InvalidConfig`] (2): configuration could not be loaded
//! - [`ExitCode::HandlerError`] (3): a handler failed or panicked
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proc_runner::{BoxError, Context, Runner};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Database {
//!     url: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let mut builder = Runner::builder();
//!     builder
//!         .add_client("database", |_ctx: Context, db: Database| async move {
//!             tracing::info!(url = %db.url, "connecting");
//!             Ok::<(), BoxError>(())
//!         })
//!         .add_server("", |ctx: Context| async move {
//!             ctx.stats().add("requests", 1);
//!         })
//!         .on_exit("", |_ctx: Context| async {
//!             tracing::info!("bye");
//!         });
//!
//!     builder.build().main().await.into()
//! }
//! ```

// Private modules
mod config;
mod context;
mod error;
mod exit;
mod fault;
mod meta;
mod runner;
mod stats;
mod wrapper;

// Public modules
pub mod cli;
pub mod handler;
pub mod logging;
pub mod registry;
pub mod signal;

// Public exports
pub use config::{Config, ConfigSlot, SectionConfig};
pub use context::Context;
pub use error::{BoxError, Error, ErrorCode, Result};
pub use exit::ExitCode;
pub use handler::{
    validate, ConfigTarget, DynFn, IntoHandler, NormalizedHandler, RawHandler, Shape, Signature,
};
pub use logging::{LogConfig, LogLevel, Logger};
pub use meta::{Meta, META_FILE};
pub use registry::{Phase, Registry};
pub use runner::{RunOptions, Runner, RunnerBuilder};
pub use stats::Stats;
pub use wrapper::Wrapper;

/// Version of the proc-runner library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path
pub const DEFAULT_CONFIG_FILE: &str = "./conf/service.toml";

/// Environment variable naming an extra configuration file to merge
pub const EXT_CONFIG_ENV: &str = "PROC_RUNNER_EXT_CONFIG";

/// Configuration section read into [`LogConfig`]
pub const LOG_SECTION: &str = "log";
