//! Per-phase handler registries and the two ways of running them.

use futures::future::join_all;
use std::fmt;
use tracing::{debug, error, info_span, instrument, Instrument};

use crate::context::Context;
use crate::error::ErrorCode;
use crate::exit::ExitCode;
use crate::wrapper::Wrapper;

/// Lifecycle phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Configuration loaders
    ConfigLoaders,
    /// Client initialization
    Clients,
    /// Start hooks
    OnStart,
    /// Long-running servers, run in parallel
    Servers,
    /// Exit hooks, run during unwind
    OnExit,
}

impl Phase {
    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigLoaders => "config_loaders",
            Self::Clients => "clients",
            Self::OnStart => "on_start",
            Self::Servers => "servers",
            Self::OnExit => "on_exit",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only, ordered list of wrappers for one phase.
///
/// Registration order is invocation order.
#[derive(Debug, Clone)]
pub struct Registry {
    phase: Phase,
    wrappers: Vec<Wrapper>,
}

impl Registry {
    /// An empty registry for `phase`.
    #[must_use]
    pub const fn new(phase: Phase) -> Self {
        Self {
            phase,
            wrappers: Vec::new(),
        }
    }

    /// The phase this registry belongs to.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Append a wrapper.
    pub fn push(&mut self, wrapper: Wrapper) {
        self.wrappers.push(wrapper);
    }

    /// Number of registered wrappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    /// Invoke wrappers one after another, stopping at the first non-OK code.
    #[instrument(skip_all, fields(phase = %self.phase, handlers = self.wrappers.len()))]
    pub async fn run_sequential(&self, ctx: &Context) -> ExitCode {
        for (index, wrapper) in self.wrappers.iter().enumerate() {
            let code = wrapper.call(ctx.clone()).await;
            if !code.is_ok() {
                debug!(index, code = %code, registered_at = %wrapper.caller(), "Phase stopped");
                return code;
            }
        }
        ExitCode::Ok
    }

    /// Invoke all wrappers concurrently and wait for every one of them.
    ///
    /// Returns the code of the lowest-indexed failing wrapper, regardless of
    /// completion order. An empty registry returns OK without spawning.
    #[instrument(skip_all, fields(phase = %self.phase, handlers = self.wrappers.len()))]
    pub async fn run_parallel(&self, ctx: &Context) -> ExitCode {
        if self.wrappers.is_empty() {
            return ExitCode::Ok;
        }

        let tasks: Vec<_> = self
            .wrappers
            .iter()
            .enumerate()
            .map(|(index, wrapper)| {
                let wrapper = wrapper.clone();
                let ctx = ctx.clone();
                let span = info_span!("handler", phase = %self.phase, index);
                tokio::spawn(async move { wrapper.call(ctx).await }.instrument(span))
            })
            .collect();

        let results = join_all(tasks).await;

        let mut outcome = ExitCode::Ok;
        for (index, result) in results.into_iter().enumerate() {
            let code = result.unwrap_or_else(|e| {
                error!(
                    phase = %self.phase,
                    index,
                    code = %ErrorCode::RuntimeJoinFailed,
                    error = %e,
                    "Handler task failed to complete"
                );
                ExitCode::HandlerError
            });
            if outcome.is_ok() && !code.is_ok() {
                outcome = code;
            }
        }
        outcome
    }
}
