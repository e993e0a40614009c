//! Panic-safe `(Context) -> ExitCode` adapters around handlers.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tracing::error;

use crate::context::Context;
use crate::error::{Error, ErrorCode};
use crate::exit::ExitCode;
use crate::fault;
use crate::handler::NormalizedHandler;

type Invoke = Arc<dyn Fn(Context) -> BoxFuture<'static, ExitCode> + Send + Sync>;

/// A registered handler reduced to a fixed signature.
///
/// Every call runs inside a fault barrier: a panic anywhere in the handler
/// is logged with its backtrace and reported as [`ExitCode::HandlerError`].
#[derive(Clone)]
pub struct Wrapper {
    caller: &'static Location<'static>,
    invoke: Invoke,
}

impl Wrapper {
    /// Wrap a validated handler.
    #[must_use]
    pub fn from_handler(handler: NormalizedHandler, caller: &'static Location<'static>) -> Self {
        let handler = Arc::new(handler);
        Self::from_fn(caller, move |ctx| {
            let handler = Arc::clone(&handler);
            async move { handler.call(ctx).await }
        })
    }

    /// A placeholder for a handler that failed validation.
    ///
    /// Calling it logs `err` with the registration site and yields
    /// [`ExitCode::InvalidHandler`].
    #[must_use]
    pub fn invalid(err: Error, caller: &'static Location<'static>) -> Self {
        let err = Arc::new(err);
        Self::from_fn(caller, move |_ctx| {
            let err = Arc::clone(&err);
            async move {
                error!(
                    error = %err,
                    code = %err.code(),
                    registered_at = %caller,
                    "Invalid handler"
                );
                ExitCode::InvalidHandler
            }
        })
    }

    /// Wrap an arbitrary async function.
    pub fn from_fn<F, Fut>(caller: &'static Location<'static>, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExitCode> + Send + 'static,
    {
        Self {
            caller,
            invoke: Arc::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Where this handler was registered.
    #[must_use]
    pub const fn caller(&self) -> &'static Location<'static> {
        self.caller
    }

    /// Invoke the handler. Never panics.
    pub async fn call(&self, ctx: Context) -> ExitCode {
        let invoke = Arc::clone(&self.invoke);
        match fault::contain(async move { invoke(ctx).await }).await {
            Ok(code) => code,
            Err(fault) => {
                error!(
                    code = %ErrorCode::RuntimePanic,
                    panic = %fault.message,
                    location = fault.location.as_deref().unwrap_or("unknown"),
                    registered_at = %self.caller,
                    backtrace = %fault.backtrace,
                    "Handler panicked"
                );
                ExitCode::HandlerError
            }
        }
    }
}

impl fmt::Debug for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("caller", &self.caller)
            .finish_non_exhaustive()
    }
}
