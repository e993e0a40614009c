//! Signature validation and the normalized handler it produces.

use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use tracing::error;

use super::signature::{ConfigTarget, DynBody, DynValue, RawHandler, Shape, Signature};
use crate::context::Context;
use crate::error::{BoxError, Error, ErrorCode, Result};
use crate::exit::ExitCode;

/// A validated handler bound to its configuration section.
///
/// Produced once by [`validate`] and never mutated afterwards.
#[derive(Clone)]
pub struct NormalizedHandler {
    section: Arc<str>,
    target: Option<ConfigTarget>,
    returns_error: bool,
    body: DynBody,
}

impl NormalizedHandler {
    /// The configuration section this handler reads.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// The configuration structure the handler receives, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&ConfigTarget> {
        self.target.as_ref()
    }

    /// Whether the handler reports failure through its result.
    #[must_use]
    pub const fn returns_error(&self) -> bool {
        self.returns_error
    }

    /// Load the configuration argument, invoke the body and classify the
    /// outcome.
    pub(crate) async fn call(&self, ctx: Context) -> ExitCode {
        let mut args: Vec<DynValue> = Vec::with_capacity(2);

        if let Some(target) = &self.target {
            match target.load(ctx.config(), &self.section) {
                Ok(value) => args.push(value),
                Err(e) => {
                    error!(
                        section = %self.section,
                        target = target.type_name(),
                        error = %e,
                        "Failed to load handler configuration"
                    );
                    return ExitCode::InvalidConfig;
                }
            }
        }
        args.insert(0, Box::new(ctx));

        let results = match (self.body)(args).await {
            Ok(results) => results,
            Err(e) => {
                error!(section = %self.section, error = %e, "Handler invocation failed");
                return ExitCode::HandlerError;
            }
        };

        if !self.returns_error {
            return ExitCode::Ok;
        }

        match results.into_iter().next().map(|r| r.downcast::<Option<BoxError>>()) {
            Some(Ok(outcome)) => match *outcome {
                None => ExitCode::Ok,
                Some(e) => {
                    error!(section = %self.section, error = %e, "Handler returned an error");
                    ExitCode::HandlerError
                }
            },
            _ => {
                error!(
                    section = %self.section,
                    expected = type_name::<Option<BoxError>>(),
                    "Handler result does not match its signature"
                );
                ExitCode::HandlerError
            }
        }
    }
}

impl fmt::Debug for NormalizedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedHandler")
            .field("section", &self.section)
            .field("target", &self.target)
            .field("returns_error", &self.returns_error)
            .finish_non_exhaustive()
    }
}

/// Check `raw` against the handler shape rules and normalize it.
///
/// The rules are applied in order:
///
/// 1. the handler is present and callable;
/// 2. it takes one or two parameters;
/// 3. the first parameter is the [`Context`];
/// 4. a second parameter is an exclusive reference to a configuration structure;
/// 5. it returns nothing or exactly the failure indicator.
///
/// # Errors
///
/// Will return an [`Error::Handler`] naming the first rule that failed.
pub fn validate(section: &str, raw: RawHandler) -> Result<NormalizedHandler> {
    let f = match raw {
        RawHandler::Absent => {
            return Err(Error::handler(ErrorCode::HandlerMissing, "handler is absent"));
        }
        RawHandler::Value { type_name } => {
            return Err(Error::handler(
                ErrorCode::HandlerNotCallable,
                format!("handler is a value of type {type_name}, not a function"),
            ));
        }
        RawHandler::Callable(f) => f,
    };

    let target = check_params(f.signature())?;
    let returns_error = check_results(f.signature())?;

    Ok(NormalizedHandler {
        section: Arc::from(section),
        target,
        returns_error,
        body: f.into_body(),
    })
}

fn check_params(sig: &Signature) -> Result<Option<ConfigTarget>> {
    let params = sig.params();
    if !(1..=2).contains(&params.len()) {
        return Err(Error::handler(
            ErrorCode::HandlerArity,
            format!("handler {sig} takes {} parameters, expected 1 or 2", params.len()),
        ));
    }

    if params[0] != Shape::Context {
        return Err(Error::handler(
            ErrorCode::HandlerContextParam,
            format!("first parameter of {sig} is {}, expected Context", params[0]),
        ));
    }

    match params.get(1) {
        None => Ok(None),
        Some(Shape::Pointer(inner)) => match inner.as_ref() {
            Shape::Struct(target) => Ok(Some(target.clone())),
            other => Err(Error::handler(
                ErrorCode::HandlerConfigParam,
                format!("second parameter of {sig} points to {other}, expected a structure"),
            )),
        },
        Some(other) => Err(Error::handler(
            ErrorCode::HandlerConfigParam,
            format!("second parameter of {sig} is {other}, expected a reference to a structure"),
        )),
    }
}

fn check_results(sig: &Signature) -> Result<bool> {
    match sig.results() {
        [] => Ok(false),
        [Shape::Error] => Ok(true),
        [other] => Err(Error::handler(
            ErrorCode::HandlerResultType,
            format!("handler {sig} returns {other}, expected BoxError"),
        )),
        many => Err(Error::handler(
            ErrorCode::HandlerResultArity,
            format!("handler {sig} returns {} values, expected 0 or 1", many.len()),
        )),
    }
}
