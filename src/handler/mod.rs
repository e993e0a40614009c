//! Handler descriptors, validation and typed adapters.
//!
//! Business code registers ordinary async closures:
//!
//! ```no_run
//! use proc_runner::{BoxError, Context, Runner};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! struct Http {
//!     port: u16,
//! }
//!
//! let mut builder = Runner::builder();
//! builder.add_server("http", |_ctx: Context, http: Http| async move {
//!     println!("listening on {}", http.port);
//!     Ok::<(), BoxError>(())
//! });
//! ```
//!
//! [`IntoHandler`] turns such a closure into a [`RawHandler`] whose
//! [`Signature`] is derived from its generic types, so the validation
//! rules in [`validate`] hold by construction. Dynamic registration paths
//! build a [`DynFn`] by hand and get the same rules checked at run time.

mod signature;
mod validate;

pub use signature::{ConfigTarget, DynBody, DynFn, DynValue, RawHandler, Shape, Signature};
pub use validate::{validate, NormalizedHandler};

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use crate::config::SectionConfig;
use crate::context::Context;
use crate::error::{BoxError, Error, ErrorCode, Result};

/// Values a handler future may resolve to.
pub trait HandlerOutput: Send + 'static {
    /// Declared result shapes.
    fn shapes() -> Vec<Shape>;

    /// Erase into the result values of the calling convention.
    fn into_values(self) -> Vec<DynValue>;
}

impl HandlerOutput for () {
    fn shapes() -> Vec<Shape> {
        Vec::new()
    }

    fn into_values(self) -> Vec<DynValue> {
        Vec::new()
    }
}

impl<E> HandlerOutput for std::result::Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    fn shapes() -> Vec<Shape> {
        vec![Shape::Error]
    }

    fn into_values(self) -> Vec<DynValue> {
        let outcome: Option<BoxError> = self.err().map(Into::into);
        vec![Box::new(outcome)]
    }
}

/// Conversion of a registration argument into a [`RawHandler`].
///
/// `Marker` only disambiguates the blanket implementations and is inferred.
pub trait IntoHandler<Marker>: Send + 'static {
    /// Describe this value for validation.
    fn into_raw(self) -> RawHandler;
}

impl IntoHandler<RawHandler> for RawHandler {
    fn into_raw(self) -> RawHandler {
        self
    }
}

impl IntoHandler<DynFn> for DynFn {
    fn into_raw(self) -> RawHandler {
        RawHandler::Callable(self)
    }
}

impl<H, M> IntoHandler<Option<M>> for Option<H>
where
    H: IntoHandler<M>,
{
    fn into_raw(self) -> RawHandler {
        self.map_or(RawHandler::Absent, IntoHandler::into_raw)
    }
}

impl<F, Fut> IntoHandler<(Context,)> for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn into_raw(self) -> RawHandler {
        let sig = with_results::<Fut::Output>(Signature::new().param(Shape::Context));
        let f = Arc::new(self);

        RawHandler::Callable(DynFn::new(sig, move |args| {
            let f = Arc::clone(&f);
            async move {
                let mut args = args.into_iter();
                let ctx = downcast_arg::<Context>(args.next(), 0)?;
                Ok::<_, Error>(f(ctx).await.into_values())
            }
        }))
    }
}

impl<F, Fut, C> IntoHandler<(Context, C)> for F
where
    F: Fn(Context, C) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
    C: SectionConfig,
{
    fn into_raw(self) -> RawHandler {
        let sig = with_results::<Fut::Output>(
            Signature::new()
                .param(Shape::Context)
                .param(Shape::config::<C>()),
        );
        let f = Arc::new(self);

        RawHandler::Callable(DynFn::new(sig, move |args| {
            let f = Arc::clone(&f);
            async move {
                let mut args = args.into_iter();
                let ctx = downcast_arg::<Context>(args.next(), 0)?;
                let config = downcast_arg::<C>(args.next(), 1)?;
                Ok::<_, Error>(f(ctx, config).await.into_values())
            }
        }))
    }
}

fn with_results<O: HandlerOutput>(sig: Signature) -> Signature {
    O::shapes().into_iter().fold(sig, Signature::result)
}

/// Take argument `position` out of the calling convention as a `T`.
///
/// # Errors
///
/// Will return an error if the argument is missing or of another type.
pub fn downcast_arg<T: 'static>(value: Option<DynValue>, position: usize) -> Result<T> {
    let value = value.ok_or_else(|| {
        Error::runtime_with_code(
            ErrorCode::RuntimeSignatureMismatch,
            format!("argument {position} is missing"),
        )
    })?;

    value.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        Error::runtime_with_code(
            ErrorCode::RuntimeSignatureMismatch,
            format!("argument {position} is not a {}", type_name::<T>()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::exit::ExitCode;
    use crate::meta::Meta;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Foo {
        bar: i64,
    }

    fn signature_of<M, H: IntoHandler<M>>(h: H) -> Signature {
        match h.into_raw() {
            RawHandler::Callable(f) => f.signature().clone(),
            other => panic!("not callable: {other:?}"),
        }
    }

    #[test]
    fn test_closure_signatures() {
        let sig = signature_of(|_ctx: Context| async {});
        assert_eq!(sig, Signature::new().param(Shape::Context));

        let sig = signature_of(|_ctx: Context| async { Ok::<(), BoxError>(()) });
        assert_eq!(sig.results(), &[Shape::Error]);

        let sig = signature_of(|_ctx: Context, _foo: Foo| async { Ok::<(), std::io::Error>(()) });
        assert_eq!(sig.params()[1], Shape::config::<Foo>());
        assert_eq!(sig.results(), &[Shape::Error]);
    }

    #[test]
    fn test_option_absent() {
        let none: Option<fn(Context) -> std::future::Ready<()>> = None;
        assert!(matches!(none.into_raw(), RawHandler::Absent));
        assert!(matches!(
            validate("", None::<RawHandler>.into_raw()),
            Err(Error::Handler { code: ErrorCode::HandlerMissing, .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_handler_receives_config() {
        let seen = Arc::new(AtomicI64::new(0));
        let seen_in = Arc::clone(&seen);
        let raw = (move |_ctx: Context, foo: Foo| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.store(foo.bar, Ordering::SeqCst);
            }
        })
        .into_raw();

        let handler = validate("foo", raw).unwrap();
        let config = Config::from_toml_str("[foo]\nbar = 123\n").unwrap();
        let code = handler.call(Context::new(config, Meta::default())).await;
        assert_eq!(code, ExitCode::Ok);
        assert_eq!(seen.load(Ordering::SeqCst), 123);
    }

    #[tokio::test]
    async fn test_absent_section_gets_default() {
        let seen = Arc::new(AtomicI64::new(-1));
        let seen_in = Arc::clone(&seen);
        let raw = (move |_ctx: Context, foo: Foo| {
            let seen = Arc::clone(&seen_in);
            async move {
                seen.store(foo.bar, Ordering::SeqCst);
            }
        })
        .into_raw();

        let handler = validate("nope", raw).unwrap();
        assert_eq!(handler.call(Context::default()).await, ExitCode::Ok);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_returned_error_is_handler_error() {
        let raw = (|_ctx: Context| async { Err::<(), _>("boom") }).into_raw();
        let handler = validate("", raw).unwrap();
        assert_eq!(handler.call(Context::default()).await, ExitCode::HandlerError);
    }

    #[test]
    fn test_downcast_arg() {
        assert_eq!(downcast_arg::<u8>(Some(Box::new(3_u8)), 0).unwrap(), 3);
        let err = downcast_arg::<u8>(Some(Box::new("x")), 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RuntimeSignatureMismatch);
        assert!(downcast_arg::<u8>(None, 2).is_err());
    }
}
