//! Declared shapes of handler callables.
//!
//! A [`RawHandler`] is what registration receives: nothing, a plain value,
//! or a [`DynFn`] whose [`Signature`] lists the [`Shape`] of every parameter
//! and result. Typed closures produce these descriptors from their generic
//! types (see [`IntoHandler`](super::IntoHandler)); dynamic registration
//! paths build them by hand.
//!
//! # Calling convention
//!
//! A [`DynFn`] body receives its arguments as boxed values in declaration
//! order: the [`Context`](crate::Context) first, then, for a configuration parameter, a
//! freshly loaded instance of the target structure handed over by value.
//! A body declaring an [`Shape::Error`] result returns exactly one value of
//! type `Option<BoxError>`.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::config::{Config, SectionConfig};
use crate::error::Result;

/// A type-erased argument or result.
pub type DynValue = Box<dyn Any + Send>;

/// Type-erased handler body.
pub type DynBody =
    Arc<dyn Fn(Vec<DynValue>) -> BoxFuture<'static, Result<Vec<DynValue>>> + Send + Sync>;

/// Descriptor of a configuration structure type.
#[derive(Clone)]
pub struct ConfigTarget {
    type_name: &'static str,
    type_id: TypeId,
    load: fn(&Config, &str) -> Result<DynValue>,
}

impl ConfigTarget {
    /// Descriptor for `T`.
    #[must_use]
    pub fn of<T: SectionConfig>() -> Self {
        Self {
            type_name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            load: load_section::<T>,
        }
    }

    /// Name of the target type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Identity of the target type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Allocate a fresh instance and fill it from `section`.
    ///
    /// An absent section yields the type's default value.
    ///
    /// # Errors
    ///
    /// Will return an error if the section exists but does not fit the type.
    pub fn load(&self, config: &Config, section: &str) -> Result<DynValue> {
        (self.load)(config, section)
    }
}

impl fmt::Debug for ConfigTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConfigTarget").field(&self.type_name).finish()
    }
}

impl PartialEq for ConfigTarget {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

fn load_section<T: SectionConfig>(config: &Config, section: &str) -> Result<DynValue> {
    let value: T = config.unmarshal(section)?.unwrap_or_default();
    Ok(Box::new(value))
}

/// Declared type of one parameter or result.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// The run [`Context`](crate::Context)
    Context,
    /// The failure indicator, carried as `Option<BoxError>`
    Error,
    /// A configuration structure, by value
    Struct(ConfigTarget),
    /// An exclusive reference to the inner shape
    Pointer(Box<Shape>),
    /// Any other concrete type
    Named(&'static str),
    /// A trait object other than the failure indicator
    Dyn(&'static str),
}

impl Shape {
    /// Exclusive reference to the configuration structure `T`.
    #[must_use]
    pub fn config<T: SectionConfig>() -> Self {
        Self::Pointer(Box::new(Self::Struct(ConfigTarget::of::<T>())))
    }

    /// Any other concrete type `T`.
    #[must_use]
    pub fn named<T: ?Sized>() -> Self {
        Self::Named(type_name::<T>())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context => f.write_str("Context"),
            Self::Error => f.write_str("BoxError"),
            Self::Struct(target) => f.write_str(target.type_name()),
            Self::Pointer(inner) => write!(f, "&mut {inner}"),
            Self::Named(name) => f.write_str(name),
            Self::Dyn(name) => write!(f, "dyn {name}"),
        }
    }
}

/// Parameter and result shapes of a callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Shape>,
    results: Vec<Shape>,
}

impl Signature {
    /// An empty signature: no parameters, no results.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            params: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, shape: Shape) -> Self {
        self.params.push(shape);
        self
    }

    /// Append a result.
    #[must_use]
    pub fn result(mut self, shape: Shape) -> Self {
        self.results.push(shape);
        self
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[Shape] {
        &self.params
    }

    /// Declared results.
    #[must_use]
    pub fn results(&self) -> &[Shape] {
        &self.results
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |shapes: &[Shape]| {
            shapes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "fn({})", join(&self.params))?;
        match self.results.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " -> {single}"),
            many => write!(f, " -> ({})", join(many)),
        }
    }
}

/// A callable with a declared signature and a type-erased body.
#[derive(Clone)]
pub struct DynFn {
    signature: Signature,
    body: DynBody,
}

impl DynFn {
    /// Pair `body` with the signature it follows.
    pub fn new<F, Fut>(signature: Signature, body: F) -> Self
    where
        F: Fn(Vec<DynValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<DynValue>>> + Send + 'static,
    {
        Self {
            signature,
            body: Arc::new(move |args| body(args).boxed()),
        }
    }

    /// The declared signature.
    #[must_use]
    pub const fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn into_body(self) -> DynBody {
        self.body
    }
}

impl fmt::Debug for DynFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynFn")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Handler value as supplied at registration, before validation.
#[derive(Debug, Clone)]
pub enum RawHandler {
    /// No handler was supplied
    Absent,
    /// A value that is not callable
    Value {
        /// Type name of the value
        type_name: &'static str,
    },
    /// A callable with a declared signature
    Callable(DynFn),
}

impl RawHandler {
    /// Describe an arbitrary non-callable value.
    #[must_use]
    pub fn value<T: ?Sized>(_value: &T) -> Self {
        Self::Value {
            type_name: type_name::<T>(),
        }
    }
}

impl From<DynFn> for RawHandler {
    fn from(f: DynFn) -> Self {
        Self::Callable(f)
    }
}
