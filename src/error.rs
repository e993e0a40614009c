//! Error handling for the proc-runner framework.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors carry a
//! structured [`ErrorCode`] for programmatic handling, a human-readable
//! message and an optional source error.
//!
//! Errors never leave a run: a failure to prepare the run is logged and
//! turned into an [`ExitCode`](crate::ExitCode) through [`Error::exit_code`].
//!
//! # Usage Examples
//!
//! ```no_run
//! use proc_runner::{Error, Result};
//!
//! fn read_port(raw: &str) -> Result<u16> {
//!     raw.parse()
//!         .map_err(|e| Error::config_with_source(format!("invalid port {raw:?}"), e))
//! }
//! ```

use crate::exit::ExitCode;

/// Result type alias for proc-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure indicator returned by business handlers.
///
/// Any `std::error::Error + Send + Sync` and any string converts into it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error code enum for categorizing and identifying errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Configuration errors: 1000-1999
    /// Configuration content is invalid
    ConfigInvalid = 1000,
    /// Configuration source could not be parsed
    ConfigParse = 1001,
    /// Configuration source does not exist
    ConfigMissing = 1002,
    /// A section does not match the target structure
    ConfigTypeMismatch = 1003,

    // Handler validation errors: 2000-2999
    /// Handler is absent
    HandlerMissing = 2000,
    /// Handler is not a callable
    HandlerNotCallable = 2001,
    /// Handler takes the wrong number of parameters
    HandlerArity = 2002,
    /// First parameter is not the run context
    HandlerContextParam = 2003,
    /// Second parameter is not a reference to a configuration structure
    HandlerConfigParam = 2004,
    /// Handler returns too many values
    HandlerResultArity = 2005,
    /// Handler result is not the failure indicator
    HandlerResultType = 2006,

    // Signal handling errors: 3000-3999
    /// A signal listener could not be installed
    SignalRegisterFailed = 3000,

    // IO errors: 5000-5999
    /// Generic I/O failure
    IoError = 5000,
    /// File does not exist
    FileNotFound = 5001,

    // Runtime errors: 6000-6999
    /// A handler panicked
    RuntimePanic = 6000,
    /// A handler body produced values that do not match its signature
    RuntimeSignatureMismatch = 6001,
    /// A spawned task could not be joined
    RuntimeJoinFailed = 6002,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigParse => "CONFIG_PARSE",
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ConfigTypeMismatch => "CONFIG_TYPE_MISMATCH",

            Self::HandlerMissing => "HANDLER_MISSING",
            Self::HandlerNotCallable => "HANDLER_NOT_CALLABLE",
            Self::HandlerArity => "HANDLER_ARITY",
            Self::HandlerContextParam => "HANDLER_CONTEXT_PARAM",
            Self::HandlerConfigParam => "HANDLER_CONFIG_PARAM",
            Self::HandlerResultArity => "HANDLER_RESULT_ARITY",
            Self::HandlerResultType => "HANDLER_RESULT_TYPE",

            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",

            Self::IoError => "IO_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",

            Self::RuntimePanic => "RUNTIME_PANIC",
            Self::RuntimeSignatureMismatch => "RUNTIME_SIGNATURE_MISMATCH",
            Self::RuntimeJoinFailed => "RUNTIME_JOIN_FAILED",
        }
    }
}

/// Error type for all runner operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error [{code}]: {message}")]
    Config {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// Handler signature validation errors
    #[error("Invalid handler [{code}]: {message}")]
    Handler {
        /// Error code identifying the violated rule
        code: ErrorCode,
        /// Human-readable error message
        message: String,
    },

    /// Signal handling errors
    #[error("Signal handling error [{code}]: {message}")]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// I/O operation errors
    #[error("I/O error [{code}]: {message}")]
    Io {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxError>,
    },

    /// Runtime errors raised while invoking handlers
    #[error("Runtime error [{code}]: {message}")]
    Runtime {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new configuration error with specific code.
    pub fn config_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new configuration error with source error.
    pub fn config_with_source<S: Into<String>, E: Into<BoxError>>(message: S, source: E) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new handler validation error.
    pub fn handler<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Handler {
            code,
            message: message.into(),
        }
    }

    /// Create a new signal error with source error.
    pub fn signal_with_source<S: Into<String>, E: Into<BoxError>>(message: S, source: E) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new I/O error with source error.
    pub fn io_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        let code = if source_is_not_found(&source) {
            ErrorCode::FileNotFound
        } else {
            ErrorCode::IoError
        };
        Self::Io {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new runtime error with specific code.
    pub fn runtime_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Runtime {
            code,
            message: message.into(),
        }
    }

    /// Get the structured error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { code, .. }
            | Self::Handler { code, .. }
            | Self::Signal { code, .. }
            | Self::Io { code, .. }
            | Self::Runtime { code, .. } => *code,
        }
    }

    /// Check if this error is configuration-related.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Map this error onto the process exit code it stands for.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config { .. } | Self::Io { .. } => ExitCode::InvalidConfig,
            Self::Handler { .. } => ExitCode::InvalidHandler,
            Self::Signal { .. } | Self::Runtime { .. } => ExitCode::HandlerError,
        }
    }
}

fn source_is_not_found(source: &(dyn std::error::Error + 'static)) -> bool {
    source
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_with_source("I/O operation failed", err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        let code = if err.missing() {
            ErrorCode::ConfigMissing
        } else {
            ErrorCode::ConfigTypeMismatch
        };
        Self::Config {
            code,
            message: format!("Configuration loading failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}
