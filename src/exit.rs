//! Process exit codes produced by a run.

use serde::{Deserialize, Serialize};

/// Outcome of a handler, a phase or a whole run.
///
/// `Ok` is the default so that "nothing reported yet" and "success" are the
/// same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExitCode {
    /// Everything succeeded
    #[default]
    Ok = 0,
    /// A handler was rejected by signature validation
    InvalidHandler = 1,
    /// A configuration source or section could not be read
    InvalidConfig = 2,
    /// A handler returned a failure or panicked
    HandlerError = 3,
}

impl ExitCode {
    /// Whether this code means success.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Numeric value handed to the operating system.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Stable label for structured logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidHandler => "invalid_handler",
            Self::InvalidConfig => "invalid_config",
            Self::HandlerError => "handler_error",
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), self.as_u8())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code.as_u8())
    }
}
