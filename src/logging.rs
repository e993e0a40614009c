//! Structured logging setup.
//!
//! The runner reads the `log` section of the configuration into a
//! [`LogConfig`] and installs a global `tracing` subscriber from it. When a
//! log file is configured the output goes through a rotating writer that
//! rotates on size and on demand ([`Logger::rotate`], wired to SIGHUP).
//!
//! Anything logged before the logger exists goes through the
//! [`bootstrap_dispatch`] subscriber, which writes to stderr.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;

use crate::error::{Error, Result};

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    #[default]
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging configuration, read from the `log` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level
    pub level: LogLevel,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Enable colored output (ignored for JSON logs and files)
    pub color: bool,
    /// Log file path; stdout when unset
    pub file: Option<PathBuf>,
    /// Maximum log file size in bytes before rotation
    pub max_file_size: Option<u64>,
    /// Number of rotated log files to keep
    pub max_files: Option<u32>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            color: true,
            file: None,
            max_file_size: Some(100 * 1024 * 1024), // 100MB
            max_files: Some(5),
        }
    }
}

/// Handle on the installed logging backend.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    writer: Option<RotatingFileWriter>,
}

impl Logger {
    /// Install the global subscriber described by `config`.
    ///
    /// If a global subscriber is already installed (for example when several
    /// runs share one process) it is kept, and only the file writer is set up.
    ///
    /// # Errors
    ///
    /// Will return an error if the log file cannot be opened or the
    /// subscriber cannot be installed.
    pub fn init(config: &LogConfig) -> Result<Self> {
        let writer = match &config.file {
            Some(path) => Some(
                RotatingFileWriter::new(path.clone(), config.max_file_size, config.max_files)
                    .map_err(|e| {
                        Error::io_with_source(
                            format!("Failed to initialize log file at {}", path.display()),
                            e,
                        )
                    })?,
            ),
            None => None,
        };

        if install_subscriber(config, writer.as_ref())? {
            debug!(level = ?config.level, "Logging initialized");
        } else {
            debug!("Global subscriber already installed, keeping it");
        }

        Ok(Self { writer })
    }

    /// Path of the log file, when logging to a file.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        self.writer.as_ref().map(RotatingFileWriter::path)
    }

    /// Rotate the log file now. No-op when logging to stdout.
    ///
    /// # Errors
    ///
    /// Will return an error if rotated files cannot be renamed or the log
    /// file cannot be reopened.
    pub fn rotate(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer
                .rotate()
                .map_err(|e| Error::io_with_source("Failed to rotate log file", e)),
            None => Ok(()),
        }
    }

    /// Flush buffered output.
    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            let _ = writer.make_guard().flush();
        }
        let _ = io::stdout().flush();
    }
}

/// Returns `false` when a global subscriber was already installed.
fn install_subscriber(config: &LogConfig, writer: Option<&RotatingFileWriter>) -> Result<bool> {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level: tracing::Level = config.level.into();
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::from_level(level).into());

    let make_writer = || {
        writer.map_or_else(
            || BoxMakeWriter::new(io::stdout),
            |writer| BoxMakeWriter::new(writer.clone()),
        )
    };

    if config.json {
        #[cfg(feature = "json-logs")]
        {
            let json_subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(make_writer())
                .json()
                .flatten_event(true)
                .with_current_span(false);

            return Ok(tracing::subscriber::set_global_default(json_subscriber.finish()).is_ok());
        }

        #[cfg(not(feature = "json-logs"))]
        {
            return Err(Error::config(
                "JSON logging requested but feature not enabled",
            ));
        }
    }

    let regular_subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(make_writer())
        .with_ansi(config.color && writer.is_none())
        .compact();

    Ok(tracing::subscriber::set_global_default(regular_subscriber.finish()).is_ok())
}

/// Subscriber used before the configured logger is installed.
#[must_use]
pub fn bootstrap_dispatch() -> Dispatch {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .compact()
        .finish();
    Dispatch::new(subscriber)
}

struct RotatingFileWriterInner {
    file: std::fs::File,
    path: PathBuf,
    max_size: u64,
    max_files: u32,
    size: u64,
}

/// Append-only log file writer with numbered backups (`app.log.1`, ...).
#[derive(Clone)]
struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFileWriterInner>>,
    path: Arc<Path>,
}

impl fmt::Debug for RotatingFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingFileWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RotatingFileWriter {
    fn new(path: PathBuf, max_size: Option<u64>, max_files: Option<u32>) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            path: Arc::from(path.as_path()),
            inner: Arc::new(Mutex::new(RotatingFileWriterInner {
                file,
                path,
                max_size: max_size.unwrap_or(u64::MAX),
                max_files: max_files.unwrap_or(0),
                size,
            })),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("rotating log writer mutex poisoned"))?;
        Self::rotate_locked(&mut inner)
    }

    fn rotate_locked(inner: &mut RotatingFileWriterInner) -> io::Result<()> {
        inner.file.flush()?;
        for idx in (1..=inner.max_files).rev() {
            let from = Self::rotated_path(&inner.path, idx - 1);
            let to = Self::rotated_path(&inner.path, idx);
            if from.exists() {
                let _ = std::fs::remove_file(&to);
                std::fs::rename(&from, &to)?;
            }
        }
        // Reopen even without backups: an external rotator may have moved the file.
        inner.file = open_append(&inner.path)?;
        inner.size = inner.file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(())
    }

    fn rotated_path(path: &Path, idx: u32) -> PathBuf {
        if idx == 0 {
            return path.to_path_buf();
        }
        PathBuf::from(format!("{}.{}", path.display(), idx))
    }

    fn make_guard(&self) -> RotatingFileWriterGuard {
        RotatingFileWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn open_append(path: &Path) -> io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}

struct RotatingFileWriterGuard {
    inner: Arc<Mutex<RotatingFileWriterInner>>,
}

impl io::Write for RotatingFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("rotating log writer mutex poisoned"))?;

        if inner.size.saturating_add(buf.len() as u64) > inner.max_size && inner.max_files > 0 {
            RotatingFileWriter::rotate_locked(&mut inner)?;
        }

        let written = inner.file.write(buf)?;
        inner.size = inner.size.saturating_add(written as u64);
        drop(inner);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("rotating log writer mutex poisoned"))?;
        let result = inner.file.flush();
        drop(inner);
        result
    }
}

impl<'a> tracing_subscriber::fmt::writer::MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        self.make_guard()
    }
}
