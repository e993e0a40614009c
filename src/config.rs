//! Configuration management for the proc-runner framework.
//!
//! A [`Config`] is the loaded configuration tree of one run. It is built on
//! top of figment: a base file is loaded, an optional extension file is
//! merged over it, and handlers unmarshal named sections into their own
//! strongly-typed structures.
//!
//! Section policy: an absent section is not an error ([`Config::unmarshal`]
//! returns `Ok(None)`), but a present section that does not fit the target
//! structure is. Fields missing from a present section take their
//! `Default` values.

use arc_swap::ArcSwapOption;
use figment::providers::{Format, Json, Serialized, Toml};
use figment::value::Dict;
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};

/// Structures that can be filled from a configuration section.
///
/// Blanket-implemented; the `Default` value is what a handler receives when
/// its section is absent.
pub trait SectionConfig: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> SectionConfig for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Loaded, read-only configuration tree.
#[derive(Debug, Clone)]
pub struct Config {
    figment: Figment,
    sources: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::empty()
    }
}

impl Config {
    /// An empty configuration. Every section is absent.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            figment: Figment::new(),
            sources: Vec::new(),
        }
    }

    /// Load configuration from a file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// Will return an error if the file cannot be read or cannot be parsed.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            figment: file_figment(path)?,
            sources: vec![path.to_path_buf()],
        })
    }

    /// Parse configuration from an in-memory TOML document.
    ///
    /// # Errors
    ///
    /// Will return an error if the document is not valid TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let figment = Figment::from(Toml::string(content));
        figment.extract::<Dict>()?;
        Ok(Self {
            figment,
            sources: Vec::new(),
        })
    }

    /// Merge another file over this configuration. Values from `path` win.
    ///
    /// # Errors
    ///
    /// Will return an error if the file cannot be read or cannot be parsed.
    /// `self` is left untouched in that case.
    pub fn merge_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let ext = file_figment(path)?;
        self.figment = self.figment.clone().merge(ext);
        self.sources.push(path.to_path_buf());
        Ok(())
    }

    /// Files this configuration was assembled from, in merge order.
    #[must_use]
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Whether `section` exists. The empty section always exists.
    #[must_use]
    pub fn contains(&self, section: &str) -> bool {
        section.is_empty() || self.figment.contains(section)
    }

    /// Unmarshal `section` (or the whole tree when empty) into a fresh `T`.
    ///
    /// Returns `Ok(None)` when the section is absent.
    ///
    /// # Errors
    ///
    /// Will return an error if the section exists but does not deserialize
    /// into `T`.
    pub fn unmarshal<T: SectionConfig>(&self, section: &str) -> Result<Option<T>> {
        let defaults = Figment::from(Serialized::defaults(T::default()));

        if section.is_empty() {
            return defaults
                .merge(self.figment.clone())
                .extract()
                .map(Some)
                .map_err(Error::from);
        }

        if !self.figment.contains(section) {
            return Ok(None);
        }

        let value = self.figment.find_value(section)?;
        if value.as_dict().is_none() {
            return Err(Error::config_with_code(
                ErrorCode::ConfigTypeMismatch,
                format!("section '{section}' is not a table"),
            ));
        }

        defaults
            .merge(Serialized::defaults(value))
            .extract()
            .map(Some)
            .map_err(|e| {
                Error::config_with_source(format!("failed to unmarshal section '{section}'"), e)
            })
    }
}

fn file_figment(path: &Path) -> Result<Figment> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::io_with_source(format!("Failed to read config file {}", path.display()), e)
    })?;

    let figment = if path.extension().and_then(|s| s.to_str()) == Some("json") {
        Figment::from(Json::string(&content))
    } else {
        Figment::from(Toml::string(&content))
    };

    // Providers parse lazily; force it so syntax errors surface at load time.
    figment.extract::<Dict>().map_err(|e| Error::Config {
        code: ErrorCode::ConfigParse,
        message: format!("Failed to parse config file {}", path.display()),
        source: Some(Box::new(e)),
    })?;

    Ok(figment)
}

/// Shared cell filled by a config-loader registered through
/// [`RunnerBuilder::load_config`](crate::RunnerBuilder::load_config).
///
/// Empty until the config-loader phase runs, and stays empty when the
/// section is absent.
#[derive(Debug)]
pub struct ConfigSlot<T> {
    inner: Arc<ArcSwapOption<T>>,
}

impl<T> Clone for ConfigSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ConfigSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwapOption::empty()),
        }
    }
}

impl<T> ConfigSlot<T> {
    /// Create an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The loaded value, if any.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.load_full()
    }

    /// Whether a value has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.load().is_some()
    }

    pub(crate) fn store(&self, value: Option<T>) {
        self.inner.store(value.map(Arc::new));
    }
}
