//! Run-scoped execution context handed to every handler.

use std::sync::Arc;

use crate::config::Config;
use crate::meta::Meta;
use crate::stats::Stats;

/// Execution context of one run.
///
/// Cheap to clone; all clones share the same read-only configuration.
#[derive(Debug, Clone)]
pub struct Context {
    config: Arc<Config>,
    meta: Arc<Meta>,
    stats: Stats,
}

impl Context {
    /// Create a context over a loaded configuration.
    #[must_use]
    pub fn new(config: Config, meta: Meta) -> Self {
        Self {
            config: Arc::new(config),
            meta: Arc::new(meta),
            stats: Stats::none(),
        }
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Project metadata.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Statistics sink; disabled unless attached with [`Context::with_stats`].
    #[must_use]
    pub const fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Derive a context that records into `stats`.
    #[must_use]
    pub fn with_stats(&self, stats: Stats) -> Self {
        Self {
            config: Arc::clone(&self.config),
            meta: Arc::clone(&self.meta),
            stats,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::empty(), Meta::default())
    }
}
