//! Runtime counters shared by handlers.
//!
//! [`Stats`] is an optional handle: every operation on an empty handle is a
//! no-op, so handlers can use [`Context::stats`](crate::Context::stats)
//! without checking whether a sink was attached.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Nil-safe, internally synchronized counter map.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    data: Option<Arc<Mutex<HashMap<String, i64>>>>,
}

impl Stats {
    /// A live, empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// An empty handle; all operations are no-ops.
    #[must_use]
    pub const fn none() -> Self {
        Self { data: None }
    }

    /// Whether this handle is attached to a sink.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.data.is_some()
    }

    /// Add `value` to `key`, wrapping on overflow. Empty keys are ignored.
    pub fn add(&self, key: &str, value: i64) {
        if key.is_empty() {
            return;
        }
        if let Some(data) = &self.data {
            let mut data = data.lock();
            let counter = data.entry(key.to_owned()).or_insert(0);
            *counter = counter.wrapping_add(value);
        }
    }

    /// Set `key` to `value`. Empty keys are ignored.
    pub fn set(&self, key: &str, value: i64) {
        if key.is_empty() {
            return;
        }
        if let Some(data) = &self.data {
            data.lock().insert(key.to_owned(), value);
        }
    }

    /// Snapshot of all counters, sorted by key. Empty for a disabled handle.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, i64)> {
        let Some(data) = &self.data else {
            return Vec::new();
        };
        let mut list: Vec<_> = data.lock().iter().map(|(k, v)| (k.clone(), *v)).collect();
        list.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        list
    }
}
