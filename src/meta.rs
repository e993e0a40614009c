//! Environment metadata written by CI next to the binary.
//!
//! Read from [`META_FILE`] in the working directory. A missing or malformed
//! file never aborts the process; the defaults are used instead.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Conventional location of the metadata file.
pub const META_FILE: &str = ".meta.json";

/// Placeholder revision used when none is known.
const UNKNOWN_REVISION: &str = "00000000";

/// Project and deployment metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    /// Project name
    pub project: String,
    /// Deployment namespace
    pub namespace: String,
    /// Environment tier, e.g. `production`
    pub env: String,
    /// Release type, e.g. `release` or `debug`
    #[serde(rename = "type")]
    pub release_type: String,
    /// Source reference (branch or tag)
    pub git_ref_name: String,
    /// Source revision
    pub git_revision: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            project: executable_name(),
            namespace: String::new(),
            env: "development".to_owned(),
            release_type: "debug".to_owned(),
            git_ref_name: UNKNOWN_REVISION.to_owned(),
            git_revision: UNKNOWN_REVISION.to_owned(),
        }
    }
}

impl Meta {
    /// Read metadata from `path`, falling back to defaults.
    ///
    /// Fields absent from the file keep their defaults.
    #[must_use]
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };

        match serde_json::from_str(&content) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Malformed meta file, using defaults");
                Self::default()
            }
        }
    }

    /// One-line version banner: `<project> rev:<revision>`.
    #[must_use]
    pub fn version_line(&self) -> String {
        format!("{} rev:{}", self.project, self.git_revision)
    }
}

fn executable_name() -> String {
    std::env::args_os()
        .next()
        .and_then(|arg0| {
            Path::new(&arg0)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned())
}
