//! Error taxonomy for the collection pipeline and the result cache.
//!
//! An empty selection is not an error: selectors return `None` / an empty
//! list when no source contributed candidates.

use thiserror::Error;

/// The sentiment scorer failed on a text unit.
#[derive(Debug, Error)]
#[error("sentiment scorer failed: {0}")]
pub struct ExtractionError(pub String);

/// One source could not be collected. Caught at the per-source boundary.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("fetch from source '{source_id}' failed: {reason}")]
    Fetch { source_id: String, reason: String },
    #[error("extraction for source '{source_id}' failed")]
    Extraction {
        source_id: String,
        #[source]
        cause: ExtractionError,
    },
    #[error("collection task for source '{source_id}' aborted: {reason}")]
    Aborted { source_id: String, reason: String },
}

impl CollectionError {
    pub fn fetch(source_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Self::Fetch { source_id, .. }
            | Self::Extraction { source_id, .. }
            | Self::Aborted { source_id, .. } => source_id,
        }
    }
}

/// Every source of a run failed, so there is nothing to select from.
#[derive(Debug, Error)]
#[error("all {attempted} sources failed to collect")]
pub struct AllSourcesFailed {
    pub attempted: usize,
}

/// Snapshot load/save failure. The cache falls back to `EMPTY` on load.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("snapshot io on {path}: {cause}")]
    Io {
        path: String,
        #[source]
        cause: std::io::Error,
    },
    #[error("snapshot format on {path}: {cause}")]
    Format {
        path: String,
        #[source]
        cause: serde_json::Error,
    },
    #[error("snapshot timestamp '{0}' is not in %Y-%m-%d %H:%M:%S form")]
    Timestamp(String),
}
