use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the download and merge passes.
///
/// Fetch and Parse failures are transient (a worker retries the same offset
/// with backoff); Validation means the field-mapping tables disagree with the
/// live feed and aborts the run; Import is per-file and the caller chooses
/// skip-vs-abort; Store wraps the database driver.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("page fetch at offset {offset} returned status {status}")]
    FetchStatus { offset: u64, status: u16 },

    #[error("transport error at offset {offset}")]
    FetchTransport {
        offset: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed feed document")]
    Parse(#[from] quick_xml::Error),

    #[error("field {field}: cannot coerce {value:?}")]
    Validation { field: &'static str, value: String },

    #[error("unreadable staging file {path}")]
    Import {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("store error")]
    Store(#[from] sqlx::Error),
}

impl EtlError {
    /// Worth retrying at the same offset: network hiccups and truncated or
    /// corrupted transfers that surface as parse failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EtlError::FetchStatus { .. } | EtlError::FetchTransport { .. } | EtlError::Parse(_)
        )
    }
}
