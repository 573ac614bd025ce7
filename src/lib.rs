//! # Crawlstore - persistence for a concurrent network crawler
//!
//! Records what crawler workers learn about peers into a single SQLite file.
//!
//! Crawlstore provides:
//! - A statement executor that gives every call its own connection and
//!   transaction, retrying under a bounded budget instead of locking
//! - A schema manager that resets the store to two empty relations
//! - Recorders for peer observations and peer errors
//! - A reader for offline reporting

pub mod config;
pub mod observation;
pub mod reader;
pub mod report;
pub mod storage;
pub mod store;

// Re-exports for convenient access
pub use config::StoreConfig;
pub use observation::{ErrorCode, ErrorRecord, Nonce, Observation, ObservationFields, PeerAddr};
pub use reader::Reader;
pub use storage::{Backoff, Executor, Params, RetryOn, RetryPolicy, Row, WriteStrategy};
pub use store::CrawlStore;

/// Result type alias for Crawlstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Crawlstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Statement failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Statement rejected: {source}")]
    Rejected {
        #[source]
        source: rusqlite::Error,
    },

    #[error("Missing observation field: {0}")]
    MissingField(String),

    #[error("Invalid observation field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when the failure came out of the write path's retry loop
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. } | Error::Rejected { .. })
    }
}
