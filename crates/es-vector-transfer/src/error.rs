//! Error types for es-vector-transfer.
//!
//! Errors fall into two groups. Store-level unavailability
//! ([`Error::SourceUnavailable`], [`Error::DestinationUnavailable`]) ends a
//! transfer; everything raised for a single record or batch is absorbed into
//! [`TransferStats::failed`] by the pipeline.

use thiserror::Error;

use crate::pipeline::TransferStats;

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while moving documents into the vector store.
#[derive(Error, Debug)]
pub enum Error {
    /// The origin store cannot be reached, rejected our credentials or the query.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The embedding backend failed for a batch.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The vector store rejected a batch (or part of it).
    #[error("Destination error: {0}")]
    Destination(String),

    /// The vector store cannot be reached at all.
    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// A record could not be shaped into a mapped record.
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Rate limited by a remote API.
    #[error("Rate limited, retry after {0}s")]
    RateLimit(u64),

    /// Credentials were refused.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding backend and destination index disagree on vector size.
    #[error("Dimension mismatch: embedding backend produces {embedding} dimensions, index expects {index}")]
    DimensionMismatch {
        /// Dimension produced by the embedding backend.
        embedding: usize,
        /// Dimension declared by the destination index.
        index: usize,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failure (worker panic, poisoned state).
    #[error("Internal error: {0}")]
    Internal(String),

    /// The vector store became unusable part way through one call, after
    /// `accepted` vectors of that call were already written.
    #[error("{source} (after {accepted} vectors were written)")]
    PartialWrite {
        /// Vectors acknowledged before the failure.
        accepted: usize,
        /// The fatal error.
        #[source]
        source: Box<Error>,
    },

    /// A transfer stopped on a fatal error. Carries the statistics of the
    /// batches that completed before the abort.
    #[error(
        "Transfer aborted after {} documents ({} upserted, {} failed): {source}",
        .stats.processed, .stats.upserted, .stats.failed
    )]
    Aborted {
        /// Statistics accumulated before the abort.
        stats: TransferStats,
        /// The fatal error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether a destination error means the store is unusable for the rest of the run.
    #[must_use]
    pub fn is_destination_fatal(&self) -> bool {
        matches!(
            self,
            Self::DestinationUnavailable(_)
                | Self::Authentication(_)
                | Self::DimensionMismatch { .. }
                | Self::PartialWrite { .. }
        )
    }

    /// Vectors written by the call that failed with this error.
    #[must_use]
    pub fn written_before_failure(&self) -> usize {
        match self {
            Self::PartialWrite { accepted, .. } => *accepted,
            _ => 0,
        }
    }

    /// Partial statistics attached to an aborted transfer.
    #[must_use]
    pub fn partial_stats(&self) -> Option<&TransferStats> {
        match self {
            Self::Aborted { stats, .. } => Some(stats),
            _ => None,
        }
    }
}
