//! Error taxonomy (spec §7).
//!
//! Each variant corresponds to one row of the error-kinds table. Only
//! [`ClusterError::Broker`] and [`ClusterError::DbInit`] are meant to
//! propagate out of a clustering block — every other kind is swallowed at
//! the block boundary by the caller (see `messybrainz_cluster::online`).

use thiserror::Error;

/// Errors recognized by the clustering core.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Unique-constraint conflict during a concurrent write. The caller
    /// treats this as a no-op for the current block, not a failure.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The metadata client reported "no data" for a lookup.
    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    /// Malformed JSON or a non-UUID MBID string in the ingest body.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Broker connection or channel failure. Triggers reconnection in the
    /// worker loop; never silently swallowed.
    #[error("broker closed: {0}")]
    Broker(String),

    /// Database engine failed to initialize at startup.
    #[error("db init failed: {0}")]
    DbInit(#[source] anyhow::Error),

    /// A mandatory configuration key was missing at startup.
    #[error("missing config: {0}")]
    MissingConfig(String),
}

impl ClusterError {
    /// Whether this error should be swallowed at a clustering block
    /// boundary (spec §7 propagation policy) rather than propagated.
    #[must_use]
    pub fn is_block_local(&self) -> bool {
        matches!(
            self,
            ClusterError::Integrity(_) | ClusterError::MissingMetadata(_) | ClusterError::BadInput(_)
        )
    }
}
