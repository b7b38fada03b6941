//! Explicit application context (spec §9 design note "re-architect as an
//! explicit Context struct"), replacing the source's process-wide DB engine
//! and request-context singletons.

use std::sync::Arc;

use messybrainz_core::Config;

use crate::canonicalizer::Canonicalizer;
use crate::metadata_client::MetadataClient;
use crate::store::postgres::PostgresStore;

/// Bundles everything the worker and clustering protocol need, built once
/// at startup and shared by reference thereafter.
pub struct Context {
    pub config: Config,
    pub store: PostgresStore,
    pub canonicalizer: Arc<dyn Canonicalizer>,
    pub metadata: Arc<dyn MetadataClient>,
}

impl Context {
    #[must_use]
    pub fn new(
        config: Config,
        store: PostgresStore,
        canonicalizer: Arc<dyn Canonicalizer>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        Self {
            config,
            store,
            canonicalizer,
            metadata,
        }
    }
}
