//! Clustering worker entrypoint: parses configuration, brings the worker
//! through `INIT -> DB_READY`, then hands off to [`messybrainz_cluster::worker::run`].

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use messybrainz_cluster::{Context, HttpMetadataClient, UuidV5Canonicalizer};
use messybrainz_core::{ClusterError, Config};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    let retry_delay = Duration::from_secs(config.error_retry_delay_secs);

    let store =
        messybrainz_cluster::worker::connect_db_with_retry(&config.database_uri, retry_delay).await;

    let canonicalizer: Arc<dyn messybrainz_cluster::Canonicalizer> =
        Arc::new(UuidV5Canonicalizer::new());
    let metadata: Arc<dyn messybrainz_cluster::MetadataClient> =
        Arc::new(HttpMetadataClient::new(config.mb_database_uri.clone()));

    let context = Context::new(config, store, canonicalizer, metadata);

    match messybrainz_cluster::run_worker(context).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ ClusterError::MissingConfig(_)) => {
            tracing::error!(error = %err, "missing mandatory broker configuration");
            // spec's "-1" as an unsigned process exit code.
            ExitCode::from(255)
        }
        Err(err) => {
            tracing::error!(error = %err, "worker exited");
            ExitCode::FAILURE
        }
    }
}
