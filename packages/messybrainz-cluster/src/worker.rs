//! Worker loop state machine (spec §4.F):
//! `INIT -> DB_READY -> MB_READY -> CONNECTED -> CONSUMING <-> RECONNECTING`.

use std::time::Duration;

use messybrainz_core::{ClusterError, Listen};
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::broker::{ResilientChannel, Topology};
use crate::context::Context;
use crate::online::OnlineClusterer;
use crate::store::postgres::PostgresStore;

/// Runs the worker loop to completion -- in practice, forever, since
/// `CONSUMING` only exits via process termination (spec §5 "process-level
/// termination is ungraceful").
pub async fn run(context: Context) -> Result<(), ClusterError> {
    let retry_delay = Duration::from_secs(context.config.error_retry_delay_secs);

    // INIT -> DB_READY: context.store's pool is already connected by the
    // caller (see `bin/messybrainz_cluster.rs`), which performs this retry
    // loop before constructing `Context`. Here we only need MB_READY and
    // CONNECTED.
    wait_for_mb_ready(&context.config.mb_database_uri, retry_delay).await;

    let amqp_uri = match context.config.amqp_uri() {
        Ok(uri) => uri,
        Err(err) => {
            error!(error = %err, "missing mandatory broker configuration");
            tokio::time::sleep(Duration::from_secs(3)).await;
            return Err(err);
        }
    };

    let topology = Topology {
        incoming_exchange: context.config.incoming_exchange.clone(),
        incoming_queue: context.config.incoming_queue.clone(),
        unique_exchange: context.config.unique_exchange.clone(),
    };

    let mut channel = ResilientChannel::connect(&amqp_uri, topology, retry_delay).await;
    info!("worker entering CONSUMING state");

    let clusterer = OnlineClusterer::new(
        context.store.clone(),
        context.canonicalizer.clone(),
        context.metadata.clone(),
    );

    loop {
        let delivery = channel.next_delivery().await;
        match Listen::parse(&delivery.body) {
            Ok(listen) => {
                if let Err(err) = clusterer.process(&listen).await {
                    warn!(error = %err, "online clustering failed for this delivery");
                }
            }
            Err(err) => {
                warn!(error = %err, "bad input, skipping clustering for this delivery");
            }
        }
        channel.publish_unique(&delivery.body).await;
        channel.ack(delivery.delivery_tag).await;
    }
}

/// `DB_READY -> MB_READY`: same retry pattern as the main database,
/// against the MusicBrainz read replica.
async fn wait_for_mb_ready(mb_database_uri: &str, retry_delay: Duration) {
    loop {
        match PgPool::connect(mb_database_uri).await {
            Ok(_pool) => {
                info!("MusicBrainz replica reachable");
                return;
            }
            Err(err) => {
                error!(error = %err, "MusicBrainz replica unreachable, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// `INIT -> DB_READY`: connects the main database pool, retrying forever
/// on failure (spec §4.F, §7 "DB init failure").
pub async fn connect_db_with_retry(database_uri: &str, retry_delay: Duration) -> PostgresStore {
    loop {
        match PostgresStore::connect(database_uri).await {
            Ok(store) => {
                info!("main database reachable");
                return store;
            }
            Err(err) => {
                error!(error = %err, "main database unreachable, retrying");
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}
