//! Resilient broker channel (spec §4.F, §9 design note "model this cleanly
//! as a resilient channel abstraction").
//!
//! Wraps a `lapin` connection/channel pair so that `publish` and `ack`
//! internally loop on reconnect until they succeed, rather than surfacing
//! transport errors to the clustering logic above them.

use std::time::Duration;

use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use messybrainz_core::ClusterError;
use tracing::{error, info, warn};

/// A delivery pulled off the incoming queue.
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

/// Topology names the resilient channel declares on (re)connect.
#[derive(Debug, Clone)]
pub struct Topology {
    pub incoming_exchange: String,
    pub incoming_queue: String,
    pub unique_exchange: String,
}

/// A broker connection that reconnects and redeclares its topology
/// transparently. `publish_unique`/`ack` retry internally until they
/// succeed or the process is killed -- the spec gives the retry loops no
/// upper bound (§5 "wait forever for dependencies").
pub struct ResilientChannel {
    connection: Connection,
    incoming_channel: Channel,
    unique_channel: Channel,
    consumer: Consumer,
    topology: Topology,
    amqp_uri: String,
    retry_delay: Duration,
}

impl ResilientChannel {
    /// Connects, declares topology, and registers the incoming consumer,
    /// retrying indefinitely every `retry_delay` on any failure (spec §4.F
    /// `MB_READY -> CONNECTED`).
    pub async fn connect(amqp_uri: &str, topology: Topology, retry_delay: Duration) -> Self {
        loop {
            match Self::try_connect(amqp_uri, &topology).await {
                Ok(channel) => return channel,
                Err(err) => {
                    error!(error = %err, "broker connect failed, retrying");
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    async fn try_connect(amqp_uri: &str, topology: &Topology) -> Result<Self, ClusterError> {
        let connection = Connection::connect(amqp_uri, ConnectionProperties::default())
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;

        let incoming_channel = connection
            .create_channel()
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;
        let unique_channel = connection
            .create_channel()
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;

        incoming_channel
            .exchange_declare(
                &topology.incoming_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;
        incoming_channel
            .queue_declare(
                &topology.incoming_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;
        incoming_channel
            .queue_bind(
                &topology.incoming_queue,
                &topology.incoming_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;

        unique_channel
            .exchange_declare(
                &topology.unique_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;

        let consumer = incoming_channel
            .basic_consume(
                &topology.incoming_queue,
                "messybrainz-cluster",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| ClusterError::Broker(err.to_string()))?;

        info!(
            incoming_exchange = %topology.incoming_exchange,
            incoming_queue = %topology.incoming_queue,
            unique_exchange = %topology.unique_exchange,
            "broker topology declared"
        );

        Ok(Self {
            connection,
            incoming_channel,
            unique_channel,
            consumer,
            topology: topology.clone(),
            amqp_uri: amqp_uri.to_string(),
            retry_delay,
        })
    }

    /// Waits for the next delivery. On a consumer-stream failure, reconnects
    /// and resubscribes before returning the next delivery.
    pub async fn next_delivery(&mut self) -> Delivery {
        loop {
            match self.try_next_delivery().await {
                Some(delivery) => return delivery,
                None => self.reconnect().await,
            }
        }
    }

    async fn try_next_delivery(&mut self) -> Option<Delivery> {
        use futures_util::StreamExt;
        match self.consumer.next().await {
            Some(Ok(delivery)) => Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
            }),
            Some(Err(err)) => {
                warn!(error = %err, "consumer stream error");
                None
            }
            None => {
                warn!("consumer stream closed");
                None
            }
        }
    }

    /// Publishes `body` to `UNIQUE_EXCHANGE` with persistent delivery mode,
    /// retrying through reconnect until it succeeds (spec §4.F CONSUMING
    /// step a).
    pub async fn publish_unique(&mut self, body: &[u8]) {
        loop {
            let outcome = self
                .unique_channel
                .basic_publish(
                    &self.topology.unique_exchange,
                    "",
                    BasicPublishOptions::default(),
                    body,
                    BasicProperties::default().with_delivery_mode(2),
                )
                .await;
            match outcome {
                Ok(confirm) => {
                    if confirm.await.is_ok() {
                        return;
                    }
                    warn!("publish confirmation failed, reconnecting");
                }
                Err(err) => {
                    warn!(error = %err, "publish failed, reconnecting");
                }
            }
            self.reconnect().await;
        }
    }

    /// Acks `delivery_tag` on the incoming channel, retrying through
    /// reconnect until it succeeds (spec §4.F CONSUMING step b). A
    /// reconnect invalidates the original delivery tag, so callers must
    /// only ack deliveries pulled from the current `next_delivery` cycle --
    /// on reconnect, undelivered messages are simply redelivered and
    /// reprocessed (spec §5: delivery is at-least-once).
    pub async fn ack(&mut self, delivery_tag: u64) {
        loop {
            match self
                .incoming_channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
            {
                Ok(()) => return,
                Err(err) => {
                    warn!(error = %err, "ack failed, reconnecting");
                    self.reconnect().await;
                    return;
                }
            }
        }
    }

    async fn reconnect(&mut self) {
        let _ = self.connection.close(0, "reconnecting").await;
        let reconnected = Self::connect(&self.amqp_uri, self.topology.clone(), self.retry_delay).await;
        *self = reconnected;
    }
}
