//! Reading log messages back off the exchange.
//!
//! Used by the `tail` command and the live broker tests.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, warn};

use super::message::Payload;
use crate::config::AmqpSettings;
use crate::utils::error::{ConnectStage, PublishError};

/// One message taken off the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedMessage {
    pub routing_key: String,
    pub headers: BTreeMap<String, String>,
    pub content_type: String,
    pub payload: Payload,
}

pub struct Consumer {
    connection: Connection,
    channel: Channel,
    deliveries: lapin::Consumer,
    queue: String,
}

impl Consumer {
    /// Binds `queue` to the log exchange once per binding key.
    ///
    /// An empty queue name declares a server-named, exclusive queue that goes
    /// away with the connection.
    pub async fn connect(
        settings: &AmqpSettings,
        queue: &str,
        bindings: &[String],
    ) -> Result<Self, PublishError> {
        let connection = Connection::connect(&settings.url, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::connect(ConnectStage::Connection, e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PublishError::connect(ConnectStage::Channel, e))?;

        channel
            .exchange_declare(
                &settings.exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: settings.exchange.durable,
                    auto_delete: settings.exchange.auto_delete,
                    internal: settings.exchange.internal,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::connect(ConnectStage::Exchange, e))?;

        let transient = queue.is_empty();
        let declared = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: !transient,
                    exclusive: transient,
                    auto_delete: transient,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::Channel(e.to_string()))?;
        let queue = declared.name().as_str().to_string();

        for binding in bindings {
            channel
                .queue_bind(
                    &queue,
                    &settings.exchange_name,
                    binding,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| PublishError::Channel(e.to_string()))?;
            debug!(%queue, %binding, "bound queue to log exchange");
        }

        let deliveries = channel
            .basic_consume(
                &queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PublishError::Channel(e.to_string()))?;

        Ok(Self {
            connection,
            channel,
            deliveries,
            queue,
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next message and acknowledges it. `None` once the
    /// consumer is cancelled or the connection is gone.
    pub async fn next(&mut self) -> Option<Result<ConsumedMessage, PublishError>> {
        let delivery = match self.deliveries.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(PublishError::Channel(e.to_string()))),
        };

        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str().to_string())
            .unwrap_or_default();

        let headers = delivery
            .properties
            .headers()
            .as_ref()
            .map(|table| {
                table
                    .inner()
                    .iter()
                    .map(|(name, value)| (name.as_str().to_string(), header_text(value)))
                    .collect()
            })
            .unwrap_or_default();

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            return Some(Err(PublishError::Channel(e.to_string())));
        }

        let payload = match Payload::decode(&content_type, &delivery.data) {
            Ok(payload) => payload,
            Err(e) => return Some(Err(e)),
        };

        Some(Ok(ConsumedMessage {
            routing_key: delivery.routing_key.as_str().to_string(),
            headers,
            content_type,
            payload,
        }))
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "closing").await {
            warn!(error = %e, "failed to close consumer channel");
        }
        if let Err(e) = self.connection.close(200, "closing").await {
            warn!(error = %e, "failed to close consumer connection");
        }
    }
}

fn header_text(value: &AMQPValue) -> String {
    match value {
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        AMQPValue::ShortString(s) => s.as_str().to_string(),
        other => format!("{other:?}"),
    }
}
