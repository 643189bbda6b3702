//! RabbitMQ backend.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use log::{debug, info};
use uuid::Uuid;

use super::{Acker, Delivery, DeliveryStream, Queue, QueueError};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// A durable queue on the default exchange, with its own channel.
pub struct AmqpQueue {
    name: String,
    channel: Channel,
    _connection: Arc<Connection>,
}

impl AmqpQueue {
    /// Open a broker connection shared by several queues.
    pub async fn connect(url: &str) -> Result<Arc<Connection>, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        info!("Connected to message broker");
        Ok(Arc::new(connection))
    }

    /// Open a channel and declare `name` as a durable queue.
    pub async fn declare(
        connection: Arc<Connection>,
        name: &str,
        prefetch: u16,
    ) -> Result<Self, QueueError> {
        let channel = connection.create_channel().await?;
        if prefetch > 0 {
            channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await?;
        }

        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!("Declared durable queue {}", name);

        Ok(Self {
            name: name.to_string(),
            channel,
            _connection: connection,
        })
    }
}

#[async_trait]
impl Queue for AmqpQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(PERSISTENT);

        self.channel
            .basic_publish(
                "",
                &self.name,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;
        debug!("Published {} bytes to {}", payload.len(), self.name);
        Ok(())
    }

    async fn consume(&self, auto_ack: bool) -> Result<DeliveryStream, QueueError> {
        let consumer_tag = format!("{}-{}", self.name, Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                &self.name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        info!("Consuming {} as {}", self.name, consumer_tag);

        let stream = consumer.map(move |item| -> Result<Delivery, QueueError> {
            let delivery = item?;
            let acker = if auto_ack {
                Acker::Auto
            } else {
                Acker::Amqp(delivery.acker)
            };
            Ok(Delivery::new(delivery.data, delivery.redelivered, acker))
        });

        Ok(stream.boxed())
    }
}
