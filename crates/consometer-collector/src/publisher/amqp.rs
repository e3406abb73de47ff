//! RabbitMQ broker over AMQP 0.9.1

use async_trait::async_trait;
use consometer_common::{ConsometerError, Result};
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, instrument, warn};

use super::{Broker, BrokerChannel, Topology, CONTENT_TYPE};

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// RabbitMQ reachable at an `amqp://` URI
pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(skip(self))]
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>> {
        debug!("Connecting to RabbitMQ");
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| ConsometerError::Broker(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "OK").await {
                    warn!("Failed to close RabbitMQ connection: {}", close_err);
                }
                return Err(ConsometerError::Broker(format!("Failed to open channel: {}", e)));
            }
        };

        let mut amqp = AmqpChannel {
            connection,
            channel,
        };
        if let Err(e) = amqp
            .channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
        {
            amqp.shutdown().await;
            return Err(ConsometerError::Broker(format!(
                "Failed enabling publisher confirms: {}",
                e
            )));
        }
        Ok(Box::new(amqp))
    }
}

struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

impl AmqpChannel {
    async fn shutdown(&mut self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!("Failed closing AMQP channel: {}", e);
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!("Failed closing AMQP connection: {}", e);
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare(&mut self, topology: &Topology) -> Result<()> {
        debug!(exchange = %topology.exchange, "Checking existence or declaring exchange");
        self.channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConsometerError::Broker(format!("Failed declaring exchange: {}", e)))?;

        debug!(queue = %topology.queue, "Checking existence or declaring queue");
        self.channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConsometerError::Broker(format!("Failed declaring queue: {}", e)))?;

        debug!("Binding queue to exchange");
        self.channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConsometerError::Broker(format!("Failed binding queue: {}", e)))?;

        Ok(())
    }

    async fn publish(&mut self, topology: &Topology, payload: &[u8]) -> Result<()> {
        let confirm = self
            .channel
            .basic_publish(
                &topology.exchange,
                &topology.routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|e| ConsometerError::Broker(format!("Failed to publish message: {}", e)))?;

        let confirmation = confirm
            .await
            .map_err(|e| ConsometerError::Broker(format!("Publish not confirmed: {}", e)))?;
        if confirmation.is_nack() {
            return Err(ConsometerError::Broker("message nacked by broker".into()));
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let mut amqp = self;
        amqp.shutdown().await;
    }
}
