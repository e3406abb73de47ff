//! Batch publisher
//!
//! Opens one broker channel per publish stage, declares the topology, then delivers
//! batches one message at a time until they run out or the stage deadline fires.
//! Every accepted batch is confirmed back to the caller with its record count.

pub mod amqp;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use consometer_common::{sum_volumes, RabbitSettings, Result, UsageRecord};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Content type of every published message
pub const CONTENT_TYPE: &str = "application/json";

/// Exchange, queue and the routing key binding them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl From<&RabbitSettings> for Topology {
    fn from(rabbit: &RabbitSettings) -> Self {
        Self {
            exchange: rabbit.exchange.clone(),
            queue: rabbit.queue.clone(),
            routing_key: rabbit.routing_key.clone(),
        }
    }
}

/// A message broker able to open publishing channels
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>>;
}

/// One open connection + channel, owned by a single publish stage
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare the topic exchange, the durable queue and their binding. Idempotent.
    async fn declare(&mut self, topology: &Topology) -> Result<()>;

    /// Publish one message and wait for the broker to accept it
    async fn publish(&mut self, topology: &Topology, payload: &[u8]) -> Result<()>;

    async fn close(self: Box<Self>);
}

#[derive(Serialize)]
struct Envelope<'a> {
    args: EnvelopeArgs<'a>,
}

#[derive(Serialize)]
struct EnvelopeArgs<'a> {
    data: &'a [UsageRecord],
}

/// Serialize a batch as `{"args":{"data":[...]}}`
pub fn encode_batch(batch: &[UsageRecord]) -> Result<Vec<u8>> {
    let envelope = Envelope {
        args: EnvelopeArgs { data: batch },
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Publishes region batches through a [`Broker`]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    topology: Topology,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, topology: Topology) -> Self {
        Self { broker, topology }
    }

    /// Connect and declare the topology. Any failure here aborts the publish stage.
    #[instrument(skip(self), fields(exchange = %self.topology.exchange, queue = %self.topology.queue))]
    pub async fn open(&self) -> Result<Delivery> {
        let mut channel = self.broker.connect().await?;

        debug!("Checking existence or declaring topology");
        if let Err(e) = channel.declare(&self.topology).await {
            channel.close().await;
            return Err(e);
        }

        Ok(Delivery {
            channel,
            topology: self.topology.clone(),
        })
    }

    /// Open a channel, deliver `batches` within `budget` and return the number of
    /// records the broker accepted.
    pub async fn publish(&self, batches: Vec<Vec<UsageRecord>>, budget: Duration) -> Result<usize> {
        let mut confirmations = self.open().await?.deliver(batches, budget);

        let mut published = 0;
        while let Some(count) = confirmations.recv().await {
            published += count;
        }
        Ok(published)
    }
}

/// An open, declared channel ready to deliver batches
pub struct Delivery {
    channel: Box<dyn BrokerChannel>,
    topology: Topology,
}

impl Delivery {
    /// Deliver `batches` in order and stream back the size of each accepted batch.
    ///
    /// Once `budget` has elapsed no further batch is sent; an in-flight publish is
    /// allowed to settle. The channel is closed before the stream ends.
    pub fn deliver(self, batches: Vec<Vec<UsageRecord>>, budget: Duration) -> mpsc::Receiver<usize> {
        let deadline = Instant::now() + budget;
        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (confirm_tx, confirm_rx) = mpsc::channel(1);

        tokio::spawn(feed_batches(batches, batch_tx, deadline));
        tokio::spawn(self.run(batch_rx, confirm_tx, deadline));

        confirm_rx
    }

    async fn run(
        self,
        mut batch_rx: mpsc::Receiver<Vec<UsageRecord>>,
        confirm_tx: mpsc::Sender<usize>,
        deadline: Instant,
    ) {
        let Delivery {
            mut channel,
            topology,
        } = self;

        while let Some(batch) = batch_rx.recv().await {
            if Instant::now() >= deadline {
                debug!("Publish deadline reached, dropping remaining batches");
                break;
            }

            let size = batch.len();
            let volume = sum_volumes(batch.iter().filter_map(UsageRecord::volume));
            let payload = match encode_batch(&batch) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("cannot encode rabbit payload: {}", e);
                    continue;
                }
            };

            match channel.publish(&topology, &payload).await {
                Ok(()) => {
                    debug!(records = size, volume, bytes = payload.len(), "Batch published");
                    if confirm_tx.send(size).await.is_err() {
                        warn!("Confirmation stream dropped by caller");
                        break;
                    }
                }
                Err(e) => error!(records = size, "Failed to publish message: {}", e),
            }
        }

        drop(batch_rx);
        channel.close().await;
        info!("Delivery finished, channel closed");
    }
}

async fn feed_batches(
    batches: Vec<Vec<UsageRecord>>,
    batch_tx: mpsc::Sender<Vec<UsageRecord>>,
    deadline: Instant,
) {
    let total = batches.len();
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    for (sent, batch) in batches.into_iter().enumerate() {
        tokio::select! {
            biased;
            _ = &mut sleep => {
                warn!(
                    unsent = total - sent,
                    total,
                    "Publish deadline reached before all batches were handed out"
                );
                return;
            }
            res = batch_tx.send(batch) => {
                if res.is_err() {
                    debug!(unsent = total - sent, "Delivery stopped, feeder exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryBroker;
    use super::*;

    fn topology() -> Topology {
        Topology {
            exchange: "ceilometer".into(),
            queue: "metering.sample".into(),
            routing_key: "metering.sample".into(),
        }
    }

    fn batch(n: usize) -> Vec<UsageRecord> {
        (0..n)
            .map(|i| UsageRecord::new(&format!("p{}", i), "int5", "1"))
            .collect()
    }

    #[test]
    fn test_envelope_shape() {
        let payload = encode_batch(&batch(2)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        let data = value["args"]["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["counter_name"], "storage.objects.size");
        assert_eq!(value.as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publishes_every_batch() {
        let broker = Arc::new(MemoryBroker::new());
        let publisher = Publisher::new(broker.clone(), topology());

        let published = publisher
            .publish(vec![batch(200), batch(200), batch(17)], Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(published, 417);
        assert_eq!(broker.messages().len(), 3);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let broker = Arc::new(MemoryBroker::new().rejecting_message(1));
        let publisher = Publisher::new(broker.clone(), topology());

        let published = publisher
            .publish(vec![batch(3), batch(4), batch(5)], Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(published, 8);
        assert_eq!(broker.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_delivery() {
        let broker = Arc::new(MemoryBroker::new().with_publish_delay(Duration::from_millis(150)));
        let publisher = Publisher::new(broker.clone(), topology());

        let published = publisher
            .publish(vec![batch(200), batch(200), batch(50)], Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(published, 200);
        assert_eq!(broker.messages().len(), 1);
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_a_stage_error() {
        let broker = Arc::new(MemoryBroker::unreachable());
        let publisher = Publisher::new(broker, topology());

        assert!(publisher.publish(vec![batch(1)], Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_declare_failure_closes_channel() {
        let broker = Arc::new(MemoryBroker::new().failing_declare());
        let publisher = Publisher::new(broker.clone(), topology());

        assert!(publisher.open().await.is_err());
        assert_eq!(broker.open_channels(), 0);
    }
}
