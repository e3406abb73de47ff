//! In-memory broker
//!
//! Keeps declared topology and published payloads in process. Backs the `--dry-run`
//! mode of the service and the publisher tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use consometer_common::{sum_volumes, ConsometerError, Result};
use parking_lot::Mutex;
use tracing::info;

use super::{Broker, BrokerChannel, Topology};

#[derive(Debug, Default)]
struct BrokerState {
    /// Exchange name to exchange kind
    exchanges: BTreeMap<String, String>,
    queues: BTreeSet<String>,
    /// (queue, exchange, routing key)
    bindings: BTreeSet<(String, String, String)>,
    messages: Vec<Vec<u8>>,
    publish_attempts: usize,
    open_channels: usize,
}

/// Broker living in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    publish_delay: Duration,
    rejected: BTreeSet<usize>,
    unreachable: bool,
    failing_declare: bool,
    retain_messages: bool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            retain_messages: true,
            ..Default::default()
        }
    }

    /// Broker that logs every batch and keeps nothing, for dry runs
    pub fn discarding() -> Self {
        Self::default()
    }

    /// Broker refusing every connection
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new()
        }
    }

    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }

    /// Reject the publish attempt with the given zero-based index
    pub fn rejecting_message(mut self, index: usize) -> Self {
        self.rejected.insert(index);
        self
    }

    pub fn failing_declare(mut self) -> Self {
        self.failing_declare = true;
        self
    }

    pub fn exchanges(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .exchanges
            .iter()
            .map(|(name, kind)| (name.clone(), kind.clone()))
            .collect()
    }

    pub fn queues(&self) -> Vec<String> {
        self.state.lock().queues.iter().cloned().collect()
    }

    pub fn bindings(&self) -> Vec<(String, String, String)> {
        self.state.lock().bindings.iter().cloned().collect()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.state.lock().messages.clone()
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().open_channels
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>> {
        if self.unreachable {
            return Err(ConsometerError::Broker(
                "Failed to connect to RabbitMQ: connection refused".into(),
            ));
        }
        self.state.lock().open_channels += 1;
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
        }))
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare(&mut self, topology: &Topology) -> Result<()> {
        if self.broker.failing_declare {
            return Err(ConsometerError::Broker(format!(
                "Failed declaring exchange {}",
                topology.exchange
            )));
        }
        let mut state = self.broker.state.lock();
        state
            .exchanges
            .entry(topology.exchange.clone())
            .or_insert_with(|| "topic".to_string());
        state.queues.insert(topology.queue.clone());
        state.bindings.insert((
            topology.queue.clone(),
            topology.exchange.clone(),
            topology.routing_key.clone(),
        ));
        Ok(())
    }

    async fn publish(&mut self, topology: &Topology, payload: &[u8]) -> Result<()> {
        if !self.broker.publish_delay.is_zero() {
            tokio::time::sleep(self.broker.publish_delay).await;
        }

        let mut state = self.broker.state.lock();
        let index = state.publish_attempts;
        state.publish_attempts += 1;
        if self.broker.rejected.contains(&index) {
            return Err(ConsometerError::Broker(format!("message {} nacked", index)));
        }

        if self.broker.retain_messages {
            state.messages.push(payload.to_vec());
        } else {
            let (records, volume) = batch_volume(payload);
            info!(
                exchange = %topology.exchange,
                routing_key = %topology.routing_key,
                records,
                volume,
                "Dry run, batch discarded"
            );
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.broker.state.lock().open_channels -= 1;
    }
}

/// Record count and summed numeric volume of an encoded batch
fn batch_volume(payload: &[u8]) -> (usize, i64) {
    let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(payload) else {
        return (0, 0);
    };
    let Some(data) = envelope["args"]["data"].as_array() else {
        return (0, 0);
    };
    let volume = sum_volumes(
        data.iter()
            .filter_map(|record| record["counter_volume"].as_str())
            .filter_map(|volume| volume.trim().parse::<i64>().ok()),
    );
    (data.len(), volume)
}
