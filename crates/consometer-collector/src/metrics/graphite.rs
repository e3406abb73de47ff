//! Graphite plaintext sink
//!
//! Writes `<prefix>.<name> <value> <timestamp>\n` lines over TCP. The connection is
//! opened lazily and dropped after a write error so the next metric reconnects.

use async_trait::async_trait;
use chrono::Utc;
use consometer_common::{ConsometerError, GraphiteSettings, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::MetricsSink;

/// Graphite relay reachable over TCP
pub struct GraphiteSink {
    addr: String,
    prefix: String,
    stream: Mutex<Option<TcpStream>>,
}

impl GraphiteSink {
    /// Sink for `host:port`; no connection is made until the first metric
    pub fn new(host: &str, port: u16, prefix: impl Into<String>) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            prefix: prefix.into(),
            stream: Mutex::new(None),
        }
    }

    /// Connect eagerly, failing if the relay is unreachable
    #[instrument(skip(settings), fields(host = %settings.hostname, port = settings.port))]
    pub async fn connect(settings: &GraphiteSettings) -> Result<Self> {
        let sink = Self::new(&settings.hostname, settings.port, settings.prefix.clone());
        let stream = TcpStream::connect(&sink.addr).await.map_err(|e| {
            ConsometerError::Metrics(format!("cannot connect to graphite at {}: {}", sink.addr, e))
        })?;
        *sink.stream.lock().await = Some(stream);
        debug!("Connected to graphite");
        Ok(sink)
    }

    fn line(&self, name: &str, value: i64, timestamp: i64) -> String {
        if self.prefix.is_empty() {
            format!("{} {} {}\n", name, value, timestamp)
        } else {
            format!("{}.{} {} {}\n", self.prefix, name, value, timestamp)
        }
    }
}

#[async_trait]
impl MetricsSink for GraphiteSink {
    async fn send(&self, name: &str, value: i64) -> Result<()> {
        let line = self.line(name, value, Utc::now().timestamp());
        let mut guard = self.stream.lock().await;

        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => TcpStream::connect(&self.addr).await.map_err(|e| {
                ConsometerError::Metrics(format!("cannot connect to graphite: {}", e))
            })?,
        };

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ConsometerError::Metrics(format!("cannot write metric {}: {}", name, e)))?;
        *guard = Some(stream);
        Ok(())
    }
}
