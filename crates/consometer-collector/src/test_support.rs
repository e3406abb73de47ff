//! Test doubles shared by the collector's unit tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use consometer_common::{FetchError, Project, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::metrics::MetricsSink;
use crate::polling::fetcher::UsageProbe;

/// Probe answering from a script: each listed project fails a fixed number of times
/// before reporting `volume`.
pub struct ScriptedProbe {
    failures: HashMap<String, u32>,
    calls: Mutex<HashMap<String, u32>>,
    delay: Duration,
    volume: String,
}

impl ScriptedProbe {
    pub fn healthy() -> Self {
        Self {
            failures: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            delay: Duration::ZERO,
            volume: "1024".to_string(),
        }
    }

    pub fn failing_first(ids: &[&str], times: u32) -> Self {
        let mut probe = Self::healthy();
        probe.failures = ids.iter().map(|id| (id.to_string(), times)).collect();
        probe
    }

    pub fn always_failing(ids: &[&str]) -> Self {
        Self::failing_first(ids, u32::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_volume(mut self, volume: &str) -> Self {
        self.volume = volume.to_string();
        self
    }

    pub fn calls(&self, project_id: &str) -> u32 {
        self.calls.lock().get(project_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UsageProbe for ScriptedProbe {
    async fn bytes_used(&self, project: &Project) -> std::result::Result<String, FetchError> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(project.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failures.get(&project.id) {
            Some(times) if call <= *times => Err(FetchError::UnexpectedStatus(503)),
            _ => Ok(self.volume.clone()),
        }
    }
}

/// Projects `p1..=pn`
pub fn projects(n: usize) -> Vec<Project> {
    (1..=n).map(|i| Project::new(format!("p{}", i))).collect()
}

/// Metrics sink keeping every counter it receives
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(String, i64)>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn value(&self, name: &str) -> Option<i64> {
        self.sent
            .lock()
            .iter()
            .find(|(sent, _)| sent == name)
            .map(|(_, value)| *value)
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn send(&self, name: &str, value: i64) -> Result<()> {
        self.sent.lock().push((name.to_string(), value));
        Ok(())
    }
}

/// Serve HTTP/1.1 on a loopback port, answering every request with `handler(raw request)`.
///
/// Returns the bound address and a counter of requests served.
pub async fn spawn_http_server<F>(handler: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let request = loop {
                        if let Some(request) = take_request(&mut buf) {
                            break Some(request);
                        }
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => break None,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    };
                    let Some(request) = request else { return };
                    counter.fetch_add(1, Ordering::SeqCst);
                    let response = handler(&request);
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (addr, hits)
}

/// HTTP client that never goes through an environment proxy
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Build a raw HTTP/1.1 response
pub fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    response
}

fn take_request(buf: &mut Vec<u8>) -> Option<String> {
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let end = head_end + content_length;
    if buf.len() < end {
        return None;
    }
    let request = String::from_utf8_lossy(&buf[..end]).to_string();
    buf.drain(..end);
    Some(request)
}
