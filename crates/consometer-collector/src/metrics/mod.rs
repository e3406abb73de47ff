//! Monitoring backend
//!
//! Run counters are pushed per region as `<region>.<counter>`. Delivery problems are
//! logged and never fail a run.

pub mod graphite;

use async_trait::async_trait;
use consometer_common::{RegionReport, Result};
use tracing::{debug, warn};

/// Destination of named integer metrics
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn send(&self, name: &str, value: i64) -> Result<()>;
}

/// Sink dropping every metric, used when the backend is unreachable
#[derive(Debug, Default, Clone, Copy)]
pub struct NopSink;

#[async_trait]
impl MetricsSink for NopSink {
    async fn send(&self, name: &str, value: i64) -> Result<()> {
        debug!(name, value, "Metric dropped");
        Ok(())
    }
}

/// Push the counters of `report` to `sink` and return how many were accepted.
///
/// `totalconso` is only sent when the sample is complete enough, see
/// [`RegionReport::total_is_reportable`].
pub async fn publish_report(report: &RegionReport, sink: &dyn MetricsSink) -> usize {
    let mut sent = 0;
    for (counter, value) in report.counters() {
        let name = format!("{}.{}", report.region, counter);
        match sink.send(&name, value).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(metric = %name, "Failed sending metric: {}", e),
        }
    }
    if !report.total_is_reportable() {
        debug!(
            ratio = report.success_ratio(),
            "Sample incomplete, total consumption not reported"
        );
    }
    sent
}
