//! Region reducer
//!
//! Drains the poll pool's outcome stream, tallies the region report and cuts the
//! successful records into fixed-size batches, in the order they were received.

use std::collections::BTreeMap;

use consometer_common::{FetchFailure, PollOutcome, RegionReport, UsageRecord};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Result of reducing one region's outcome stream
#[derive(Debug, Default)]
pub struct Reduction {
    pub report: RegionReport,
    /// Records to publish, one broker message per batch
    pub batches: Vec<Vec<UsageRecord>>,
    /// Failed projects in arrival order
    pub failures: Vec<FetchFailure>,
}

impl Reduction {
    /// No successful record, the publish stage is skipped
    pub fn nothing_to_publish(&self) -> bool {
        self.batches.is_empty()
    }

    /// Number of records across all batches
    pub fn record_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Failure counts grouped by cause
    pub fn failure_summary(&self) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for failure in &self.failures {
            *summary.entry(failure.cause.kind()).or_insert(0) += 1;
        }
        summary
    }
}

/// Tallies and chunks the outcomes of one region
pub struct RegionReducer {
    region: String,
    chunk_size: usize,
}

impl RegionReducer {
    pub fn new(region: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            region: region.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    /// Consume `outcomes` until the pool closes it
    pub async fn reduce(&self, mut outcomes: mpsc::Receiver<PollOutcome>) -> Reduction {
        let mut report = RegionReport::new(self.region.clone());
        let mut records = Vec::new();
        let mut failures = Vec::new();
        let mut saturated = false;

        while let Some(outcome) = outcomes.recv().await {
            report.polled += 1;
            match outcome {
                PollOutcome::Success(record) => {
                    report.polled_successfully += 1;
                    // Non-numeric volumes are published but left out of the total
                    if let Some(volume) = record.volume() {
                        if !report.add_volume(volume) && !saturated {
                            saturated = true;
                            warn!(
                                project_id = %record.project_id,
                                volume,
                                "Total consumption overflows, clamped"
                            );
                        }
                    }
                    records.push(record);
                }
                PollOutcome::Failure(failure) => failures.push(failure),
            }
        }

        info!(
            "Polled {} accounts successfully out of {}",
            report.polled_successfully, report.polled
        );

        let reduction = Reduction {
            report,
            batches: chunk(records, self.chunk_size),
            failures,
        };
        for (cause, count) in reduction.failure_summary() {
            error!(cause, count, "Accounts failed to poll");
        }
        reduction
    }
}

/// Split `records` into consecutive batches of `size`, the last one holding the remainder
pub fn chunk(records: Vec<UsageRecord>, size: usize) -> Vec<Vec<UsageRecord>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(size));
    let mut records = records.into_iter();
    loop {
        let batch: Vec<UsageRecord> = records.by_ref().take(size).collect();
        if batch.is_empty() {
            break;
        }
        batches.push(batch);
    }
    batches
}
