//! Stage deadlines
//!
//! A run gets one overall timeout, split between the pipeline stages by fixed integer
//! weights. The denominator carries one extra share so the stages never consume the
//! whole budget.

use std::time::Duration;

/// Share of the run budget given to polling Swift
pub const POLL_WEIGHT: u32 = 10;
/// Share of the run budget given to publishing to RabbitMQ
pub const PUBLISH_WEIGHT: u32 = 3;
/// Share of the run budget given to reporting
pub const REPORT_WEIGHT: u32 = 1;
/// Unallocated share kept as a safety margin
pub const MARGIN_WEIGHT: u32 = 1;

/// Split `total` proportionally to `weights`, with one spare share in the denominator.
///
/// Every allocation is rounded down, so the sum never exceeds `total`.
pub fn allocate(total: Duration, weights: &[u32]) -> Vec<Duration> {
    let denominator: u128 = weights.iter().map(|w| *w as u128).sum::<u128>() + MARGIN_WEIGHT as u128;
    let total_nanos = total.as_nanos();

    weights
        .iter()
        .map(|w| {
            let nanos = total_nanos * *w as u128 / denominator;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        })
        .collect()
}

/// Per-stage timeouts of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBudget {
    pub poll: Duration,
    pub publish: Duration,
    pub report: Duration,
}

impl StageBudget {
    /// Split a run timeout with the default stage weights
    pub fn split(total: Duration) -> Self {
        let shares = allocate(total, &[POLL_WEIGHT, PUBLISH_WEIGHT, REPORT_WEIGHT]);
        Self {
            poll: shares[0],
            publish: shares[1],
            report: shares[2],
        }
    }
}
