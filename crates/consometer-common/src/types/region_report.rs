//! Per-region run report

use std::time::Duration;

use serde::Serialize;

use crate::TOTAL_CONSO_MIN_RATIO;

/// Aggregate of one region run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegionReport {
    pub region: String,
    /// Projects submitted to the poll pool
    pub projects: usize,
    /// Outcomes received, successful or not
    pub polled: usize,
    pub polled_successfully: usize,
    /// Records acknowledged by the broker
    pub published: usize,
    /// Summed bytes over successful, numeric samples
    pub total_conso: i64,
    pub run_duration: Duration,
}

impl RegionReport {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            ..Default::default()
        }
    }

    /// Share of submitted projects that were measured; 0 when nothing was submitted
    pub fn success_ratio(&self) -> f64 {
        if self.projects == 0 {
            return 0.0;
        }
        self.polled_successfully as f64 / self.projects as f64
    }

    /// Add one sample to `total_conso`, saturating instead of overflowing.
    ///
    /// Returns `false` when the total could not hold the sum.
    pub fn add_volume(&mut self, volume: i64) -> bool {
        match self.total_conso.checked_add(volume) {
            Some(total) => {
                self.total_conso = total;
                true
            }
            None => {
                self.total_conso = self.total_conso.saturating_add(volume);
                false
            }
        }
    }

    /// Whether the sample is complete enough for `total_conso` to mean anything
    pub fn total_is_reportable(&self) -> bool {
        self.success_ratio() > TOTAL_CONSO_MIN_RATIO
    }

    /// Named counters for the monitoring backend, `totalconso` only when reportable
    pub fn counters(&self) -> Vec<(&'static str, i64)> {
        let mut counters = vec![
            ("published", self.published as i64),
            ("polledsuccessfully", self.polled_successfully as i64),
            ("polled", self.polled as i64),
            ("projects", self.projects as i64),
            ("runduration", self.run_duration.as_secs() as i64),
        ];
        if self.total_is_reportable() {
            counters.push(("totalconso", self.total_conso));
        }
        counters
    }
}
