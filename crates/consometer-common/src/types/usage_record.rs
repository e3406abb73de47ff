//! Usage records
//!
//! One record is built per successfully polled project and published as part of a
//! batch. The JSON keys are consumed by the downstream billing pipeline and must not
//! change, including the historical `ressource_metadata` spelling.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{COUNTER_NAME, COUNTER_TYPE, COUNTER_UNIT, SOURCE};

/// A `storage.objects.size` sample for one project in one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub counter_name: String,
    pub resource_id: String,
    /// Fresh UUID per record, lets consumers deduplicate redeliveries
    pub message_id: String,
    /// RFC3339, taken at fetch time
    pub timestamp: String,
    /// Bytes used, as reported by the storage API (may be non-numeric)
    pub counter_volume: String,
    pub user_id: Option<String>,
    pub source: String,
    pub counter_unit: String,
    pub project_id: String,
    pub counter_type: String,
    #[serde(rename = "ressource_metadata")]
    pub resource_metadata: Option<String>,
    pub region: String,
}

impl UsageRecord {
    /// Create a record for `project_id` stamped with a new message ID and the current time
    pub fn new(project_id: &str, region: &str, counter_volume: impl Into<String>) -> Self {
        Self {
            counter_name: COUNTER_NAME.to_string(),
            resource_id: project_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            counter_volume: counter_volume.into(),
            user_id: None,
            source: SOURCE.to_string(),
            counter_unit: COUNTER_UNIT.to_string(),
            project_id: project_id.to_string(),
            counter_type: COUNTER_TYPE.to_string(),
            resource_metadata: None,
            region: region.to_string(),
        }
    }

    /// Parsed byte count, `None` when the API returned a non-numeric value
    pub fn volume(&self) -> Option<i64> {
        self.counter_volume.trim().parse().ok()
    }
}

/// Sum of byte counts, saturating at `i64::MAX` / `i64::MIN`
pub fn sum_volumes(volumes: impl IntoIterator<Item = i64>) -> i64 {
    volumes.into_iter().fold(0, i64::saturating_add)
}
