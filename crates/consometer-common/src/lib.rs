//! # Consometer Common
//!
//! Shared types and errors for the Swift usage consometer.
//!
//! ## Core Types
//!
//! - [`Project`]: a tenant whose object-storage usage is measured
//! - [`UsageRecord`]: one `storage.objects.size` sample, as published on the wire
//! - [`PollOutcome`]: per-project result of a poll attempt
//! - [`RegionReport`]: per-region aggregate handed to the metrics backend
//! - [`RunConfig`]: validated settings for one run

pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ConsometerError, FetchError, Result};
pub use types::{
    outcome::{FetchFailure, PollOutcome},
    project::Project,
    region_report::RegionReport,
    run_config::{GraphiteSettings, OpenstackCredentials, RabbitSettings, RetrySettings, RunConfig},
    usage_record::{sum_volumes, UsageRecord},
};

/// Consometer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Counter name carried by every usage record
pub const COUNTER_NAME: &str = "storage.objects.size";

/// Unit of the measured volume
pub const COUNTER_UNIT: &str = "B";

/// Counter type of the measured volume
pub const COUNTER_TYPE: &str = "gauge";

/// Source tag of every usage record
pub const SOURCE: &str = "openstack";

/// Default number of records per published batch
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Success ratio above which the total volume metric is reported
pub const TOTAL_CONSO_MIN_RATIO: f64 = 0.99;
