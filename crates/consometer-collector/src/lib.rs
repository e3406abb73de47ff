//! # Consometer Collector
//!
//! Measures per-project Swift usage in each configured region and publishes it as
//! billing events on RabbitMQ.
//!
//! ## Pipeline
//!
//! ```text
//!  ┌──────────┐   projects   ┌─────────────┐  outcomes  ┌──────────────┐  batches  ┌───────────┐
//!  │ Identity │─────────────▶│  PollPool   │───────────▶│ RegionReducer│──────────▶│ Publisher │
//!  │(Keystone)│              │ (W fetchers)│            │ (tally+chunk)│           │ (RabbitMQ)│
//!  └──────────┘              └─────────────┘            └──────┬───────┘           └─────┬─────┘
//!                                                              │ RegionReport            │ acks
//!                                                              ▼                         │
//!                                                       ┌─────────────┐◀────────────────┘
//!                                                       │ MetricsSink │
//!                                                       │ (Graphite)  │
//!                                                       └─────────────┘
//! ```
//!
//! Every stage runs under a share of one run timeout, see [`deadline`].

pub mod deadline;
pub mod identity;
pub mod metrics;
pub mod orchestrator;
pub mod polling;
pub mod publisher;
pub mod reducer;

#[cfg(test)]
pub(crate) mod test_support;

pub use deadline::{allocate, StageBudget};
pub use identity::{keystone::KeystoneClient, IdentityResolver, Session};
pub use metrics::{graphite::GraphiteSink, publish_report, MetricsSink, NopSink};
pub use orchestrator::{
    Orchestrator, ProbeFactory, RegionOutcome, RunFailure, RunState, RunSummary, Stage,
    SwiftProbeFactory,
};
pub use polling::{
    fetcher::{Fetcher, UsageProbe},
    pool::PollPool,
    swift::SwiftProbe,
};
pub use publisher::{
    amqp::AmqpBroker, memory::MemoryBroker, Broker, BrokerChannel, Delivery, Publisher, Topology,
};
pub use reducer::{Reduction, RegionReducer};

/// Keystone service type of Swift
pub const OBJECT_STORE_SERVICE: &str = "object-store";

/// Keystone endpoint interface used to reach Swift accounts
pub const ADMIN_INTERFACE: &str = "admin";
