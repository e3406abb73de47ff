//! Data model shared by the collector and the service binary

pub mod outcome;
pub mod project;
pub mod region_report;
pub mod run_config;
pub mod usage_record;
