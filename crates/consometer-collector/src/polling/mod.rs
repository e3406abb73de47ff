//! Swift polling
//!
//! - [`fetcher`]: one project, bounded retry, outcome classification
//! - [`pool`]: fixed set of workers draining a project queue under a deadline
//! - [`swift`]: the HTTP probe reading account usage from Swift

pub mod fetcher;
pub mod pool;
pub mod swift;
