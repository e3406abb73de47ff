//! Per-project poll outcomes

use crate::error::FetchError;
use crate::types::usage_record::UsageRecord;

/// Why a project could not be measured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub project_id: String,
    pub cause: FetchError,
    /// Requests actually issued, 0 when the project was never dispatched
    pub attempts: u32,
}

/// Result of polling one project; exactly one is produced per submitted project
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Success(UsageRecord),
    Failure(FetchFailure),
}

impl PollOutcome {
    pub fn failure(project_id: impl Into<String>, cause: FetchError, attempts: u32) -> Self {
        PollOutcome::Failure(FetchFailure {
            project_id: project_id.into(),
            cause,
            attempts,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }

    pub fn project_id(&self) -> &str {
        match self {
            PollOutcome::Success(record) => &record.project_id,
            PollOutcome::Failure(failure) => &failure.project_id,
        }
    }
}
