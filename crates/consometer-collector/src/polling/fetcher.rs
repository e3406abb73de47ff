//! Per-project fetch with bounded retry

use std::sync::Arc;

use async_trait::async_trait;
use consometer_common::{FetchError, PollOutcome, Project, RetrySettings, UsageRecord};
use tracing::{debug, error};

/// Source of a project's account usage
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Bytes used by the project's account, as reported by the storage API
    async fn bytes_used(&self, project: &Project) -> Result<String, FetchError>;
}

/// Turns one project into one [`PollOutcome`], retrying transient failures
pub struct Fetcher {
    probe: Arc<dyn UsageProbe>,
    region: String,
    retry: RetrySettings,
}

impl Fetcher {
    pub fn new(probe: Arc<dyn UsageProbe>, region: impl Into<String>, retry: RetrySettings) -> Self {
        Self {
            probe,
            region: region.into(),
            retry,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Poll `project`. Never fails: errors become [`PollOutcome::Failure`].
    pub async fn fetch(&self, project: &Project) -> PollOutcome {
        let max_attempts = self.retry.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.probe.bytes_used(project).await {
                Ok(volume) => {
                    debug!(project_id = %project.id, attempt, "Fetched account");
                    return PollOutcome::Success(UsageRecord::new(&project.id, &self.region, volume));
                }
                Err(err) if attempt < max_attempts => {
                    debug!(project_id = %project.id, attempt, error = %err, "Retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(err) => {
                    error!(project_id = %project.id, attempts = attempt, error = %err, "Failed fetching account");
                    return PollOutcome::failure(project.id.clone(), err, attempt);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProbe;
    use std::time::Duration;

    fn retry() -> RetrySettings {
        RetrySettings {
            attempts: 2,
            backoff: Duration::from_millis(200),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let probe = Arc::new(ScriptedProbe::healthy().with_volume("2048"));
        let fetcher = Fetcher::new(probe.clone(), "int5", retry());

        match fetcher.fetch(&Project::new("p1")).await {
            PollOutcome::Success(record) => {
                assert_eq!(record.project_id, "p1");
                assert_eq!(record.region, "int5");
                assert_eq!(record.counter_volume, "2048");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(probe.calls("p1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failure_is_retried() {
        let probe = Arc::new(ScriptedProbe::failing_first(&["p1"], 1));
        let fetcher = Fetcher::new(probe.clone(), "int5", retry());

        let started = tokio::time::Instant::now();
        assert!(fetcher.fetch(&Project::new("p1")).await.is_success());
        assert_eq!(probe.calls("p1"), 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_after_two_attempts() {
        let probe = Arc::new(ScriptedProbe::always_failing(&["p1"]));
        let fetcher = Fetcher::new(probe.clone(), "int5", retry());

        match fetcher.fetch(&Project::new("p1")).await {
            PollOutcome::Failure(failure) => {
                assert_eq!(failure.project_id, "p1");
                assert_eq!(failure.attempts, 2);
                assert_eq!(failure.cause, FetchError::UnexpectedStatus(503));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(probe.calls("p1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let probe = Arc::new(ScriptedProbe::always_failing(&["p1"]));
        let settings = RetrySettings {
            attempts: 0,
            backoff: Duration::ZERO,
        };
        let fetcher = Fetcher::new(probe.clone(), "int5", settings);

        assert!(!fetcher.fetch(&Project::new("p1")).await.is_success());
        assert_eq!(probe.calls("p1"), 1);
    }
}
