//! Bounded-concurrency poll pool
//!
//! A single feeder pushes projects into a bounded work queue that a fixed set of
//! workers receive from directly. Once the poll deadline has passed the feeder stops
//! and reports every project it did not hand out as a deadline failure; workers
//! finish their in-flight fetch but do not start a new one. The outcome stream
//! closes once the feeder and every worker are done, so its consumer always sees one
//! outcome per submitted project.

use std::sync::Arc;
use std::time::Duration;

use consometer_common::{FetchError, PollOutcome, Project};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::fetcher::Fetcher;

/// Fixed-size pool of fetch workers
pub struct PollPool {
    fetcher: Arc<Fetcher>,
    workers: usize,
}

impl PollPool {
    pub fn new(fetcher: Fetcher, workers: usize) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            workers: workers.max(1),
        }
    }

    /// Start polling `projects` and return the outcome stream.
    ///
    /// No new fetch is started once `budget` has elapsed.
    pub fn spawn(&self, projects: Vec<Project>, budget: Duration) -> mpsc::Receiver<PollOutcome> {
        let (outcome_tx, outcome_rx) = mpsc::channel(projects.len().max(1));
        if projects.is_empty() {
            return outcome_rx;
        }

        let deadline = Instant::now() + budget;
        let (work_tx, work_rx) = flume::bounded::<Project>(1);

        let worker_count = self.workers.min(projects.len());
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(poll_worker(
                worker_id,
                self.fetcher.clone(),
                work_rx.clone(),
                outcome_tx.clone(),
                deadline,
            ));
        }
        drop(work_rx);

        tokio::spawn(feed_projects(projects, work_tx, outcome_tx, deadline));

        // Outcome senders live in the workers and the feeder: the stream ends when all
        // of them have returned.
        tokio::spawn(async move {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!("Poll worker aborted: {}", e);
                }
            }
            debug!("All poll workers finished");
        });

        outcome_rx
    }
}

async fn feed_projects(
    projects: Vec<Project>,
    work_tx: flume::Sender<Project>,
    outcome_tx: mpsc::Sender<PollOutcome>,
    deadline: Instant,
) {
    let total = projects.len();
    let mut pending = projects.into_iter();

    // A send blocks at most until a worker frees up; past the deadline that worker
    // turns the project into a deadline failure without fetching it.
    while let Some(project) = pending.next() {
        let (skipped, cause) = if Instant::now() >= deadline {
            (project, FetchError::DeadlineExceeded)
        } else {
            match work_tx.send_async(project).await {
                Ok(()) => continue,
                Err(flume::SendError(project)) => {
                    (project, FetchError::Transport("no poll worker left".to_string()))
                }
            }
        };

        let skipped: Vec<Project> = std::iter::once(skipped).chain(pending).collect();
        warn!(
            skipped = skipped.len(),
            total,
            cause = %cause,
            "Stopped feeding projects"
        );
        for project in skipped {
            let outcome = PollOutcome::failure(project.id, cause.clone(), 0);
            if outcome_tx.send(outcome).await.is_err() {
                break;
            }
        }
        return;
    }
    info!(total, "All projects dispatched");
}

async fn poll_worker(
    worker_id: usize,
    fetcher: Arc<Fetcher>,
    work_rx: flume::Receiver<Project>,
    outcome_tx: mpsc::Sender<PollOutcome>,
    deadline: Instant,
) {
    while let Ok(project) = work_rx.recv_async().await {
        let outcome = if Instant::now() >= deadline {
            PollOutcome::failure(project.id, FetchError::DeadlineExceeded, 0)
        } else {
            fetcher.fetch(&project).await
        };

        if outcome_tx.send(outcome).await.is_err() {
            warn!(worker_id, "Outcome stream closed, worker exiting early");
            break;
        }
    }
    debug!(worker_id, region = fetcher.region(), "Poll worker done");
}
