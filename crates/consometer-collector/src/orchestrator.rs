//! Run orchestrator
//!
//! One call to [`Orchestrator::run_once`] is one scheduled run: authenticate, list the
//! tenant projects, then drive every configured region through
//!
//! ```text
//! Idle -> ResolvingEndpoint -> Polling -> Reducing -> Publishing -> Reporting -> Done
//! ```
//!
//! concurrently. A collaborator error moves a region to `Failed(stage)`; other regions
//! keep going. Authentication and project listing are shared by all regions, so their
//! failure aborts the whole run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use consometer_common::{ConsometerError, Project, RegionReport, Result, RunConfig};
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::deadline::StageBudget;
use crate::identity::{IdentityResolver, Session};
use crate::metrics::{publish_report, MetricsSink};
use crate::polling::{
    fetcher::{Fetcher, UsageProbe},
    pool::PollPool,
    swift::SwiftProbe,
};
use crate::publisher::{Broker, Publisher, Topology};
use crate::reducer::RegionReducer;
use crate::{ADMIN_INTERFACE, OBJECT_STORE_SERVICE};

/// Pipeline stage a run can fail in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Authenticating,
    ListingProjects,
    ResolvingEndpoint,
    Polling,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Authenticating => "authenticating",
            Stage::ListingProjects => "listing_projects",
            Stage::ResolvingEndpoint => "resolving_endpoint",
            Stage::Polling => "polling",
            Stage::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// State of one region run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    ResolvingEndpoint,
    Polling,
    Reducing,
    Publishing,
    Reporting,
    Done,
    Failed(Stage),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }
}

/// Terminal state and report of one region
#[derive(Debug, Clone, Serialize)]
pub struct RegionOutcome {
    pub region: String,
    pub state: RunState,
    /// Present once the region got past reduction
    pub report: Option<RegionReport>,
    pub error: Option<String>,
}

impl RegionOutcome {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            state: RunState::Idle,
            report: None,
            error: None,
        }
    }

    fn enter(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Region state change");
        self.state = next;
    }

    fn fail(mut self, stage: Stage, err: ConsometerError) -> Self {
        error!(%stage, "Region run failed: {}", err);
        self.enter(RunState::Failed(stage));
        self.error = Some(err.to_string());
        self
    }
}

/// Failure shared by every region of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub message: String,
}

/// What a run did, region by region
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub regions: Vec<RegionOutcome>,
    /// Set when the run stopped before any region started
    pub failure: Option<RunFailure>,
    pub duration: Duration,
}

impl RunSummary {
    fn aborted(stage: Stage, err: ConsometerError, started: Instant) -> Self {
        error!(%stage, "Run aborted: {}", err);
        Self {
            regions: Vec::new(),
            failure: Some(RunFailure {
                stage,
                message: err.to_string(),
            }),
            duration: started.elapsed(),
        }
    }

    /// Every region reached `Done`
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.regions.iter().all(|r| r.state == RunState::Done)
    }

    pub fn reports(&self) -> impl Iterator<Item = &RegionReport> {
        self.regions.iter().filter_map(|r| r.report.as_ref())
    }

    pub fn region(&self, name: &str) -> Option<&RegionOutcome> {
        self.regions.iter().find(|r| r.region == name)
    }
}

/// Builds the usage probe of a region once its endpoint is known
pub trait ProbeFactory: Send + Sync {
    fn probe(&self, session: &Session, endpoint: &str, budget: Duration) -> Result<Arc<dyn UsageProbe>>;
}

/// Probes Swift accounts over HTTP, each request bounded by the poll budget
#[derive(Debug, Default, Clone, Copy)]
pub struct SwiftProbeFactory;

impl ProbeFactory for SwiftProbeFactory {
    fn probe(&self, session: &Session, endpoint: &str, budget: Duration) -> Result<Arc<dyn UsageProbe>> {
        let client = Client::builder()
            .timeout(budget)
            .build()
            .map_err(|e| ConsometerError::Network(format!("cannot build HTTP client: {}", e)))?;
        Ok(Arc::new(SwiftProbe::new(client, endpoint, session.token.clone())))
    }
}

/// Drives scheduled runs over all configured regions
pub struct Orchestrator {
    config: Arc<RunConfig>,
    identity: Arc<dyn IdentityResolver>,
    probes: Arc<dyn ProbeFactory>,
    publisher: Publisher,
    metrics: Arc<dyn MetricsSink>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<RunConfig>,
        identity: Arc<dyn IdentityResolver>,
        probes: Arc<dyn ProbeFactory>,
        broker: Arc<dyn Broker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let publisher = Publisher::new(broker, Topology::from(&config.rabbit));
        Self {
            config,
            identity,
            probes,
            publisher,
            metrics,
        }
    }

    /// Perform one run with a fresh budget of `config.timeout`
    #[instrument(skip(self), fields(regions = self.config.regions.len()))]
    pub async fn run_once(&self) -> RunSummary {
        let started = Instant::now();
        let budget = StageBudget::split(self.config.timeout);
        debug!(?budget, "Stage budgets allocated");

        let session = match self.identity.authenticate().await {
            Ok(session) => session,
            Err(e) => return RunSummary::aborted(Stage::Authenticating, e, started),
        };

        let projects = match self.identity.list_projects(&session).await {
            Ok(projects) => projects,
            Err(e) => return RunSummary::aborted(Stage::ListingProjects, e, started),
        };
        info!("{} projects retrieved", projects.len());

        let runs = self.config.regions.iter().map(|region| {
            let span = info_span!("region", region = %region);
            self.run_region(region, &session, &projects, budget, started)
                .instrument(span)
        });
        let regions = join_all(runs).await;

        let summary = RunSummary {
            regions,
            failure: None,
            duration: started.elapsed(),
        };
        info!(
            success = summary.is_success(),
            duration_ms = summary.duration.as_millis() as u64,
            "Run completed"
        );
        summary
    }

    async fn run_region(
        &self,
        region: &str,
        session: &Session,
        projects: &[Project],
        budget: StageBudget,
        started: Instant,
    ) -> RegionOutcome {
        let mut outcome = RegionOutcome::new(region);

        outcome.enter(RunState::ResolvingEndpoint);
        let endpoint = match self
            .identity
            .resolve_endpoint(session, OBJECT_STORE_SERVICE, region, ADMIN_INTERFACE)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => return outcome.fail(Stage::ResolvingEndpoint, e),
        };

        outcome.enter(RunState::Polling);
        let probe = match self.probes.probe(session, &endpoint, budget.poll) {
            Ok(probe) => probe,
            Err(e) => return outcome.fail(Stage::Polling, e),
        };
        let fetcher = Fetcher::new(probe, region, self.config.retry);
        let outcomes = PollPool::new(fetcher, self.config.workers).spawn(projects.to_vec(), budget.poll);

        outcome.enter(RunState::Reducing);
        let mut reduction = RegionReducer::new(region, self.config.chunk_size)
            .reduce(outcomes)
            .await;
        let mut report = std::mem::take(&mut reduction.report);
        report.projects = projects.len();

        let mut publish_error = None;
        if reduction.nothing_to_publish() {
            warn!("No account polled successfully, nothing to publish");
        } else {
            outcome.enter(RunState::Publishing);
            match self.publisher.publish(reduction.batches, budget.publish).await {
                Ok(published) => {
                    report.published = published;
                    info!(
                        "published {} accounts out of {} polled successfully",
                        published, report.polled_successfully
                    );
                }
                Err(e) => publish_error = Some(e),
            }
        }

        outcome.enter(RunState::Reporting);
        report.run_duration = started.elapsed();
        let sent = tokio::time::timeout(budget.report, publish_report(&report, self.metrics.as_ref())).await;
        match sent {
            Ok(count) => debug!(metrics = count, "Region report sent"),
            Err(_) => warn!("Reporting deadline reached, region report partially sent"),
        }
        info!(
            "Run completed in {:?}. Successfully polled {} out of {} accounts. Published {}",
            report.run_duration, report.polled_successfully, report.projects, report.published
        );
        outcome.report = Some(report);

        match publish_error {
            Some(e) => outcome.fail(Stage::Publishing, e),
            None => {
                outcome.enter(RunState::Done);
                outcome
            }
        }
    }
}
