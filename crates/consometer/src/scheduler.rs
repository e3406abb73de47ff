//! Periodic run scheduling
//!
//! A run is started immediately and then once per period. Runs are independent tasks
//! and may overlap when one outlives its period.

use std::future::Future;
use std::time::Duration;

use consometer_collector::RunSummary;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Start `run` every `period` until `shutdown` resolves; returns the number of runs started.
///
/// Runs still in flight at shutdown are aborted.
pub async fn schedule<F, Fut>(period: Duration, shutdown: impl Future<Output = ()>, run: F) -> usize
where
    F: Fn() -> Fut,
    Fut: Future<Output = RunSummary> + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut runs = JoinSet::new();
    let mut started = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                started += 1;
                debug!(run = started, "Starting scheduled run");
                runs.spawn(run());
            }
            Some(finished) = runs.join_next(), if !runs.is_empty() => match finished {
                Ok(summary) if !summary.is_success() => warn!("Run finished with failures"),
                Ok(_) => {}
                Err(e) if e.is_panic() => error!("Run panicked: {}", e),
                Err(_) => {}
            },
        }
    }

    if !runs.is_empty() {
        warn!(in_flight = runs.len(), "Abandoning in-flight runs");
    }
    runs.shutdown().await;
    started
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
