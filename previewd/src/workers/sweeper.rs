//! Periodic inactivity sweep

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::orchestrator::Orchestrator;

/// Sweeper worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,

    /// Initial delay before the first sweep
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            initial_delay: Duration::from_secs(30),
        }
    }
}

/// Run the sweeper worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Sweeper worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Sweeper worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        debug!("Sweeping inactive previews...");
        match orchestrator.sweep_inactive().await {
            Ok(0) => debug!("No inactive previews"),
            Ok(count) => info!("Hibernated {} inactive project(s)", count),
            Err(e) => error!("Inactivity sweep failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Sweeper worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
