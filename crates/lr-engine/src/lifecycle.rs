//! Routing Lifecycle - Background sweeps for the assignment engine
//!
//! Handles:
//! - Offer expiry (matched leads past their response deadline)
//! - Re-matching of leads held in submitted
//! - Periodic routing stats reporting
//! - Graceful shutdown coordination
//!
//! Timeouts are scheduled re-evaluation, not blocking waits: the sweeps
//! apply the same transition functions the explicit accept/decline calls
//! use, so a response racing a sweep resolves inside the lead's own
//! exclusive section.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::assignment::AssignmentEngine;

/// Configuration for the routing lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval for the offer expiry sweep
    pub expiry_sweep_interval: Duration,
    /// Interval for the re-match sweep over held leads
    pub rematch_interval: Duration,
    /// Interval for routing stats reports
    pub stats_report_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_interval: Duration::from_secs(60),
            rematch_interval: Duration::from_secs(120),
            stats_report_interval: Duration::from_secs(300),
        }
    }
}

/// Owns the background sweep tasks.
pub struct RoutingLifecycle {
    shutdown_tx: broadcast::Sender<()>,
}

impl RoutingLifecycle {
    /// Start all lifecycle tasks.
    pub fn start(engine: Arc<AssignmentEngine>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        // Offer expiry sweep
        {
            let engine = engine.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.expiry_sweep_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!("Running offer expiry sweep");
                            if let Err(e) = engine.expire_overdue().await {
                                error!(error = %e, "Offer expiry sweep failed");
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Offer expiry sweep shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Re-match sweep
        {
            let engine = engine.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.rematch_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match engine.rematch_submitted().await {
                                Ok(matched) if matched > 0 => {
                                    info!(matched = matched, "Re-match sweep placed held leads");
                                }
                                Ok(_) => debug!("Re-match sweep found nothing to place"),
                                Err(e) => error!(error = %e, "Re-match sweep failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Re-match sweep shutting down");
                            break;
                        }
                    }
                }
            });
        }

        // Routing stats reporter
        {
            let engine = engine.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.stats_report_interval;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match engine.stats().await {
                                Ok(stats) => info!(
                                    submitted = stats.leads_submitted,
                                    matched = stats.leads_matched,
                                    accepted = stats.leads_accepted,
                                    unmatched = stats.leads_unmatched,
                                    slots_in_use = stats.slots_in_use,
                                    slots_total = stats.slots_total,
                                    "Routing stats"
                                ),
                                Err(e) => error!(error = %e, "Stats snapshot failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Stats reporter shutting down");
                            break;
                        }
                    }
                }
            });
        }

        info!("Routing lifecycle started with all background sweeps");

        Self { shutdown_tx }
    }

    /// Signal shutdown to all lifecycle tasks.
    pub fn shutdown(&self) {
        info!("Routing lifecycle shutting down...");
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(60));
        assert_eq!(config.rematch_interval, Duration::from_secs(120));
    }
}
