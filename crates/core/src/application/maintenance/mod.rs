// Maintenance Service: periodic retention sweep across every kind

use crate::application::registry::JobRegistry;
use crate::application::worker::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Maintenance scheduler
///
/// Prunes terminal jobs past retention and logs per-kind counts
pub struct MaintenanceScheduler {
    registry: Arc<JobRegistry>,
    period: Duration,
}

impl MaintenanceScheduler {
    pub fn new(registry: Arc<JobRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Run maintenance loop until shutdown (spawn with tokio::spawn)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(period_secs = self.period.as_secs(), "Maintenance scheduler started");

        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; startup already loaded a pruned set
        tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = tick.tick() => {
                    self.run_now().await;
                }
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Run one sweep immediately; returns the number of jobs pruned
    pub async fn run_now(&self) -> usize {
        let pruned = self.registry.prune_all().await;
        for stats in self.registry.stats().await {
            info!(
                kind = ?stats.kind,
                total = stats.total,
                queue_depth = stats.queue_depth,
                running = ?stats.current_job_id,
                "Job store status"
            );
        }
        info!(pruned = pruned, "Maintenance completed");
        pruned
    }
}
