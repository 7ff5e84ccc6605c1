use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use kameo::actor::ActorRef;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::health_monitor::{GetSystemHealth, HealthMonitorActor, HealthReporter};
use crate::actors::core::HealthStatus;

// ============================================================================
// Coordinator - Orchestrates all long-running loops
// ============================================================================
//
// Responsibilities:
// - Owns the process-wide cancellation token
// - Spawns the relay and consumer loops, restarting consumers that fail
// - Periodically logs aggregated system health
// - Coordinates graceful shutdown
//
// Hierarchy:
//   Coordinator
//   ├── HealthMonitorActor
//   ├── OutboxRelay
//   ├── Consumer(labor-cost-queue)
//   └── Consumer(email-queue)
//
// ============================================================================

pub struct Coordinator {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
    monitor: ActorRef<HealthMonitorActor>,
    restart_delay: Duration,
}

impl Coordinator {
    pub fn new(monitor: ActorRef<HealthMonitorActor>) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
            monitor,
            restart_delay: Duration::from_secs(5),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn health_reporter(&self) -> HealthReporter {
        HealthReporter::new(self.monitor.clone())
    }

    pub fn monitor(&self) -> &ActorRef<HealthMonitorActor> {
        &self.monitor
    }

    /// Spawn a loop that runs until the shutdown token is cancelled
    pub fn spawn<F, Fut>(&mut self, run: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(run(self.shutdown.clone()));
    }

    /// Spawn a component that is restarted after `restart_delay` whenever it
    /// returns before shutdown.
    pub fn spawn_supervised<F, Fut, E>(&mut self, component: impl Into<String>, mut run: F)
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let component = component.into();
        let shutdown = self.shutdown.clone();
        let health = self.health_reporter();
        let restart_delay = self.restart_delay;

        self.tasks.spawn(async move {
            loop {
                health.report(&component, HealthStatus::Healthy, None).await;

                let outcome = run(shutdown.clone()).await;
                if shutdown.is_cancelled() {
                    break;
                }

                let reason = match outcome {
                    Ok(()) => "stopped unexpectedly".to_string(),
                    Err(e) => e.to_string(),
                };
                tracing::error!(
                    component = %component,
                    error = %reason,
                    restart_in_ms = restart_delay.as_millis() as u64,
                    "Component failed, restarting"
                );
                health
                    .report(&component, HealthStatus::Unhealthy(reason), None)
                    .await;

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }

            tracing::info!(component = %component, "Supervised component finished");
        });
    }

    /// Log aggregated health every `period`
    pub fn spawn_health_logger(&mut self, period: Duration) {
        let monitor = self.monitor.clone();
        let shutdown = self.shutdown.clone();

        self.tasks.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                match monitor.ask(GetSystemHealth).send().await {
                    Ok(health) => match health.overall_status {
                        HealthStatus::Healthy => {
                            tracing::debug!("System health check: Healthy");
                        }
                        HealthStatus::Degraded(ref msg) => {
                            tracing::warn!("System health check: Degraded - {}", msg);
                        }
                        HealthStatus::Unhealthy(ref msg) => {
                            tracing::error!("System health check: Unhealthy - {}", msg);
                        }
                    },
                    Err(e) => {
                        tracing::error!("Failed to get system health: {}", e);
                    }
                }
            }
        });
    }

    /// Cancel every loop and wait up to `grace` for them to finish
    pub async fn shutdown(mut self, grace: Duration) {
        tracing::info!("🛑 Coordinator shutting down");
        self.shutdown.cancel();

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "Grace period elapsed, aborting tasks");
            self.tasks.abort_all();
        }

        if let Err(e) = self.monitor.stop_gracefully().await {
            tracing::warn!(error = %e, "Failed to stop health monitor");
        }

        tracing::info!("🛑 Coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn coordinator() -> Coordinator {
        let monitor = HealthMonitorActor::new(Vec::new(), Duration::from_secs(3600)).start();
        Coordinator::new(monitor).with_restart_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_supervised_component_is_restarted() {
        let mut coordinator = coordinator();
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        coordinator.spawn_supervised("consumer:test", move |shutdown: CancellationToken| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err("connection refused");
                }
                shutdown.cancelled().await;
                Ok(())
            }
        });

        for _ in 0..200 {
            if runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let health = coordinator.monitor().ask(GetSystemHealth).send().await.unwrap();
        assert!(health.overall_status.is_healthy());

        coordinator.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_loops() {
        let mut coordinator = coordinator();
        let stopped = Arc::new(AtomicU32::new(0));

        let flag = stopped.clone();
        coordinator.spawn(move |shutdown| async move {
            shutdown.cancelled().await;
            flag.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.shutdown(Duration::from_secs(1)).await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
