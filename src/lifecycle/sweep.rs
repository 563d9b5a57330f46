//! Periodic garbage collection of orphaned instance state.
//!
//! # Responsibilities
//! - Drop breakers, limiters, and balancer counters of removed instances
//! - Publish live state sizes as gauges

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::registry::ModelServiceRegistry;

pub struct OrphanSweeper {
    registry: Arc<ModelServiceRegistry>,
    interval: Duration,
}

impl OrphanSweeper {
    pub fn new(registry: Arc<ModelServiceRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Orphan sweeper starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing can be orphaned yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.registry.sweep_orphans();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Orphan sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ModelInstance, RouterConfig, ServiceConfig};
    use crate::health::AssumeHealthy;
    use crate::lifecycle::Shutdown;
    use crate::registry::ServiceType;

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval_and_stops_on_shutdown() {
        let mut config = RouterConfig::default();
        config.services.insert(
            "chat".into(),
            ServiceConfig {
                instances: vec![ModelInstance::new("m", "http://a", "/v1")],
                ..Default::default()
            },
        );
        let registry = Arc::new(ModelServiceRegistry::new(&config, Arc::new(AssumeHealthy)));
        registry.select_instance(ServiceType::Chat, "m", None).unwrap();
        assert_eq!(registry.breaker_states().len(), 1);

        registry.apply_config(&RouterConfig::default());

        let shutdown = Shutdown::new();
        let task = tokio::spawn(
            OrphanSweeper::new(registry.clone(), Duration::from_secs(10)).run(shutdown.subscribe()),
        );

        time::sleep(Duration::from_secs(11)).await;
        assert!(registry.breaker_states().is_empty());

        shutdown.trigger();
        task.await.unwrap();
    }
}
