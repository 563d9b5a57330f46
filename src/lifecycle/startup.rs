//! Background task orchestration.
//!
//! # Responsibilities
//! - Start the config watcher and apply reloaded configs to the registry
//! - Start the orphan sweeper
//! - Hand back one handle set that is joined at shutdown

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::schema::{RouterConfig, SweepConfig};
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::{OrphanSweeper, Shutdown};
use crate::registry::ModelServiceRegistry;

/// Running background tasks. Dropping this stops the file watcher.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl BackgroundTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task to exit (after [`Shutdown::trigger`]).
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background task panicked");
            }
        }
    }
}

/// Spawn the reload task (when `config_path` is given) and the orphan sweeper.
pub fn spawn_background(
    registry: Arc<ModelServiceRegistry>,
    config_path: Option<&Path>,
    sweep: &SweepConfig,
    shutdown: &Shutdown,
) -> Result<BackgroundTasks, notify::Error> {
    let mut handles = Vec::new();
    let mut watcher = None;

    if let Some(path) = config_path {
        let (config_watcher, updates) = ConfigWatcher::new(path);
        watcher = Some(config_watcher.run()?);
        handles.push(tokio::spawn(apply_updates(
            registry.clone(),
            updates,
            shutdown.subscribe(),
        )));
    }

    if sweep.enabled {
        let sweeper = OrphanSweeper::new(registry, Duration::from_secs(sweep.interval_secs));
        handles.push(tokio::spawn(sweeper.run(shutdown.subscribe())));
    } else {
        tracing::info!("Orphan sweep disabled");
    }

    Ok(BackgroundTasks {
        handles,
        _watcher: watcher,
    })
}

/// Apply each validated config to the registry until shutdown or the channel closes.
pub async fn apply_updates(
    registry: Arc<ModelServiceRegistry>,
    mut updates: mpsc::UnboundedReceiver<RouterConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => registry.apply_config(&config),
                None => break,
            },
            _ = shutdown.recv() => {
                tracing::info!("Config reload task received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
