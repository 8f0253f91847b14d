//! Daemon lifecycle: open the service, run reconciliation, close.

use identity_tracker::TrackingService;
use std::future::Future;
use std::sync::Arc;

use crate::error::DaemonError;
use crate::settings::Overrides;

/// Running identity-tracker service plus its shutdown sequence.
pub struct Daemon {
    service: Arc<TrackingService>,
}

impl Daemon {
    /// Open the local backends named by the resolved configuration.
    pub fn open(overrides: &Overrides) -> Result<Self, DaemonError> {
        let config = overrides.load_config()?;
        let secrets = overrides.secrets(&config);

        tracing::info!(
            "Opening tracking service (sync every {}s, cleanup every {}s, labels {:?})",
            config.sync_interval_secs,
            config.cleanup_interval_secs,
            config.graph_labels
        );
        let service = TrackingService::open_local(config, &secrets).map_err(|e| {
            tracing::error!("Failed to open tracking service: {}", e);
            e
        })?;

        Ok(Self::from_service(service))
    }

    pub fn from_service(service: TrackingService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn service(&self) -> &Arc<TrackingService> {
        &self.service
    }

    /// Run one sync cycle and one cleanup, then close.
    pub async fn run_once(self) -> Result<(), DaemonError> {
        let service = Arc::clone(&self.service);
        let outcome = tokio::task::spawn_blocking(move || service.run_once()).await;

        match outcome {
            Ok(Ok((cycle, cleanup))) => {
                tracing::info!(
                    "Cycle report: {}",
                    serde_json::to_string(&cycle).unwrap_or_default()
                );
                tracing::info!(
                    "Cleanup report: {}",
                    serde_json::to_string(&cleanup).unwrap_or_default()
                );
                if let Some(e) = cycle.failure() {
                    tracing::warn!("{}", e);
                }
            }
            Ok(Err(e)) => {
                self.service.close().await?;
                return Err(e.into());
            }
            Err(e) => tracing::error!("Reconciliation task failed: {}", e),
        }

        self.service.close().await?;
        Ok(())
    }

    /// Run background reconciliation until `shutdown` resolves, then close.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        if let Err(e) = self.service.start_background() {
            tracing::error!("Failed to start reconciliation: {}", e);
            self.service.close().await?;
            return Err(e.into());
        }
        tracing::info!("Identity daemon running");

        let signal = shutdown.await;
        match &signal {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!("Failed to wait for shutdown signal: {}", e),
        }

        self.service.close().await?;
        signal?;
        Ok(())
    }
}
