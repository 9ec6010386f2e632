//! Process supervisor.
//!
//! Owns the shared pipeline, runs the startup scan, keeps the change watcher
//! alive and reacts to signals until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use certsync_config::SyncConfig;

use crate::errors::{SyncError, SyncResult};
use crate::pipeline::Pipeline;
use crate::scan::{scan_once, ScanReport};
use crate::signals::{SignalManager, SignalType};
use crate::watch::ChangeWatcher;

pub struct Supervisor {
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(config: SyncConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(Arc::new(config))?),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Token that stops the watcher when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Scan the watch directory on the blocking pool.
    ///
    /// An unreadable directory is logged and reported as an empty scan.
    pub async fn rescan(&self) -> ScanReport {
        let pipeline = Arc::clone(&self.pipeline);
        let result = tokio::task::spawn_blocking(move || scan_once(&pipeline))
            .await
            .unwrap_or_else(|e| Err(SyncError::Task(e.to_string())));

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Error scanning certificate directory");
                ScanReport::default()
            }
        };

        info!(
            documents = report.documents,
            synced = report.synced,
            not_found = report.not_found,
            failed = report.failed,
            "Certificate scan complete"
        );
        if !report.any_synced() {
            info!(
                domain = %self.pipeline.config().domain,
                "No valid certificates found for our domain. Will wait for changes"
            );
        }
        report
    }

    /// Startup scan, then watch until a shutdown signal arrives.
    pub async fn run(self, mut signals: SignalManager) -> SyncResult<()> {
        let config = self.pipeline.config();
        info!(
            domain = %config.domain,
            watch_dir = %config.watch_dir.display(),
            output_dir = %config.output_dir.display(),
            live_config = %config.live_config.display(),
            "Starting certificate sync"
        );

        self.rescan().await;

        let watcher = ChangeWatcher::new(Arc::clone(&self.pipeline), self.shutdown.clone());
        let mut watcher_task = tokio::spawn(watcher.run());

        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(SignalType::Rescan) => {
                        self.rescan().await;
                    }
                    Some(SignalType::Shutdown) | None => break,
                },
                // Only returns early if something else cancelled the token
                result = &mut watcher_task => {
                    return flatten(result);
                }
            }
        }

        info!("Shutting down, waiting for in-flight certificate updates");
        self.shutdown.cancel();
        let result = flatten(watcher_task.await);
        info!("Certificate sync stopped");
        result
    }
}

fn flatten(result: Result<SyncResult<()>, tokio::task::JoinError>) -> SyncResult<()> {
    match result {
        Ok(inner) => inner,
        Err(e) => {
            warn!(error = %e, "Watcher task failed");
            Err(SyncError::Task(e.to_string()))
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("pipeline", &self.pipeline)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}
