//! Change watcher
//!
//! Subscribes to filesystem events in the watch directory and re-runs the
//! pipeline for each changed document.
//!
//! # Per-document lifecycle
//!
//! ```text
//!            event                 settled                  done
//!   Idle ───────────▶ Debouncing ───────────▶ Processing ───────────▶ Idle
//!                        │  ▲                                   (pending event?
//!                 change │  │ reset window                       back to Debouncing)
//!                        └──┘
//! ```
//!
//! Every document gets its own worker task fed by a capacity-1 channel, so
//! at most one pipeline run is in flight per document and any number of
//! events collapse into a single follow-up pass. Processing is never
//! cancelled; shutdown waits for in-flight runs to finish.

mod debounce;

pub use debounce::wait_for_quiescence;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::errors::{SyncError, SyncResult};
use crate::pipeline::Pipeline;

/// Delay between attempts to subscribe to a missing watch directory
const SUBSCRIBE_RETRY: Duration = Duration::from_secs(5);

/// Worker state, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Debouncing,
    Processing,
}

/// Filesystem watcher driving the pipeline
pub struct ChangeWatcher {
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ChangeWatcher {
    pub fn new(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Self {
        Self {
            pipeline,
            shutdown,
            tracker: TaskTracker::new(),
        }
    }

    /// Watch until the shutdown token fires.
    ///
    /// Returns once the subscription is closed and every in-flight pipeline
    /// run has finished.
    pub async fn run(self) -> SyncResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let Some(watcher) = self.subscribe_with_retry(tx).await else {
            return Ok(());
        };

        info!(
            watch_dir = %self.pipeline.config().watch_dir.display(),
            "Watcher started, monitoring for certificate changes"
        );

        let mut workers: HashMap<PathBuf, mpsc::Sender<()>> = HashMap::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(Ok(event)) => self.dispatch(event, &mut workers),
                    Some(Err(e)) => warn!(error = %e, "Watcher error"),
                    None => break,
                },
            }
        }

        drop(watcher);
        drop(workers);
        debug!("Watcher subscription closed");

        self.tracker.close();
        self.tracker.wait().await;
        info!("Watcher stopped");
        Ok(())
    }

    /// Subscribe, retrying while the directory is missing. `None` means
    /// shutdown was requested first.
    async fn subscribe_with_retry(
        &self,
        tx: mpsc::UnboundedSender<notify::Result<Event>>,
    ) -> Option<RecommendedWatcher> {
        let watch_dir = &self.pipeline.config().watch_dir;
        loop {
            match subscribe(watch_dir, tx.clone()) {
                Ok(watcher) => return Some(watcher),
                Err(e) => warn!(
                    watch_dir = %watch_dir.display(),
                    error = %SyncError::from(e),
                    retry_secs = SUBSCRIBE_RETRY.as_secs(),
                    "Failed to watch certificate directory"
                ),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(SUBSCRIBE_RETRY) => {}
            }
        }
    }

    /// Route an event to the workers of the documents it touches
    fn dispatch(&self, event: Event, workers: &mut HashMap<PathBuf, mpsc::Sender<()>>) {
        let kind = match event.kind {
            EventKind::Create(_) => "added",
            EventKind::Modify(_) => "changed",
            _ => return,
        };

        for path in event.paths {
            if !self.pipeline.config().is_document_path(&path) {
                continue;
            }
            debug!(path = %path.display(), "Certificate file {}", kind);

            if let Some(tx) = workers.get(&path) {
                match tx.try_send(()) {
                    // Full: a pass is already pending and will see this change
                    Ok(()) | Err(mpsc::error::TrySendError::Full(())) => continue,
                    Err(mpsc::error::TrySendError::Closed(())) => {
                        trace!(path = %path.display(), "Document worker gone, respawning");
                    }
                }
            }

            let (tx, rx) = mpsc::channel(1);
            self.tracker.spawn(document_worker(
                path.clone(),
                Arc::clone(&self.pipeline),
                rx,
                self.shutdown.clone(),
            ));
            workers.insert(path, tx);
        }
    }
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("watch_dir", &self.pipeline.config().watch_dir)
            .field("workers", &self.tracker.len())
            .finish()
    }
}

fn subscribe(
    dir: &Path,
    tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res| {
        // Receiver gone means the watcher is shutting down
        let _ = tx.send(res);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Serializes pipeline runs for one document.
///
/// Starts in Debouncing: it is spawned in response to an event.
async fn document_worker(
    path: PathBuf,
    pipeline: Arc<Pipeline>,
    mut rx: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    let debounce = pipeline.config().debounce.clone();

    loop {
        trace!(path = %path.display(), state = ?WatchState::Debouncing, "Document worker");
        let settled = tokio::select! {
            _ = shutdown.cancelled() => break,
            settled = wait_for_quiescence(
                &path,
                debounce.stability_threshold(),
                debounce.poll_interval(),
            ) => settled,
        };

        match settled {
            Ok(_) => {
                // Anything queued so far is part of the settled content
                while rx.try_recv().is_ok() {}

                trace!(path = %path.display(), state = ?WatchState::Processing, "Document worker");
                let task_pipeline = Arc::clone(&pipeline);
                let task_path = path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    task_pipeline.process_document(&task_path)
                })
                .await
                .unwrap_or_else(|e| Err(SyncError::Task(e.to_string())));
                pipeline.report(&path, &result);
            }
            Err(e) => debug!(
                path = %path.display(),
                error = %e,
                "Document vanished before it settled"
            ),
        }

        trace!(path = %path.display(), state = ?WatchState::Idle, "Document worker");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => if next.is_none() { break },
        }
    }

    trace!(path = %path.display(), "Document worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use certsync_common::DomainName;
    use certsync_config::{DebounceConfig, SyncConfig};
    use std::fs;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn document(key: &str) -> String {
        format!(
            r#"{{"letsencrypt":{{"Certificates":[{{"domain":{{"main":"example.com"}},"key":"{}","certificate":"C"}}]}}}}"#,
            key
        )
    }

    fn pipeline_in(dir: &TempDir) -> Arc<Pipeline> {
        let config = SyncConfig {
            watch_dir: dir.path().join("acme"),
            output_dir: dir.path().join("certs"),
            live_config: dir.path().join("configuration.mjs"),
            domain: DomainName::new("example.com").unwrap(),
            debounce: DebounceConfig {
                stability_threshold_ms: 200,
                poll_interval_ms: 20,
            },
            ..Default::default()
        };
        Arc::new(Pipeline::new(Arc::new(config)).unwrap())
    }

    /// Poll `condition` until it holds or the deadline passes
    async fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    async fn wait_for_content(path: &Path, expected: &str) -> bool {
        wait_until(|| fs::read_to_string(path).map(|c| c == expected).unwrap_or(false)).await
    }

    fn modified(path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_new_and_modified_documents_are_synced() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);
        let config = pipeline.config();
        fs::create_dir_all(&config.watch_dir).unwrap();
        fs::write(
            &config.live_config,
            "export default {\n  \"tls\": { \"key\": \"/old.key\", \"certificate\": \"/old.crt\" }\n};\n",
        )
        .unwrap();
        let document_path = config.watch_dir.join("acme.json");
        let key_path = config.output_dir.join("example.com.key");
        let cert_path = config.output_dir.join("example.com.crt");
        let key_field = format!("\"key\": \"{}\"", key_path.display());
        let cert_field = format!("\"certificate\": \"{}\"", cert_path.display());

        let shutdown = CancellationToken::new();
        let watcher = ChangeWatcher::new(Arc::clone(&pipeline), shutdown.clone());
        let task = tokio::spawn(watcher.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Written in two chunks, as the proxy does when it rewrites the store
        let content = document("K1");
        let (head, tail) = content.split_at(content.len() / 2);
        fs::write(&document_path, head).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::write(&document_path, format!("{}{}", head, tail)).unwrap();

        assert!(wait_for_content(&key_path, "K1").await);
        assert!(
            wait_until(|| fs::read_to_string(&config.live_config)
                .map(|c| c.contains(&key_field))
                .unwrap_or(false))
            .await
        );

        // Let the first touch land, then age the live config
        tokio::time::sleep(Duration::from_millis(100)).await;
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&config.live_config)
            .unwrap()
            .set_modified(past)
            .unwrap();

        fs::write(&document_path, document("K2")).unwrap();
        assert!(wait_until(|| modified(&config.live_config) > past + Duration::from_secs(60)).await);
        assert_eq!(fs::read_to_string(&key_path).unwrap(), "K2");

        let live = fs::read_to_string(&config.live_config).unwrap();
        assert!(live.contains(&key_field));
        assert!(live.contains(&cert_field));
        assert!(!live.contains("/old."));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ignores_files_without_suffix() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);
        fs::create_dir_all(&pipeline.config().watch_dir).unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ChangeWatcher::new(Arc::clone(&pipeline), shutdown.clone()).run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(pipeline.config().watch_dir.join("acme.json.bak"), document("K")).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!pipeline.config().output_dir.exists());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_while_watch_dir_missing() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(ChangeWatcher::new(pipeline, shutdown.clone()).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
