//! Write-completion detection.
//!
//! The proxy rewrites its store in place; a change event can arrive while
//! the document is still being written. A document is considered complete
//! once its size and mtime have not changed for the stability threshold.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::{sleep, Instant};
use tracing::trace;

/// Size and modification time observed at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

async fn fingerprint(path: &Path) -> io::Result<Fingerprint> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(Fingerprint {
        len: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

/// Wait until `path` has been unchanged for `threshold`, sampling every
/// `poll_interval`. Returns the settled size.
///
/// # Errors
///
/// Fails with the metadata error when the file disappears or becomes
/// unreadable while waiting.
pub async fn wait_for_quiescence(
    path: &Path,
    threshold: Duration,
    poll_interval: Duration,
) -> io::Result<u64> {
    let mut last = fingerprint(path).await?;
    let mut stable_since = Instant::now();

    loop {
        if stable_since.elapsed() >= threshold {
            trace!(path = %path.display(), size = last.len, "Document settled");
            return Ok(last.len);
        }

        sleep(poll_interval).await;

        let current = fingerprint(path).await?;
        if current != last {
            trace!(
                path = %path.display(),
                previous = last.len,
                current = current.len,
                "Document still changing"
            );
            last = current;
            stable_since = Instant::now();
        }
    }
}
