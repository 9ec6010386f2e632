//! One-shot directory scan.

use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use certsync_config::SyncConfig;

use crate::errors::{SyncError, SyncResult};
use crate::pipeline::{DocumentOutcome, Pipeline};

/// Counts from one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Candidate documents found
    pub documents: usize,
    /// Documents that yielded a certificate for the domain
    pub synced: usize,
    /// Valid documents without a matching certificate
    pub not_found: usize,
    /// Documents that failed to read, parse, or materialize
    pub failed: usize,
}

impl ScanReport {
    pub fn any_synced(&self) -> bool {
        self.synced > 0
    }
}

/// Regular files in `watch_dir` whose name carries the document suffix,
/// sorted by path. Not recursive.
pub fn list_documents(config: &SyncConfig) -> SyncResult<Vec<PathBuf>> {
    let read_dir_err = |source| SyncError::ReadDir {
        path: config.watch_dir.clone(),
        source,
    };

    let mut documents = Vec::new();
    for entry in fs::read_dir(&config.watch_dir).map_err(read_dir_err)? {
        let path = entry.map_err(read_dir_err)?.path();
        // Follows symlinks: mounted secrets are often links
        if path.is_file() && config.is_document_path(&path) {
            documents.push(path);
        }
    }
    documents.sort();

    debug!(
        watch_dir = %config.watch_dir.display(),
        count = documents.len(),
        "Listed certificate documents"
    );
    Ok(documents)
}

/// Run the pipeline over every document in the watch directory.
///
/// A failing document is logged and counted; it never stops the scan.
pub fn scan_once(pipeline: &Pipeline) -> SyncResult<ScanReport> {
    let config = pipeline.config();
    info!(
        watch_dir = %config.watch_dir.display(),
        "Checking for existing certificates"
    );

    let documents = list_documents(config)?;
    info!(count = documents.len(), "Found certificate files");

    let mut report = ScanReport {
        documents: documents.len(),
        ..Default::default()
    };

    for path in &documents {
        let result = pipeline.process_document(path);
        pipeline.report(path, &result);
        match result {
            Ok(DocumentOutcome::Synced { .. }) => report.synced += 1,
            Ok(DocumentOutcome::NotFound) => report.not_found += 1,
            Err(_) => report.failed += 1,
        }
    }

    Ok(report)
}
