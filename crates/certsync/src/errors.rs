//! Error types for the synchronization pipeline.
//!
//! `NotFound` and a missing live config are outcomes, not errors; see
//! [`crate::extract::Extraction`] and [`crate::patch::PatchOutcome`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors from the schema-tolerant extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The document is not valid JSON.
    #[error("invalid certificate store JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A record matched the domain but lacks a usable field.
    #[error("certificate record for '{domain}' has no usable '{field}' field")]
    MalformedRecord { domain: String, field: &'static str },
}

/// Errors from the artifact writer.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the live config patcher.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to read live config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write live config {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure while processing a document or scanning the watch directory.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read document {path:?}: {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list watch directory {path:?}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("pipeline task failed: {0}")]
    Task(String),
}
