//! certsync Library
//!
//! Keeps a service's TLS key and certificate files in sync with the
//! certificate store a Traefik ACME resolver maintains on disk.
//!
//! This library provides:
//!
//! - **Extraction**: locating a domain's certificate in any store layout
//! - **Artifacts**: atomic `<domain>.key` / `<domain>.crt` writes
//! - **Patching**: pointing a live config file at the artifacts
//! - **Scanning**: one pass over the watch directory
//! - **Watching**: debounced, per-document change handling
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certsync::{scan_once, Pipeline};
//! use certsync_config::SyncConfig;
//!
//! let pipeline = Pipeline::new(Arc::new(SyncConfig::default()))?;
//! let report = scan_once(&pipeline)?;
//! println!("{} document(s) synced", report.synced);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod artifact;
pub mod errors;
pub mod extract;
pub mod patch;
pub mod pipeline;
pub mod scan;
pub mod signals;
pub mod supervisor;
pub mod watch;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use errors::{ArtifactError, ExtractError, PatchError, SyncError, SyncResult};

// Extraction
pub use extract::{extract, DomainCertificate, Extraction};

// Artifacts
pub use artifact::{write_artifacts, ArtifactPaths};

// Live config patching
pub use patch::{ConfigPatcher, PatchOutcome};

// Pipeline and scanning
pub use pipeline::{DocumentOutcome, Pipeline};
pub use scan::{list_documents, scan_once, ScanReport};

// Watching
pub use watch::{wait_for_quiescence, ChangeWatcher, WatchState};

// Process lifecycle
pub use signals::{SignalManager, SignalType};
pub use supervisor::Supervisor;
