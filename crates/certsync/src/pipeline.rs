//! Per-document synchronization pipeline.
//!
//! Extractor -> Artifact Writer -> Config Patcher for one certificate store
//! document. Both the startup scan and the change watcher go through
//! [`Pipeline::process_document`], so a document is handled identically
//! whichever way it was discovered. Runs are serialized: every document
//! writes the same artifact files and live config.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use certsync_config::SyncConfig;

use crate::artifact::{write_artifacts, ArtifactPaths};
use crate::errors::{ExtractError, SyncError, SyncResult};
use crate::extract::{extract, Extraction};
use crate::patch::{ConfigPatcher, PatchOutcome};

/// What happened to one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Artifacts written and live config handled
    Synced {
        paths: ArtifactPaths,
        patch: PatchOutcome,
    },
    /// The document holds no certificate for the domain
    NotFound,
}

/// Shared pipeline state: configuration plus compiled patcher
#[derive(Debug)]
pub struct Pipeline {
    config: Arc<SyncConfig>,
    patcher: ConfigPatcher,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(config: Arc<SyncConfig>) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            patcher: ConfigPatcher::new()?,
            run_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read and process the document at `path`.
    ///
    /// Blocking; async callers run it on the blocking pool.
    pub fn process_document(&self, path: &Path) -> SyncResult<DocumentOutcome> {
        info!(path = %path.display(), "Processing certificate file");

        let document = fs::read(path).map_err(|source| SyncError::ReadDocument {
            path: path.to_path_buf(),
            source,
        })?;

        self.process_bytes(&document)
    }

    /// Process an in-memory document
    pub fn process_bytes(&self, document: &[u8]) -> SyncResult<DocumentOutcome> {
        let _guard = self.run_lock.lock();

        let cert = match extract(document, &self.config.domain)? {
            Extraction::Found(cert) => cert,
            Extraction::NotFound => return Ok(DocumentOutcome::NotFound),
        };

        let paths = write_artifacts(&cert, &self.config.output_dir)?;
        let patch = self
            .patcher
            .patch(&self.config.live_config, &paths.key_path, &paths.cert_path)?;

        Ok(DocumentOutcome::Synced { paths, patch })
    }

    /// Log the result of processing `path`
    pub fn report(&self, path: &Path, result: &SyncResult<DocumentOutcome>) {
        let domain = &self.config.domain;
        match result {
            Ok(DocumentOutcome::Synced { paths, patch }) => info!(
                path = %path.display(),
                domain = %domain,
                key = %paths.key_path.display(),
                cert = %paths.cert_path.display(),
                live_config_patched = matches!(patch, PatchOutcome::Patched { .. }),
                "Certificate synchronized"
            ),
            Ok(DocumentOutcome::NotFound) => info!(
                path = %path.display(),
                domain = %domain,
                "No certificate found for domain"
            ),
            Err(SyncError::Extract(ExtractError::Parse(e))) => warn!(
                path = %path.display(),
                error = %e,
                "Error parsing certificate JSON, skipping"
            ),
            Err(e) => error!(
                path = %path.display(),
                domain = %domain,
                error = %e,
                "Error processing certificate"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certsync_common::DomainName;
    use serde_json::json;
    use tempfile::TempDir;

    fn pipeline_in(dir: &TempDir) -> Pipeline {
        let config = SyncConfig {
            watch_dir: dir.path().join("acme"),
            output_dir: dir.path().join("certs"),
            live_config: dir.path().join("configuration.mjs"),
            domain: DomainName::new("example.com").unwrap(),
            ..Default::default()
        };
        Pipeline::new(Arc::new(config)).unwrap()
    }

    fn document(key: &str) -> Vec<u8> {
        json!({
            "letsencrypt": {
                "Certificates": [
                    { "domain": { "main": "example.com" }, "key": key, "certificate": "C" }
                ]
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_process_bytes_without_live_config() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);

        let outcome = pipeline.process_bytes(&document("K")).unwrap();
        let DocumentOutcome::Synced { paths, patch } = outcome else {
            panic!("expected synced outcome");
        };
        assert_eq!(patch, PatchOutcome::Skipped);
        assert_eq!(fs::read_to_string(paths.key_path).unwrap(), "K");
        assert!(!pipeline.config().live_config.exists());
    }

    #[test]
    fn test_process_bytes_patches_live_config() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);
        fs::write(
            &pipeline.config().live_config,
            "export default {\n  \"tls\": { \"key\": \"\", \"certificate\": \"\" }\n};\n",
        )
        .unwrap();

        let outcome = pipeline.process_bytes(&document("K")).unwrap();
        assert!(matches!(
            outcome,
            DocumentOutcome::Synced {
                patch: PatchOutcome::Patched { key_fields: 1, cert_fields: 1 },
                ..
            }
        ));

        let content = fs::read_to_string(&pipeline.config().live_config).unwrap();
        let key_path = dir.path().join("certs").join("example.com.key");
        assert!(content.contains(&key_path.to_string_lossy().into_owned()));
    }

    #[test]
    fn test_process_document_missing_file() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);

        let err = pipeline
            .process_document(&dir.path().join("missing.json"))
            .unwrap_err();
        assert!(matches!(err, SyncError::ReadDocument { .. }));
    }

    #[test]
    fn test_not_found_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);

        let outcome = pipeline.process_bytes(b"{\"letsencrypt\": {}}").unwrap();
        assert_eq!(outcome, DocumentOutcome::NotFound);
        assert!(!pipeline.config().output_dir.exists());
    }

    #[test]
    fn test_parse_error_is_typed() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_in(&dir);

        let result = pipeline.process_bytes(b"not json");
        assert!(matches!(
            result,
            Err(SyncError::Extract(ExtractError::Parse(_)))
        ));
        pipeline.report(Path::new("acme.json"), &result);
    }
}
