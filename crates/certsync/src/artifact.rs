//! Artifact materialization
//!
//! Writes the extracted pair to fixed paths:
//!
//! ```text
//! output_dir/
//! ├── example.com.key   # Private key (0600)
//! └── example.com.crt   # Certificate chain (0644)
//! ```
//!
//! Each file is written to a temporary file in `output_dir` and renamed over
//! the target, so a reader sees either the old or the new content.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use certsync_common::DomainName;

use crate::errors::ArtifactError;
use crate::extract::DomainCertificate;

const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

/// Output locations for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

impl ArtifactPaths {
    /// `<output_dir>/<domain>.key` and `<output_dir>/<domain>.crt`
    pub fn for_domain(output_dir: &Path, domain: &DomainName) -> Self {
        Self {
            key_path: output_dir.join(format!("{}.key", domain)),
            cert_path: output_dir.join(format!("{}.crt", domain)),
        }
    }
}

/// Write the key and certificate for `cert.domain` into `output_dir`.
///
/// Existing files are overwritten unconditionally; identical input yields
/// byte-identical files.
pub fn write_artifacts(
    cert: &DomainCertificate,
    output_dir: &Path,
) -> Result<ArtifactPaths, ArtifactError> {
    fs::create_dir_all(output_dir).map_err(|source| ArtifactError::CreateDir {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let paths = ArtifactPaths::for_domain(output_dir, &cert.domain);

    write_atomic(output_dir, &paths.key_path, &cert.private_key_pem, KEY_MODE)?;
    write_atomic(output_dir, &paths.cert_path, &cert.certificate_chain_pem, CERT_MODE)?;

    info!(
        domain = %cert.domain,
        output_dir = %output_dir.display(),
        "Certificates extracted"
    );

    Ok(paths)
}

/// `mode` is applied on Unix only
fn write_atomic(dir: &Path, path: &Path, contents: &str, mode: u32) -> Result<(), ArtifactError> {
    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode)).map_err(write_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote artifact");
    Ok(())
}
