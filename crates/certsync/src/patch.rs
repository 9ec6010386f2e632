//! Live config patching
//!
//! The consuming service's configuration is a generated ESM module:
//!
//! ```text
//! // Generated configuration
//! export default {
//!   "hostname": "example.com",
//!   "tls": {
//!     "key": "/app/certs/example.com.key",
//!     "certificate": "/app/certs/example.com.crt"
//!   }
//! };
//! ```
//!
//! A file without an `export default { ... }` literal is left alone. Only
//! the string values of `"key"` and `"certificate"` fields are rewritten. Every other byte, including whitespace around the colon,
//! comments and field order, is preserved. After writing, the file's mtime
//! is refreshed to signal a reload.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::Path;
use std::time::SystemTime;

use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::errors::PatchError;

/// Result of a patch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// File rewritten and touched
    Patched { key_fields: usize, cert_fields: usize },
    /// Live config does not exist yet
    Skipped,
    /// Live config has no `export default { ... }` literal; left untouched
    Unrecognized,
}

/// Matches `"<name>"<ws>:<ws>"<value>"`, capturing everything up to the
/// opening quote of the value. Escaped quotes inside the value are part of
/// it, so a previously written escaped path is replaced whole.
fn field_pattern(name: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"("{}"\s*:\s*")(?:[^"\\]|\\.)*""#,
        regex::escape(name)
    ))
}

/// Escape a path for use inside a double-quoted string literal
fn escape_string_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Rewrites key/certificate path fields in the live config.
#[derive(Debug, Clone)]
pub struct ConfigPatcher {
    export_default: Regex,
    key_field: Regex,
    cert_field: Regex,
}

impl ConfigPatcher {
    /// Compile the field patterns
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            export_default: Regex::new(r"export\s+default\s+\{[\s\S]*\}")?,
            key_field: field_pattern("key")?,
            cert_field: field_pattern("certificate")?,
        })
    }

    /// Substitute both fields in `content`, returning the new text and how
    /// many occurrences of each field were rewritten.
    pub fn patch_str(&self, content: &str, key_path: &Path, cert_path: &Path) -> (String, usize, usize) {
        let key_value = escape_string_literal(&key_path.to_string_lossy());
        let cert_value = escape_string_literal(&cert_path.to_string_lossy());

        let key_fields = self.key_field.find_iter(content).count();
        let cert_fields = self.cert_field.find_iter(content).count();

        let patched = self
            .key_field
            .replace_all(content, |caps: &Captures| format!("{}{}\"", &caps[1], key_value));
        let patched = self
            .cert_field
            .replace_all(&patched, |caps: &Captures| format!("{}{}\"", &caps[1], cert_value))
            .into_owned();

        (patched, key_fields, cert_fields)
    }

    /// Patch the live config at `config_path` in place.
    ///
    /// A missing file is [`PatchOutcome::Skipped`] and is not created; a
    /// file without an `export default` object is
    /// [`PatchOutcome::Unrecognized`] and is not written. Otherwise the
    /// content is written back and the mtime refreshed even when nothing
    /// changed; a failed mtime update is only logged.
    pub fn patch(
        &self,
        config_path: &Path,
        key_path: &Path,
        cert_path: &Path,
    ) -> Result<PatchOutcome, PatchError> {
        if !config_path.exists() {
            info!(path = %config_path.display(), "Live config does not exist yet, skipping patch");
            return Ok(PatchOutcome::Skipped);
        }

        let content = fs::read_to_string(config_path).map_err(|source| PatchError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;

        if !self.export_default.is_match(&content) {
            warn!(
                path = %config_path.display(),
                "Could not parse live config format (no export default object), skipping patch"
            );
            return Ok(PatchOutcome::Unrecognized);
        }

        let (patched, key_fields, cert_fields) = self.patch_str(&content, key_path, cert_path);

        if key_fields == 0 && cert_fields == 0 {
            warn!(
                path = %config_path.display(),
                "Live config has no \"key\" or \"certificate\" fields to patch"
            );
        }

        fs::write(config_path, patched).map_err(|source| PatchError::Write {
            path: config_path.to_path_buf(),
            source,
        })?;

        info!(
            path = %config_path.display(),
            key_fields = key_fields,
            cert_fields = cert_fields,
            "Live config updated"
        );

        match touch(config_path) {
            Ok(()) => debug!(path = %config_path.display(), "Refreshed live config mtime"),
            Err(e) => warn!(
                path = %config_path.display(),
                error = %e,
                "Failed to refresh live config mtime"
            ),
        }

        Ok(PatchOutcome::Patched {
            key_fields,
            cert_fields,
        })
    }
}

/// Set access and modification time to now
fn touch(path: &Path) -> io::Result<()> {
    let now = SystemTime::now();
    let file = File::options().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(now).set_modified(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const LIVE_CONFIG: &str = r#"// Generated configuration for Kill the Newsletter
// Domain: example.com
// Generated: 2024-01-01T00:00:00.000Z

export default {
  "hostname": "example.com",
  "systemAdministratorEmail": "admin@example.com",
  "tls": {
    "key": "/old/example.com.key",
    "certificate": "/old/example.com.crt"
  },
  "dataDirectory": "/config/storage",
  "apiKey": "unchanged",
  "environment": "production"
};
"#;

    fn patcher() -> ConfigPatcher {
        ConfigPatcher::new().unwrap()
    }

    #[test]
    fn test_patch_str_is_field_scoped() {
        let (patched, key_fields, cert_fields) = patcher().patch_str(
            LIVE_CONFIG,
            Path::new("/app/certs/example.com.key"),
            Path::new("/app/certs/example.com.crt"),
        );

        assert_eq!((key_fields, cert_fields), (1, 1));
        let expected = LIVE_CONFIG
            .replace("/old/example.com.key", "/app/certs/example.com.key")
            .replace("/old/example.com.crt", "/app/certs/example.com.crt");
        assert_eq!(patched, expected);
    }

    #[test]
    fn test_patch_str_preserves_spacing() {
        let content = "{ \"key\" :\t\"a\", \"certificate\":\"b\" }";
        let (patched, _, _) = patcher().patch_str(content, Path::new("/k"), Path::new("/c"));
        assert_eq!(patched, "{ \"key\" :\t\"/k\", \"certificate\":\"/c\" }");
    }

    #[test]
    fn test_patch_str_replaces_every_occurrence() {
        let content = r#"{ "a": { "key": "1" }, "b": { "key": "2" } }"#;
        let (patched, key_fields, cert_fields) =
            patcher().patch_str(content, Path::new("/k"), Path::new("/c"));
        assert_eq!((key_fields, cert_fields), (2, 0));
        assert_eq!(patched, r#"{ "a": { "key": "/k" }, "b": { "key": "/k" } }"#);
    }

    #[test]
    fn test_patch_str_escapes_backslashes_and_quotes() {
        let content = r#"{ "key": "", "certificate": "" }"#;
        let (patched, _, _) = patcher().patch_str(
            content,
            Path::new(r"C:\certs\example.com.key"),
            Path::new(r#"/odd"name.crt"#),
        );
        assert_eq!(
            patched,
            r#"{ "key": "C:\\certs\\example.com.key", "certificate": "/odd\"name.crt" }"#
        );
    }

    #[test]
    fn test_patch_str_handles_dollar_signs() {
        let content = r#"{ "key": "x" }"#;
        let (patched, _, _) = patcher().patch_str(content, Path::new("/certs/$1.key"), Path::new("/c"));
        assert_eq!(patched, r#"{ "key": "/certs/$1.key" }"#);
    }

    #[test]
    fn test_patch_missing_config_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");

        let outcome = patcher()
            .patch(&config_path, Path::new("/k"), Path::new("/c"))
            .unwrap();

        assert_eq!(outcome, PatchOutcome::Skipped);
        assert!(!config_path.exists());
    }

    #[test]
    fn test_patch_file_and_touch() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");
        fs::write(&config_path, LIVE_CONFIG).unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&config_path)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let key_path = PathBuf::from("/app/certs/example.com.key");
        let cert_path = PathBuf::from("/app/certs/example.com.crt");
        let outcome = patcher().patch(&config_path, &key_path, &cert_path).unwrap();
        assert_eq!(
            outcome,
            PatchOutcome::Patched {
                key_fields: 1,
                cert_fields: 1
            }
        );

        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.contains(r#""key": "/app/certs/example.com.key""#));
        assert!(content.contains(r#""apiKey": "unchanged""#));

        let modified = fs::metadata(&config_path).unwrap().modified().unwrap();
        assert!(modified > past + Duration::from_secs(60));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");
        fs::write(&config_path, LIVE_CONFIG).unwrap();

        let patcher = patcher();
        patcher
            .patch(&config_path, Path::new("/k"), Path::new("/c"))
            .unwrap();
        let first = fs::read(&config_path).unwrap();
        patcher
            .patch(&config_path, Path::new("/k"), Path::new("/c"))
            .unwrap();
        assert_eq!(fs::read(&config_path).unwrap(), first);
    }

    #[test]
    fn test_patch_twice_with_quoted_path_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");
        fs::write(&config_path, LIVE_CONFIG).unwrap();

        let key_path = Path::new(r#"/odd"dir\x.key"#);
        let cert_path = Path::new(r#"/odd"dir\x.crt"#);
        let patcher = patcher();

        patcher.patch(&config_path, key_path, cert_path).unwrap();
        let first = fs::read_to_string(&config_path).unwrap();
        assert!(first.contains(r#""key": "/odd\"dir\\x.key""#));

        let outcome = patcher.patch(&config_path, key_path, cert_path).unwrap();
        assert_eq!(
            outcome,
            PatchOutcome::Patched {
                key_fields: 1,
                cert_fields: 1
            }
        );
        assert_eq!(fs::read_to_string(&config_path).unwrap(), first);
    }

    #[test]
    fn test_patch_unrecognized_format_is_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");
        let content = "module.exports = { \"key\": \"/old.key\" };\n";
        fs::write(&config_path, content).unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&config_path)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let outcome = patcher()
            .patch(&config_path, Path::new("/k"), Path::new("/c"))
            .unwrap();

        assert_eq!(outcome, PatchOutcome::Unrecognized);
        assert_eq!(fs::read_to_string(&config_path).unwrap(), content);
        let modified = fs::metadata(&config_path).unwrap().modified().unwrap();
        assert!(modified < past + Duration::from_secs(60));
    }

    #[test]
    fn test_patch_without_fields_still_touches() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("configuration.mjs");
        fs::write(&config_path, "export default {};\n").unwrap();

        let outcome = patcher()
            .patch(&config_path, Path::new("/k"), Path::new("/c"))
            .unwrap();
        assert_eq!(
            outcome,
            PatchOutcome::Patched {
                key_fields: 0,
                cert_fields: 0
            }
        );
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "export default {};\n");
    }
}
