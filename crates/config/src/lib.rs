//! Configuration for certsync.
//!
//! A [`SyncConfig`] is built once at startup from, in increasing precedence:
//! built-in defaults, an optional TOML file, environment variables and CLI
//! flags. The last two are gathered by the binary into [`ConfigOverrides`].
//! Pipeline code only ever receives the finished struct.
//!
//! # Example
//!
//! ```toml
//! watch_dir = "/etc/traefik/acme"
//! output_dir = "/app/certs"
//! domain = "mail.example.com"
//! live_config = "/config/configuration.mjs"
//!
//! [debounce]
//! stability_threshold_ms = 2000
//! poll_interval_ms = 100
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use validator::Validate;

use certsync_common::DomainName;

pub mod validate;

pub use validate::{
    preflight, ErrorCategory, ValidationError, ValidationResult, ValidationWarning,
};

/// Errors raised while building the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("invalid debounce settings: {0}")]
    Debounce(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory holding the proxy's certificate store documents
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Directory receiving `<domain>.key` and `<domain>.crt`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Domain whose certificate is extracted
    #[serde(default)]
    pub domain: DomainName,

    /// Live configuration file of the consuming service
    #[serde(default = "default_live_config")]
    pub live_config: PathBuf,

    /// Only files whose name ends with this suffix are documents
    #[serde(default = "default_file_suffix")]
    #[validate(length(min = 1), custom(function = "validate_suffix"))]
    pub file_suffix: String,

    /// Write-completion detection
    #[serde(default)]
    #[validate(nested)]
    pub debounce: DebounceConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            output_dir: default_output_dir(),
            domain: DomainName::default(),
            live_config: default_live_config(),
            file_suffix: default_file_suffix(),
            debounce: DebounceConfig::default(),
        }
    }
}

/// Quiescence window used before a changed document is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DebounceConfig {
    /// How long the file size must stay unchanged
    #[serde(default = "default_stability_threshold_ms")]
    #[validate(range(min = 1, max = 600_000))]
    pub stability_threshold_ms: u64,

    /// How often the size is sampled
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub poll_interval_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            stability_threshold_ms: default_stability_threshold_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl DebounceConfig {
    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("/etc/traefik/acme")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("/app/certs")
}
fn default_live_config() -> PathBuf {
    PathBuf::from("/config/configuration.mjs")
}
fn default_file_suffix() -> String {
    ".json".to_string()
}
fn default_stability_threshold_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    100
}

fn validate_suffix(suffix: &str) -> Result<(), validator::ValidationError> {
    if suffix.contains('/') || suffix.contains('\\') {
        return Err(validator::ValidationError::new("suffix_path_separator"));
    }
    Ok(())
}

/// Values supplied on the command line or through the environment.
///
/// `None` leaves the file/default value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub watch_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub domain: Option<DomainName>,
    pub live_config: Option<PathBuf>,
    pub stability_threshold_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every set value onto `config`
    pub fn apply(self, config: &mut SyncConfig) {
        if let Some(watch_dir) = self.watch_dir {
            config.watch_dir = watch_dir;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(domain) = self.domain {
            config.domain = domain;
        }
        if let Some(live_config) = self.live_config {
            config.live_config = live_config;
        }
        if let Some(ms) = self.stability_threshold_ms {
            config.debounce.stability_threshold_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.debounce.poll_interval_ms = ms;
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        trace!(path = %path.display(), "Loading configuration file");

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SyncConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(
            path = %path.display(),
            domain = %config.domain,
            "Loaded configuration file"
        );
        Ok(config)
    }

    /// Build the effective configuration: file (or defaults) plus overrides
    pub fn load(file: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        overrides.apply(&mut config);
        config.validate_config()?;
        Ok(config)
    }

    /// Check field constraints and cross-field invariants
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;

        if self.debounce.poll_interval_ms > self.debounce.stability_threshold_ms {
            return Err(ConfigError::Debounce(format!(
                "poll interval ({}ms) exceeds stability threshold ({}ms)",
                self.debounce.poll_interval_ms, self.debounce.stability_threshold_ms
            )));
        }

        Ok(())
    }

    /// Whether a file name is a candidate certificate document
    pub fn is_document_name(&self, file_name: &str) -> bool {
        file_name.ends_with(&self.file_suffix)
    }

    /// Whether a path is a candidate certificate document
    pub fn is_document_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| self.is_document_name(name))
            .unwrap_or(false)
    }
}
