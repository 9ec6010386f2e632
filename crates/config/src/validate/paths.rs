//! Filesystem path validation
//!
//! Checks that configured paths exist with the expected file type. Missing
//! paths are warnings: the proxy and the consuming service may create them
//! after certsync starts.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::SyncConfig;

/// Validate configured paths
pub fn validate_paths(config: &SyncConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !config.watch_dir.exists() {
        result.add_warning(ValidationWarning::new(format!(
            "Watch directory not found: {:?} (watching starts once it exists)",
            config.watch_dir
        )));
    } else if !config.watch_dir.is_dir() {
        result.add_error(ValidationError::new(
            ErrorCategory::Path,
            format!("Watch path is not a directory: {:?}", config.watch_dir),
        ));
    }

    if config.output_dir.exists() && !config.output_dir.is_dir() {
        result.add_error(ValidationError::new(
            ErrorCategory::Path,
            format!("Output path is not a directory: {:?}", config.output_dir),
        ));
    }

    if !config.live_config.exists() {
        result.add_warning(ValidationWarning::new(format!(
            "Live config not found: {:?} (patching is skipped until it exists)",
            config.live_config
        )));
    } else if config.live_config.is_dir() {
        result.add_error(ValidationError::new(
            ErrorCategory::Path,
            format!("Live config is a directory: {:?}", config.live_config),
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> SyncConfig {
        SyncConfig {
            watch_dir: dir.path().join("acme"),
            output_dir: dir.path().join("certs"),
            live_config: dir.path().join("configuration.mjs"),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_paths_are_warnings() {
        let dir = TempDir::new().unwrap();
        let result = validate_paths(&config_in(&dir));

        assert!(result.is_ok());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_watch_path_is_file() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::write(&config.watch_dir, "not a directory").unwrap();

        let result = validate_paths(&config);
        assert!(!result.is_ok());
        assert_eq!(result.errors[0].category, ErrorCategory::Path);
    }

    #[test]
    fn test_all_paths_present() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(&config.watch_dir).unwrap();
        fs::create_dir_all(&config.output_dir).unwrap();
        fs::write(&config.live_config, "export default {};").unwrap();

        let result = validate_paths(&config);
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_live_config_is_directory() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        fs::create_dir_all(&config.live_config).unwrap();

        let result = validate_paths(&config);
        assert!(!result.is_ok());
    }
}
