//! Configuration linting for risky combinations
//!
//! Nothing here blocks startup; the warnings point at settings that work
//! but are probably not what the operator meant.

use super::{ValidationResult, ValidationWarning};
use crate::SyncConfig;

/// Below this the size check may pass between two appends of a slow writer
const MIN_SAFE_STABILITY_MS: u64 = 500;

/// Lint configuration for best practices
pub fn lint_config(config: &SyncConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    if config.domain.as_str() == "example.com" {
        result.add_warning(ValidationWarning::new(
            "Domain is the placeholder 'example.com' (set DOMAIN or --domain)".to_string(),
        ));
    }

    if config.output_dir == config.watch_dir {
        result.add_warning(ValidationWarning::new(format!(
            "Output directory is the watch directory {:?} (artifacts mix with proxy documents)",
            config.output_dir
        )));
    }

    // A live config that is itself a watched document would retrigger on every patch
    if config.live_config.parent() == Some(config.watch_dir.as_path())
        && config.is_document_path(&config.live_config)
    {
        result.add_warning(ValidationWarning::new(format!(
            "Live config {:?} is inside the watch directory and matches '{}'",
            config.live_config, config.file_suffix
        )));
    }

    if config.debounce.stability_threshold_ms < MIN_SAFE_STABILITY_MS {
        result.add_warning(ValidationWarning::new(format!(
            "Stability threshold of {}ms may process partially written documents (recommended >= {}ms)",
            config.debounce.stability_threshold_ms, MIN_SAFE_STABILITY_MS
        )));
    }

    result
}
