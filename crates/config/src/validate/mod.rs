//! Pre-flight checks beyond field validation.
//!
//! Field constraints are enforced by [`crate::SyncConfig::validate_config`];
//! this module inspects the filesystem and flags risky combinations. Errors
//! block startup in `check` mode, warnings are only reported.

mod lint;
mod paths;

pub use lint::lint_config;
pub use paths::validate_paths;

use std::fmt;

use crate::SyncConfig;

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A configured path has the wrong file type
    Path,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Path => write!(f, "path"),
        }
    }
}

/// A problem that makes the configuration unusable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A suspicious but workable setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Collected errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// `true` when there are no errors (warnings are allowed)
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every pre-flight check
pub fn preflight(config: &SyncConfig) -> ValidationResult {
    let mut result = validate_paths(config);
    result.merge(lint_config(config));
    result
}
