//! Validated domain name newtype.
//!
//! The target domain is used both for matching certificate records and for
//! naming artifact files, so it must never contain anything that could turn
//! `<output_dir>/<domain>.key` into a path outside the output directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reasons a string is rejected as a domain name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainNameError {
    #[error("domain name is empty")]
    Empty,

    #[error("domain name '{0}' contains a path separator")]
    PathSeparator(String),

    #[error("domain name '{0}' contains whitespace or control characters")]
    InvalidCharacter(String),

    #[error("'{0}' is not a domain name")]
    Reserved(String),
}

/// Domain whose certificate is being synchronized.
///
/// Comparison is exact: the issuing proxy stores names as they were
/// requested, and matching follows the stored form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    /// Validate and wrap a domain name
    pub fn new(name: impl Into<String>) -> Result<Self, DomainNameError> {
        let name = name.into();

        if name.is_empty() {
            return Err(DomainNameError::Empty);
        }
        if name.contains('/') || name.contains('\\') {
            return Err(DomainNameError::PathSeparator(name));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainNameError::InvalidCharacter(name));
        }
        if name == "." || name == ".." {
            return Err(DomainNameError::Reserved(name));
        }

        Ok(Self(name))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

/// `example.com`, the reserved documentation domain.
///
/// Only used as a placeholder when nothing is configured.
impl Default for DomainName {
    fn default() -> Self {
        Self("example.com".to_string())
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for DomainName {
    type Err = DomainNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DomainName {
    type Error = DomainNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}
