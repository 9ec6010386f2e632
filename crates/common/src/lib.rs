//! Common types and utilities shared across certsync crates.
//!
//! - [`DomainName`]: validated target domain
//! - [`init_tracing`]: tracing subscriber bootstrap used by the binary

pub mod domain;
pub mod observability;

pub use domain::{DomainName, DomainNameError};
pub use observability::{init_tracing, LogFormat};
