//! Schema-tolerant certificate extraction
//!
//! Traefik's `acme.json` has changed shape across releases:
//!
//! ```text
//! v1:  { "Account": {...}, "Certificates": [ { "Domain": { "Main", "SANs" }, "Certificate", "Key" } ] }
//! v2+: { "<resolver>": { "Account": {...}, "Certificates": [ { "domain": { "main", "sans" }, "certificate", "key" } ] } }
//! ```
//!
//! Record lists are located by an ordered chain of [`RecordSource`]s. The
//! first source yielding a non-empty list wins; lists are never merged.
//! Field names are probed lower-camel first, then upper-Pascal.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use certsync_common::DomainName;

use crate::errors::ExtractError;

/// Resolver name tried before any other
pub const PRIMARY_RESOLVER: &str = "letsencrypt";

const CERTIFICATES_KEYS: [&str; 2] = ["Certificates", "certificates"];
const DOMAIN_KEYS: [&str; 2] = ["domain", "Domain"];
const MAIN_KEYS: [&str; 2] = ["main", "Main"];
const SANS_KEYS: [&str; 3] = ["sans", "SANs", "Sans"];
const KEY_KEYS: [&str; 2] = ["key", "Key"];
const CERTIFICATE_KEYS: [&str; 2] = ["certificate", "Certificate"];

/// Key/certificate pair resolved for the target domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCertificate {
    pub domain: DomainName,
    pub private_key_pem: String,
    pub certificate_chain_pem: String,
}

/// Outcome of a successful parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Found(DomainCertificate),
    /// No record covers the domain; the proxy has not issued it yet
    NotFound,
}

/// Result of asking one source for certificate records
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Located<'a> {
    Found(&'a [Value]),
    NotFound,
}

/// Where certificate records may live in a store document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    /// `{ "<name>": { "Certificates": [...] } }`
    KnownResolver(&'static str),
    /// `{ "Certificates": [...] }`
    TopLevel,
    /// First top-level entry, in document order, holding a certificates array
    AnyResolver,
}

/// Sources in priority order
pub const RECORD_SOURCES: [RecordSource; 3] = [
    RecordSource::KnownResolver(PRIMARY_RESOLVER),
    RecordSource::TopLevel,
    RecordSource::AnyResolver,
];

impl RecordSource {
    /// Look for a non-empty record list in `document`
    pub fn locate<'a>(&self, document: &'a Map<String, Value>) -> Located<'a> {
        let records = match self {
            RecordSource::KnownResolver(name) => document.get(*name).and_then(certificates_of),
            RecordSource::TopLevel => certificates_in(document),
            RecordSource::AnyResolver => document.values().find_map(certificates_of),
        };

        match records {
            Some(records) => Located::Found(records),
            None => Located::NotFound,
        }
    }
}

fn certificates_of(container: &Value) -> Option<&[Value]> {
    container.as_object().and_then(certificates_in)
}

fn certificates_in(container: &Map<String, Value>) -> Option<&[Value]> {
    CERTIFICATES_KEYS
        .iter()
        .filter_map(|key| container.get(*key))
        .filter_map(Value::as_array)
        .find(|records| !records.is_empty())
        .map(Vec::as_slice)
}

/// Select the record list from the first source that has one
fn locate_records(document: &Map<String, Value>) -> Option<&[Value]> {
    RECORD_SOURCES
        .iter()
        .find_map(|source| match source.locate(document) {
            Located::Found(records) => {
                trace!(source = ?source, count = records.len(), "Located certificate records");
                Some(records)
            }
            Located::NotFound => None,
        })
}

/// First non-empty string among `keys`
fn first_string<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

/// First domain block that is an object; a `null` under one spelling does
/// not hide the other
fn domain_info(record: &Value) -> Option<&Map<String, Value>> {
    let record = record.as_object()?;
    DOMAIN_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(Value::as_object)
}

fn main_matches(record: &Value, domain: &str) -> bool {
    domain_info(record)
        .and_then(|info| first_string(info, &MAIN_KEYS))
        .is_some_and(|main| main == domain)
}

fn san_matches(record: &Value, domain: &str) -> bool {
    let Some(info) = domain_info(record) else {
        return false;
    };
    SANS_KEYS
        .iter()
        .filter_map(|key| info.get(*key))
        .filter_map(Value::as_array)
        .any(|sans| sans.iter().any(|san| san.as_str() == Some(domain)))
}

/// First record in list order whose main domain or SAN list covers `domain`
fn find_record<'a>(records: &'a [Value], domain: &str) -> Option<&'a Value> {
    records
        .iter()
        .find(|record| main_matches(record, domain) || san_matches(record, domain))
}

/// Extract the certificate for `domain` from a raw store document.
///
/// # Errors
///
/// [`ExtractError::Parse`] when `document` is not JSON,
/// [`ExtractError::MalformedRecord`] when the matching record has no
/// usable key or certificate.
pub fn extract(document: &[u8], domain: &DomainName) -> Result<Extraction, ExtractError> {
    let value: Value = serde_json::from_slice(document)?;

    let Some(object) = value.as_object() else {
        debug!("Certificate store document is not a JSON object");
        return Ok(Extraction::NotFound);
    };

    let Some(records) = locate_records(object) else {
        debug!("No certificates found in certificate store document");
        return Ok(Extraction::NotFound);
    };

    let Some(record) = find_record(records, domain.as_str()).and_then(Value::as_object) else {
        debug!(domain = %domain, records = records.len(), "No certificate found for domain");
        return Ok(Extraction::NotFound);
    };

    let private_key_pem =
        first_string(record, &KEY_KEYS).ok_or_else(|| ExtractError::MalformedRecord {
            domain: domain.to_string(),
            field: "key",
        })?;
    let certificate_chain_pem = first_string(record, &CERTIFICATE_KEYS).ok_or_else(|| {
        ExtractError::MalformedRecord {
            domain: domain.to_string(),
            field: "certificate",
        }
    })?;

    Ok(Extraction::Found(DomainCertificate {
        domain: domain.clone(),
        private_key_pem: private_key_pem.to_string(),
        certificate_chain_pem: certificate_chain_pem.to_string(),
    }))
}
