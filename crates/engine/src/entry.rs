//! Bundle entries: the immutable input units of a request
//!
//! A [`Bundle`] carries ordered [`BundleEntry`] values. Each entry names a
//! verb and a target url, optionally a body and conditional headers. The
//! entry is immutable once the request is parsed; commands only read it.

use folio_core::error::{FolioError, FolioResult};
use folio_core::query::Query;
use folio_core::types::{parse_temp_urn, BundleMode, ResourceType, Verb, TEMP_URN_PREFIX};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A client-submitted collection of operations
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Batch or Transaction semantics
    pub mode: BundleMode,
    /// Operations in submission order
    pub entries: Vec<BundleEntry>,
}

/// One operation descriptor
#[derive(Debug, Clone, Default)]
pub struct BundleEntry {
    /// Entry identity within the request; a `urn:uuid:` value for
    /// creates (the temporary identifier other entries reference)
    pub full_url: Option<String>,
    /// Document body, required for POST/PUT, forbidden otherwise
    pub resource: Option<Value>,
    /// The request part
    pub request: EntryRequest,
}

/// Request part of an entry
#[derive(Debug, Clone, Default)]
pub struct EntryRequest {
    /// Wire verb
    pub verb: Option<Verb>,
    /// Target: `Type`, `Type/id`, `Type/id/_history/v`, or `Type?query`
    pub url: String,
    /// Conditional-create criteria (`k=v&...`)
    pub if_none_exist: Option<String>,
    /// Version precondition for updates, as a weak ETag
    pub if_match: Option<String>,
    /// ETag precondition for reads
    pub if_none_match: Option<String>,
    /// Timestamp precondition for reads
    pub if_modified_since: Option<DateTime<Utc>>,
}

/// Parsed target url of an entry
#[derive(Debug, Clone, PartialEq)]
pub enum RequestTarget {
    /// Whole type, e.g. `Patient` (create)
    Type(ResourceType),
    /// One instance, e.g. `Patient/0c3b...`
    TypeId(ResourceType, Uuid),
    /// One version of one instance, `Patient/0c3b.../_history/2`
    TypeIdVersion(ResourceType, Uuid, u64),
    /// Condition, e.g. `Patient?name=smith`
    TypeQuery(Query),
}

impl RequestTarget {
    /// Parse an entry's request url
    ///
    /// A leading `urn:uuid:` url is the caller's concern (translate it
    /// through the id table first); this only accepts server-relative
    /// targets.
    pub fn parse(index: usize, url: &str) -> FolioResult<Self> {
        let bad = |message: String| FolioError::BadRequest { index, message };

        if url.is_empty() {
            return Err(bad("empty request url".to_string()));
        }
        if url.starts_with(TEMP_URN_PREFIX) {
            return Err(bad(format!("unresolved temporary url '{url}'")));
        }
        if let Some((path, criteria)) = url.split_once('?') {
            if path.is_empty() || path.contains('/') {
                return Err(bad(format!("unsupported conditional url '{url}'")));
            }
            return Ok(RequestTarget::TypeQuery(Query::parse(
                ResourceType::new(path),
                criteria,
            )));
        }
        let segments: Vec<&str> = url.split('/').collect();
        match segments.as_slice() {
            [type_part] => Ok(RequestTarget::Type(ResourceType::new(*type_part))),
            [type_part, id_part] => {
                let id = Uuid::parse_str(id_part)
                    .map_err(|_| bad(format!("'{id_part}' is not a valid id")))?;
                Ok(RequestTarget::TypeId(ResourceType::new(*type_part), id))
            }
            [type_part, id_part, "_history", version_part] => {
                let id = Uuid::parse_str(id_part)
                    .map_err(|_| bad(format!("'{id_part}' is not a valid id")))?;
                let version = version_part
                    .parse::<u64>()
                    .map_err(|_| bad(format!("'{version_part}' is not a valid version")))?;
                Ok(RequestTarget::TypeIdVersion(
                    ResourceType::new(*type_part),
                    id,
                    version,
                ))
            }
            _ => Err(bad(format!("unsupported request url '{url}'"))),
        }
    }

    /// The resource type the target names
    pub fn resource_type(&self) -> &ResourceType {
        match self {
            RequestTarget::Type(t)
            | RequestTarget::TypeId(t, _)
            | RequestTarget::TypeIdVersion(t, _, _) => t,
            RequestTarget::TypeQuery(q) => &q.resource_type,
        }
    }
}

impl BundleEntry {
    /// The entry's temporary identifier, when its full-url is one
    pub fn temp_id(&self) -> Option<Uuid> {
        self.full_url.as_deref().and_then(parse_temp_urn)
    }
}

/// Parse a weak or strong ETag value into a version number
pub fn parse_etag(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s.strip_prefix("W/").unwrap_or(s);
    let s = s.strip_prefix('"')?.strip_suffix('"')?;
    s.parse().ok()
}
