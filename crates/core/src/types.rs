//! Core types for the folio document store
//!
//! This module defines the foundational types:
//! - ResourceType: document type name ("Patient", "Task", ...)
//! - DocumentId: persistent (resource type, uuid) identity
//! - Identity: acting principal for authorization and audit
//! - Verb / BundleMode / PreferReturn / PreferHandling: request vocabulary

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix marking a temporary identifier (a placeholder for a document
/// that does not exist yet, cross-referenced within one bundle)
pub const TEMP_URN_PREFIX: &str = "urn:uuid:";

/// Name of a document type
///
/// Resource types partition the store; every document belongs to exactly
/// one type and ids are scoped per type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType(String);

impl ResourceType {
    /// Create a resource type from a name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The type name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Persistent identity of a document: (resource type, id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    /// Type the document belongs to
    pub resource_type: ResourceType,
    /// Unique id within the type
    pub id: Uuid,
}

impl DocumentId {
    /// Create a document id
    pub fn new(resource_type: ResourceType, id: Uuid) -> Self {
        Self { resource_type, id }
    }

    /// Mint a document id with a fresh random uuid
    pub fn fresh(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            id: Uuid::new_v4(),
        }
    }

    /// Relative location string, e.g. `Patient/0c3b...`
    pub fn relative_url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

/// Acting principal submitting a bundle
///
/// Authorization policy evaluation is external; the engine only needs a
/// stable name for audit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Principal name, included in every audit record
    pub name: String,
}

impl Identity {
    /// Create an identity
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Wire verb of a bundle entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Read or search
    Get,
    /// Existence check, result carries no body
    Head,
    /// Create (plain or conditional)
    Post,
    /// Update (by id or by condition)
    Put,
    /// Delete (by id or by condition)
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// Execution semantics of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleMode {
    /// Independent per-entry execution, partial success is normal
    Batch,
    /// Atomic execution, any failure rolls back all entries
    Transaction,
}

/// Client-requested response verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreferReturn {
    /// Status line and headers only
    #[default]
    Minimal,
    /// Full representation of the affected document
    Representation,
    /// Operation-outcome style body
    OperationOutcome,
}

/// How to handle unsupported search parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreferHandling {
    /// Drop unsupported parameters, note them in the result outcome
    #[default]
    Lenient,
    /// Fail the command on any unsupported parameter
    Strict,
}

/// Parse a `urn:uuid:...` string into its uuid
///
/// Returns None if the string does not carry the urn prefix or the
/// remainder is not a valid uuid.
pub fn parse_temp_urn(s: &str) -> Option<Uuid> {
    s.strip_prefix(TEMP_URN_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
}

/// Render a uuid as a temporary urn
pub fn temp_urn(id: Uuid) -> String {
    format!("{TEMP_URN_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_display() {
        let rt = ResourceType::new("Patient");
        assert_eq!(rt.to_string(), "Patient");
        assert_eq!(rt.as_str(), "Patient");
    }

    #[test]
    fn test_document_id_relative_url() {
        let id = Uuid::new_v4();
        let did = DocumentId::new(ResourceType::new("Task"), id);
        assert_eq!(did.relative_url(), format!("Task/{id}"));
        assert_eq!(did.to_string(), did.relative_url());
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = DocumentId::fresh(ResourceType::new("Task"));
        let b = DocumentId::fresh(ResourceType::new("Task"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_temp_urn_round_trip() {
        let id = Uuid::new_v4();
        let urn = temp_urn(id);
        assert!(urn.starts_with(TEMP_URN_PREFIX));
        assert_eq!(parse_temp_urn(&urn), Some(id));
    }

    #[test]
    fn test_parse_temp_urn_rejects_plain_ids() {
        assert_eq!(parse_temp_urn("Patient/123"), None);
        assert_eq!(parse_temp_urn("urn:uuid:not-a-uuid"), None);
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(Verb::Get.to_string(), "GET");
        assert_eq!(Verb::Delete.to_string(), "DELETE");
    }
}
