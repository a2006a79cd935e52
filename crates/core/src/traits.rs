//! Collaborator traits consumed by the bundle engine
//!
//! These traits are the seams to external collaborators: the storage
//! driver, the schema/profile validator, the authorization policy, and
//! the event bus. The engine depends only on these contracts; the
//! `folio-store` crate ships the default in-memory store.

use crate::document::Document;
use crate::error::FolioResult;
use crate::event::Event;
use crate::query::{Page, Query};
use crate::types::{Identity, ResourceType};
use uuid::Uuid;

/// Storage isolation level for a connection
///
/// Elevated isolation is requested for the whole lifetime of a
/// transaction bundle containing at least one mutating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Per-command auto-commit; reads see committed state
    ReadCommitted,
    /// Deferred commit; the connection's reads and writes stage together
    /// and apply atomically on commit
    RepeatableRead,
}

/// Result of a search: overall total plus the requested page
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// Total matches for the criteria, independent of paging
    pub total: usize,
    /// The requested page of primary matches
    pub matches: Vec<Document>,
    /// Server-included documents referenced by the matches (not primary
    /// matches themselves); subject to read-authorization filtering
    pub includes: Vec<Document>,
}

/// A document store that hands out per-bundle connections
pub trait DocumentStore: Send + Sync {
    /// Open a new logical connection
    ///
    /// Each bundle runs on exactly one connection for its whole lifetime.
    fn connection(&self) -> Box<dyn StoreConnection>;
}

/// One logical storage connection with version-fenced CRUD and search
///
/// Connections start in auto-commit read-committed mode. `begin` switches
/// to deferred-commit mode; `commit`/`rollback` end it.
pub trait StoreConnection {
    /// Enter deferred-commit mode at the given isolation
    fn begin(&mut self, isolation: Isolation) -> FolioResult<()>;

    /// Apply all staged mutations atomically
    fn commit(&mut self) -> FolioResult<()>;

    /// Discard all staged mutations
    fn rollback(&mut self) -> FolioResult<()>;

    /// True while no transaction is open
    fn auto_commit(&self) -> bool;

    /// Create a document under a caller-chosen id, version 1
    ///
    /// Fails with `Storage` if the id is already taken.
    fn create_with_id(&mut self, doc: &Document, id: Uuid) -> FolioResult<Document>;

    /// Read the current version of a document
    ///
    /// `Ok(None)` if it never existed, `Err(Gone)` if it was deleted.
    fn read(&self, resource_type: &ResourceType, id: Uuid) -> FolioResult<Option<Document>>;

    /// Read a specific version of a document
    fn read_version(
        &self,
        resource_type: &ResourceType,
        id: Uuid,
        version: u64,
    ) -> FolioResult<Option<Document>>;

    /// Read the last live version even if the document was deleted
    fn read_including_deleted(
        &self,
        resource_type: &ResourceType,
        id: Uuid,
    ) -> FolioResult<Option<Document>>;

    /// Update a document, optionally fencing on the expected current version
    ///
    /// Fails with `NotFound` if the target does not exist and with
    /// `VersionConflict` if `expected_version` does not match.
    fn update(&mut self, doc: &Document, expected_version: Option<u64>) -> FolioResult<Document>;

    /// Delete a document; `Ok(false)` when it was already absent/deleted
    fn delete(&mut self, resource_type: &ResourceType, id: Uuid) -> FolioResult<bool>;

    /// Run match criteria, returning the total and one page
    fn search(&self, query: &Query, page: Page) -> FolioResult<SearchResult>;

    /// Parameters of the query this connection's store cannot interpret
    ///
    /// Checked before conditional operations (always fatal there) and
    /// before searches (handling decided by the request's prefer-handling).
    fn unsupported_parameters(&self, query: &Query) -> Vec<String>;
}

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational note, never blocks
    Information,
    /// Non-blocking warning
    Warning,
    /// Blocks the write
    Error,
    /// Blocks the write
    Fatal,
}

impl Severity {
    /// True when an issue of this severity blocks a write
    pub fn blocks(&self) -> bool {
        matches!(self, Severity::Error | Severity::Fatal)
    }
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// How severe the finding is
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
}

/// Schema/profile validator, consumed as an opaque service
pub trait Validator: Send + Sync {
    /// Validate a document about to be written
    ///
    /// `Error`/`Fatal` issues block the write; the rest are carried into
    /// the operation outcome.
    fn validate(&self, doc: &Document) -> Vec<ValidationIssue>;
}

/// Per-operation authorization policy, consumed as a yes/no decision
/// with a reason string
///
/// `Some(reason)` allows the operation and the reason goes into the audit
/// record; `None` denies it.
pub trait AuthorizationPolicy: Send + Sync {
    /// May `identity` create `new_doc`?
    fn reason_create_allowed(&self, identity: &Identity, new_doc: &Document) -> Option<String>;

    /// May `identity` read `existing`?
    fn reason_read_allowed(&self, identity: &Identity, existing: &Document) -> Option<String>;

    /// May `identity` replace `existing` with `new_doc`?
    fn reason_update_allowed(
        &self,
        identity: &Identity,
        existing: &Document,
        new_doc: &Document,
    ) -> Option<String>;

    /// May `identity` delete `existing`?
    fn reason_delete_allowed(&self, identity: &Identity, existing: &Document) -> Option<String>;

    /// May `identity` search `resource_type`?
    fn reason_search_allowed(&self, identity: &Identity, resource_type: &ResourceType)
        -> Option<String>;
}

/// Event bus endpoint, invoked once per committed transaction bundle and
/// once per successful batch entry
pub trait EventSink: Send + Sync {
    /// Deliver a batch of events
    fn handle_events(&self, events: Vec<Event>) -> FolioResult<()>;
}

/// Policy that allows everything; useful as a default and in tests
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AuthorizationPolicy for AllowAll {
    fn reason_create_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        Some("allow-all policy".to_string())
    }

    fn reason_read_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        Some("allow-all policy".to_string())
    }

    fn reason_update_allowed(&self, _: &Identity, _: &Document, _: &Document) -> Option<String> {
        Some("allow-all policy".to_string())
    }

    fn reason_delete_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
        Some("allow-all policy".to_string())
    }

    fn reason_search_allowed(&self, _: &Identity, _: &ResourceType) -> Option<String> {
        Some("allow-all policy".to_string())
    }
}

/// Validator that accepts every document; useful as a default and in tests
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _: &Document) -> Vec<ValidationIssue> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_blocks() {
        assert!(Severity::Error.blocks());
        assert!(Severity::Fatal.blocks());
        assert!(!Severity::Warning.blocks());
        assert!(!Severity::Information.blocks());
    }

    #[test]
    fn test_allow_all_gives_reasons() {
        let identity = Identity::new("tester");
        let doc = Document::new(ResourceType::new("Task"), json!({}));
        assert!(AllowAll.reason_create_allowed(&identity, &doc).is_some());
        assert!(AllowAll
            .reason_search_allowed(&identity, &doc.resource_type)
            .is_some());
    }

    #[test]
    fn test_accept_all_reports_nothing() {
        let doc = Document::new(ResourceType::new("Task"), json!({}));
        assert!(AcceptAll.validate(&doc).is_empty());
    }
}
