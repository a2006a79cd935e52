//! Authorization gate with audit logging
//!
//! The policy trait answers allow/deny with a reason; this gate wraps it,
//! writes an audit record for every decision, and converts denials into
//! errors carrying the entry index.

use std::sync::Arc;

use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::traits::AuthorizationPolicy;
use folio_core::types::{Identity, ResourceType};
use tracing::info;

/// Policy wrapper that audits every decision
pub struct AuthorizationGate {
    policy: Arc<dyn AuthorizationPolicy>,
    identity: Identity,
}

impl AuthorizationGate {
    pub fn new(policy: Arc<dyn AuthorizationPolicy>, identity: Identity) -> Self {
        AuthorizationGate { policy, identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn decide(
        &self,
        index: usize,
        operation: &'static str,
        resource_type: &ResourceType,
        target: Option<&str>,
        reason: Option<String>,
    ) -> FolioResult<()> {
        match reason {
            Some(reason) => {
                info!(
                    target: "folio::audit",
                    index,
                    identity = %self.identity,
                    operation,
                    resource_type = %resource_type,
                    target,
                    reason,
                    "allowed"
                );
                Ok(())
            }
            None => {
                info!(
                    target: "folio::audit",
                    index,
                    identity = %self.identity,
                    operation,
                    resource_type = %resource_type,
                    target,
                    "denied"
                );
                Err(FolioError::AuthorizationDenied {
                    index,
                    operation,
                    resource_type: resource_type.clone(),
                })
            }
        }
    }

    pub fn check_create_allowed(&self, index: usize, new_doc: &Document) -> FolioResult<()> {
        let reason = self.policy.reason_create_allowed(&self.identity, new_doc);
        self.decide(index, "create", &new_doc.resource_type, None, reason)
    }

    pub fn check_read_allowed(&self, index: usize, existing: &Document) -> FolioResult<()> {
        let reason = self.policy.reason_read_allowed(&self.identity, existing);
        let location = existing.location();
        self.decide(
            index,
            "read",
            &existing.resource_type,
            location.as_deref(),
            reason,
        )
    }

    pub fn check_update_allowed(
        &self,
        index: usize,
        existing: &Document,
        new_doc: &Document,
    ) -> FolioResult<()> {
        let reason = self
            .policy
            .reason_update_allowed(&self.identity, existing, new_doc);
        let location = existing.location();
        self.decide(
            index,
            "update",
            &new_doc.resource_type,
            location.as_deref(),
            reason,
        )
    }

    pub fn check_delete_allowed(&self, index: usize, existing: &Document) -> FolioResult<()> {
        let reason = self.policy.reason_delete_allowed(&self.identity, existing);
        let location = existing.location();
        self.decide(
            index,
            "delete",
            &existing.resource_type,
            location.as_deref(),
            reason,
        )
    }

    pub fn check_search_allowed(
        &self,
        index: usize,
        resource_type: &ResourceType,
    ) -> FolioResult<()> {
        let reason = self
            .policy
            .reason_search_allowed(&self.identity, resource_type);
        self.decide(index, "search", resource_type, None, reason)
    }

    /// Whether the identity may read this document, without failing
    ///
    /// Used to filter included documents out of search results rather
    /// than fail the whole search.
    pub fn may_read(&self, doc: &Document) -> bool {
        self.policy.reason_read_allowed(&self.identity, doc).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::traits::AllowAll;
    use serde_json::json;

    struct DenyWrites;

    impl AuthorizationPolicy for DenyWrites {
        fn reason_create_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
            None
        }
        fn reason_read_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
            Some("read-only role".to_string())
        }
        fn reason_update_allowed(&self, _: &Identity, _: &Document, _: &Document) -> Option<String> {
            None
        }
        fn reason_delete_allowed(&self, _: &Identity, _: &Document) -> Option<String> {
            None
        }
        fn reason_search_allowed(&self, _: &Identity, _: &ResourceType) -> Option<String> {
            Some("read-only role".to_string())
        }
    }

    fn doc() -> Document {
        Document::new(ResourceType::new("Patient"), json!({"resourceType": "Patient"}))
    }

    #[test]
    fn test_allow_all_passes() {
        let gate = AuthorizationGate::new(Arc::new(AllowAll), Identity::new("tester"));
        assert!(gate.check_create_allowed(0, &doc()).is_ok());
        assert!(gate.check_search_allowed(1, &ResourceType::new("Task")).is_ok());
    }

    #[test]
    fn test_denial_carries_index_and_operation() {
        let gate = AuthorizationGate::new(Arc::new(DenyWrites), Identity::new("reader"));
        match gate.check_create_allowed(3, &doc()) {
            Err(FolioError::AuthorizationDenied {
                index, operation, ..
            }) => {
                assert_eq!(index, 3);
                assert_eq!(operation, "create");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(gate.check_read_allowed(0, &doc()).is_ok());
        assert!(gate.may_read(&doc()));
    }
}
