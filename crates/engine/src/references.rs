//! Reference resolution between bundle entries and stored documents
//!
//! Resolution runs in two passes. The first rewrites temporary urns
//! through the id translation table and conditional reference queries
//! through a live search, before the document is persisted. The second
//! resolves logical (identifier-based) references after persistence.
//! Literal references are left intact; the check-references command
//! verifies them separately.

use folio_core::document::{
    classify_reference_object, visit_reference_objects_mut, Document, RefValue,
};
use folio_core::error::{FolioError, FolioResult};
use folio_core::query::{Page, Query};
use folio_core::traits::StoreConnection;
use folio_core::types::{temp_urn, DocumentId, ResourceType};
use serde_json::Value;
use tracing::debug;

use crate::ids::IdTranslation;

fn unresolvable(index: usize, reference: impl Into<String>) -> FolioError {
    FolioError::ReferenceUnresolvable {
        index,
        reference: reference.into(),
    }
}

/// Resolve a conditional reference query to exactly one document id
fn search_single(
    index: usize,
    conn: &dyn StoreConnection,
    resource_type: &ResourceType,
    criteria: &str,
) -> FolioResult<DocumentId> {
    let query = Query::parse(resource_type.clone(), criteria);
    let unsupported = conn.unsupported_parameters(&query);
    if !unsupported.is_empty() {
        return Err(unresolvable(
            index,
            format!(
                "{resource_type}?{criteria} uses unsupported parameters: {}",
                unsupported.join(", ")
            ),
        ));
    }
    let result = conn.search(&query, Page::single())?;
    match (result.total, result.matches.first()) {
        (1, Some(found)) => match found.id {
            Some(id) => Ok(DocumentId::new(found.resource_type.clone(), id)),
            None => Err(unresolvable(index, format!("{resource_type}?{criteria}"))),
        },
        (n, _) => Err(unresolvable(
            index,
            format!("{resource_type}?{criteria} matched {n} documents"),
        )),
    }
}

/// Rewrite temporary and conditional references before persistence
pub fn resolve_first_pass(
    index: usize,
    doc: &mut Document,
    ids: &IdTranslation,
    conn: &dyn StoreConnection,
) -> FolioResult<()> {
    visit_reference_objects_mut(&mut doc.body, &mut |map| {
        let Some(ref_value) = classify_reference_object(map) else {
            return Ok(());
        };
        match ref_value {
            RefValue::Temporary(temp) => {
                let resolved = ids
                    .resolve_temp(temp)
                    .ok_or_else(|| unresolvable(index, temp_urn(temp)))?;
                debug!(
                    target: "folio::cmd",
                    index,
                    temp = %temp,
                    resolved = %resolved,
                    "resolved temporary reference"
                );
                map.insert(
                    "reference".to_string(),
                    Value::String(resolved.relative_url()),
                );
            }
            RefValue::Conditional {
                resource_type,
                criteria,
            } => {
                let resolved = search_single(index, conn, &resource_type, &criteria)?;
                debug!(
                    target: "folio::cmd",
                    index,
                    criteria = %criteria,
                    resolved = %resolved,
                    "resolved conditional reference"
                );
                map.insert(
                    "reference".to_string(),
                    Value::String(resolved.relative_url()),
                );
            }
            RefValue::Literal { .. } | RefValue::Logical { .. } | RefValue::Opaque(_) => {}
        }
        Ok(())
    })
}

/// Resolve identifier-based references after persistence
///
/// The logical identifier stays in place; a resolved `reference` string
/// is added next to it.
pub fn resolve_logical(
    index: usize,
    doc: &mut Document,
    conn: &dyn StoreConnection,
) -> FolioResult<()> {
    visit_reference_objects_mut(&mut doc.body, &mut |map| {
        let Some(RefValue::Logical {
            resource_type,
            system,
            value,
        }) = classify_reference_object(map)
        else {
            return Ok(());
        };
        let criteria = format!("identifier={system}|{value}");
        let resolved = search_single(index, conn, &resource_type, &criteria)?;
        debug!(
            target: "folio::cmd",
            index,
            system = %system,
            value = %value,
            resolved = %resolved,
            "resolved logical reference"
        );
        map.insert(
            "reference".to_string(),
            Value::String(resolved.relative_url()),
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::traits::DocumentStore;
    use folio_store::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    fn task_with_ref(reference: &str) -> Document {
        Document::new(
            ResourceType::new("Task"),
            json!({
                "resourceType": "Task",
                "requester": {"reference": reference},
            }),
        )
    }

    #[test]
    fn test_temporary_reference_resolved_through_table() {
        let store = MemoryStore::new();
        let conn = store.connection();
        let mut ids = IdTranslation::new();
        let temp = Uuid::new_v4();
        let target = DocumentId::fresh(ResourceType::new("Patient"));
        ids.register(&temp_urn(temp), target.clone()).unwrap();

        let mut doc = task_with_ref(&temp_urn(temp));
        resolve_first_pass(0, &mut doc, &ids, conn.as_ref()).unwrap();
        assert_eq!(
            doc.body["requester"]["reference"],
            json!(target.relative_url())
        );
    }

    #[test]
    fn test_unregistered_temporary_reference_fails() {
        let store = MemoryStore::new();
        let conn = store.connection();
        let ids = IdTranslation::new();
        let mut doc = task_with_ref(&temp_urn(Uuid::new_v4()));
        let err = resolve_first_pass(2, &mut doc, &ids, conn.as_ref()).unwrap_err();
        match err {
            FolioError::ReferenceUnresolvable { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_conditional_reference_resolved_by_search() {
        let store = MemoryStore::new();
        let mut conn = store.connection();
        let patient = Document::new(
            ResourceType::new("Patient"),
            json!({"resourceType": "Patient", "name": "smith"}),
        );
        let id = Uuid::new_v4();
        conn.create_with_id(&patient, id).unwrap();

        let mut doc = task_with_ref("Patient?name=smith");
        resolve_first_pass(0, &mut doc, &ids_empty(), conn.as_ref()).unwrap();
        assert_eq!(
            doc.body["requester"]["reference"],
            json!(format!("Patient/{id}"))
        );
    }

    #[test]
    fn test_conditional_reference_zero_matches_fails() {
        let store = MemoryStore::new();
        let conn = store.connection();
        let mut doc = task_with_ref("Patient?name=nobody");
        assert!(resolve_first_pass(0, &mut doc, &ids_empty(), conn.as_ref()).is_err());
    }

    #[test]
    fn test_logical_reference_resolved_after_persistence() {
        let store = MemoryStore::new();
        let mut conn = store.connection();
        let patient = Document::new(
            ResourceType::new("Patient"),
            json!({
                "resourceType": "Patient",
                "identifier": {"system": "http://example.com/sid", "value": "p-1"},
            }),
        );
        let id = Uuid::new_v4();
        conn.create_with_id(&patient, id).unwrap();

        let mut doc = Document::new(
            ResourceType::new("Task"),
            json!({
                "resourceType": "Task",
                "requester": {
                    "type": "Patient",
                    "identifier": {"system": "http://example.com/sid", "value": "p-1"},
                },
            }),
        );
        resolve_logical(0, &mut doc, conn.as_ref()).unwrap();
        assert_eq!(
            doc.body["requester"]["reference"],
            json!(format!("Patient/{id}"))
        );
        // the identifier stays alongside the resolved reference
        assert_eq!(doc.body["requester"]["identifier"]["value"], json!("p-1"));
    }

    fn ids_empty() -> IdTranslation {
        IdTranslation::new()
    }
}
