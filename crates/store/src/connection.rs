//! Connection with staged, deferred-commit transactions
//!
//! A connection starts in auto-commit mode: every mutation applies to the
//! shared store immediately. `begin` switches to deferred mode: mutations
//! stage into a connection-local overlay (read-your-writes), and `commit`
//! replays the staged operations against the shared store under one write
//! lock, swapping the result in only when every operation re-validates.
//! Other connections never see uncommitted staging.

use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::query::{Page, Query};
use folio_core::traits::{Isolation, SearchResult, StoreConnection};
use folio_core::types::ResourceType;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::memory::{create_in, delete_in, update_in, ChainKey, Shared};

/// A staged mutation, replayed in order at commit
#[derive(Debug, Clone)]
enum StagedOp {
    Create { doc: Document, id: Uuid },
    Update { doc: Document, fence: u64 },
    Delete { resource_type: ResourceType, id: Uuid },
}

/// Connection-local view of one identity while a transaction is open
#[derive(Debug, Clone)]
struct OverlayEntry {
    /// Version the overlay head would take on commit
    version: u64,
    /// Live staged document, None when staged as deleted
    doc: Option<Document>,
    /// Last live state before a staged delete
    last_live: Option<Document>,
}

#[derive(Debug, Default)]
struct Txn {
    ops: Vec<StagedOp>,
    overlay: BTreeMap<ChainKey, OverlayEntry>,
}

/// Connection to a [`crate::MemoryStore`]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    txn: Option<Txn>,
}

impl MemoryConnection {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared, txn: None }
    }

    /// Merged view of one identity: overlay wins over the base store
    ///
    /// Returns (current live doc, deleted flag, next version).
    fn merged(
        &self,
        resource_type: &ResourceType,
        id: Uuid,
    ) -> (Option<Document>, bool, u64) {
        let key = (resource_type.clone(), id);
        if let Some(txn) = &self.txn {
            if let Some(entry) = txn.overlay.get(&key) {
                return (entry.doc.clone(), entry.doc.is_none(), entry.version + 1);
            }
        }
        let chains = self.shared.chains.read();
        match chains.get(&key) {
            Some(chain) => (
                chain.current().cloned(),
                chain.is_deleted(),
                chain.next_version(),
            ),
            None => (None, false, 1),
        }
    }

    fn overlay_insert(&mut self, key: ChainKey, entry: OverlayEntry) {
        if let Some(txn) = &mut self.txn {
            txn.overlay.insert(key, entry);
        }
    }

    /// All live documents of a type in the merged view, id-ordered
    fn live_documents(&self, resource_type: &ResourceType) -> Vec<Document> {
        let chains = self.shared.chains.read();
        let mut docs: BTreeMap<Uuid, Document> = chains
            .iter()
            .filter(|((rt, _), _)| rt == resource_type)
            .filter_map(|((_, id), chain)| chain.current().map(|d| (*id, d.clone())))
            .collect();
        if let Some(txn) = &self.txn {
            for ((rt, id), entry) in &txn.overlay {
                if rt != resource_type {
                    continue;
                }
                match &entry.doc {
                    Some(doc) => {
                        docs.insert(*id, doc.clone());
                    }
                    None => {
                        docs.remove(id);
                    }
                }
            }
        }
        docs.into_values().collect()
    }

    /// Follow an `_include` path on each match and collect the targets
    fn collect_includes(&self, matches: &[Document], path: &str) -> Vec<Document> {
        let mut includes: Vec<Document> = Vec::new();
        for doc in matches {
            let Some(slot) = value_at_path(&doc.body, path) else {
                continue;
            };
            let Some(raw) = slot.get("reference").and_then(Value::as_str) else {
                continue;
            };
            let Some((type_part, id_part)) = raw.split_once('/') else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(id_part) else {
                continue;
            };
            let rt = ResourceType::new(type_part);
            let (target, _, _) = self.merged(&rt, id);
            if let Some(target) = target {
                if !includes.iter().any(|d| d.id == target.id) {
                    includes.push(target);
                }
            }
        }
        includes
    }
}

impl StoreConnection for MemoryConnection {
    fn begin(&mut self, isolation: Isolation) -> FolioResult<()> {
        if self.txn.is_some() {
            return Err(FolioError::Storage("transaction already open".to_string()));
        }
        debug!(target: "folio::store", ?isolation, "transaction started");
        self.txn = Some(Txn::default());
        Ok(())
    }

    fn commit(&mut self) -> FolioResult<()> {
        let Some(txn) = self.txn.take() else {
            return Ok(());
        };
        let mut chains = self.shared.chains.write();
        // replay against a copy; swap in only if every op re-validates
        let mut staged = chains.clone();
        for op in &txn.ops {
            let result = match op {
                StagedOp::Create { doc, id } => create_in(&mut staged, doc, *id).map(|_| ()),
                StagedOp::Update { doc, fence } => {
                    update_in(&mut staged, doc, Some(*fence)).map(|_| ())
                }
                StagedOp::Delete { resource_type, id } => {
                    delete_in(&mut staged, resource_type, *id).map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!(target: "folio::store", error = %e, "commit validation failed");
                return Err(e);
            }
        }
        *chains = staged;
        debug!(target: "folio::store", ops = txn.ops.len(), "transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> FolioResult<()> {
        if let Some(txn) = self.txn.take() {
            debug!(target: "folio::store", ops = txn.ops.len(), "transaction rolled back");
        }
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.txn.is_none()
    }

    fn create_with_id(&mut self, doc: &Document, id: Uuid) -> FolioResult<Document> {
        if self.txn.is_none() {
            return create_in(&mut self.shared.chains.write(), doc, id);
        }
        let (current, _, next_version) = self.merged(&doc.resource_type, id);
        if current.is_some() {
            return Err(FolioError::Storage(format!(
                "id {id} already in use for {}",
                doc.resource_type
            )));
        }
        let mut stored = doc.clone();
        stored.set_assigned_id(id);
        stored.version = next_version;
        stored.last_updated = Some(chrono::Utc::now());
        let key = (doc.resource_type.clone(), id);
        self.overlay_insert(
            key,
            OverlayEntry {
                version: stored.version,
                doc: Some(stored.clone()),
                last_live: None,
            },
        );
        if let Some(txn) = &mut self.txn {
            txn.ops.push(StagedOp::Create {
                doc: doc.clone(),
                id,
            });
        }
        Ok(stored)
    }

    fn read(&self, resource_type: &ResourceType, id: Uuid) -> FolioResult<Option<Document>> {
        let (current, deleted, _) = self.merged(resource_type, id);
        match (current, deleted) {
            (Some(doc), _) => Ok(Some(doc)),
            (None, true) => Err(FolioError::Gone {
                resource_type: resource_type.clone(),
                id,
            }),
            (None, false) => Ok(None),
        }
    }

    fn read_version(
        &self,
        resource_type: &ResourceType,
        id: Uuid,
        version: u64,
    ) -> FolioResult<Option<Document>> {
        let key = (resource_type.clone(), id);
        if let Some(txn) = &self.txn {
            if let Some(entry) = txn.overlay.get(&key) {
                if let Some(doc) = &entry.doc {
                    if doc.version == version {
                        return Ok(Some(doc.clone()));
                    }
                }
            }
        }
        let chains = self.shared.chains.read();
        Ok(chains.get(&key).and_then(|chain| {
            chain
                .entries
                .iter()
                .find(|e| e.version == version)
                .and_then(|e| e.doc.clone())
        }))
    }

    fn read_including_deleted(
        &self,
        resource_type: &ResourceType,
        id: Uuid,
    ) -> FolioResult<Option<Document>> {
        let key = (resource_type.clone(), id);
        if let Some(txn) = &self.txn {
            if let Some(entry) = txn.overlay.get(&key) {
                return Ok(entry.doc.clone().or_else(|| entry.last_live.clone()));
            }
        }
        let chains = self.shared.chains.read();
        Ok(chains.get(&key).and_then(|c| c.last_live().cloned()))
    }

    fn update(&mut self, doc: &Document, expected_version: Option<u64>) -> FolioResult<Document> {
        if self.txn.is_none() {
            return update_in(&mut self.shared.chains.write(), doc, expected_version);
        }
        let id = doc.id.ok_or_else(|| {
            FolioError::Storage("update requires a document with an assigned id".to_string())
        })?;
        let (current, deleted, next_version) = self.merged(&doc.resource_type, id);
        let current = match (current, deleted) {
            (Some(doc), _) => doc,
            (None, true) => {
                return Err(FolioError::Gone {
                    resource_type: doc.resource_type.clone(),
                    id,
                })
            }
            (None, false) => {
                return Err(FolioError::NotFound {
                    resource_type: doc.resource_type.clone(),
                    id,
                })
            }
        };
        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(FolioError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }
        let mut stored = doc.clone();
        stored.set_assigned_id(id);
        stored.version = next_version;
        stored.last_updated = Some(chrono::Utc::now());
        let key = (doc.resource_type.clone(), id);
        self.overlay_insert(
            key,
            OverlayEntry {
                version: stored.version,
                doc: Some(stored.clone()),
                last_live: None,
            },
        );
        if let Some(txn) = &mut self.txn {
            txn.ops.push(StagedOp::Update {
                doc: doc.clone(),
                fence: current.version,
            });
        }
        Ok(stored)
    }

    fn delete(&mut self, resource_type: &ResourceType, id: Uuid) -> FolioResult<bool> {
        if self.txn.is_none() {
            return delete_in(&mut self.shared.chains.write(), resource_type, id);
        }
        let (current, _, next_version) = self.merged(resource_type, id);
        let Some(last_live) = current else {
            return Ok(false);
        };
        let key = (resource_type.clone(), id);
        self.overlay_insert(
            key,
            OverlayEntry {
                version: next_version,
                doc: None,
                last_live: Some(last_live),
            },
        );
        if let Some(txn) = &mut self.txn {
            txn.ops.push(StagedOp::Delete {
                resource_type: resource_type.clone(),
                id,
            });
        }
        Ok(true)
    }

    fn search(&self, query: &Query, page: Page) -> FolioResult<SearchResult> {
        let include_path = query
            .parameters
            .iter()
            .find(|(k, _)| k == "_include")
            .map(|(_, v)| v.clone());

        let candidates = self.live_documents(&query.resource_type);
        let matches: Vec<Document> = candidates
            .into_iter()
            .filter(|doc| {
                query
                    .parameters
                    .iter()
                    .filter(|(k, _)| !k.starts_with('_'))
                    .all(|(k, v)| matches_parameter(&doc.body, k, v))
            })
            .collect();

        let total = matches.len();
        let pageed: Vec<Document> = matches
            .into_iter()
            .skip(page.offset)
            .take(page.count)
            .collect();
        let includes = include_path
            .map(|path| self.collect_includes(&pageed, &path))
            .unwrap_or_default();

        Ok(SearchResult {
            total,
            matches: pageed,
            includes,
        })
    }

    fn unsupported_parameters(&self, query: &Query) -> Vec<String> {
        query
            .parameters
            .iter()
            .filter(|(k, _)| k.starts_with('_') && k != "_include")
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Resolve a dotted path inside a body
fn value_at_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Match one criteria parameter against a body
///
/// `system|value` criteria match identifier-shaped objects; everything
/// else compares the value at the dotted path textually. An array at the
/// path matches when any element does.
fn matches_parameter(body: &Value, key: &str, expected: &str) -> bool {
    let Some(found) = value_at_path(body, key) else {
        return false;
    };
    matches_value(found, expected)
}

fn matches_value(found: &Value, expected: &str) -> bool {
    match found {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        Value::Array(items) => items.iter().any(|item| matches_value(item, expected)),
        Value::Object(map) => {
            let Some((system, value)) = expected.split_once('|') else {
                return false;
            };
            map.get("system").and_then(Value::as_str) == Some(system)
                && map.get("value").and_then(Value::as_str) == Some(value)
        }
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use folio_core::traits::DocumentStore;
    use serde_json::json;

    fn task(body: Value) -> Document {
        Document::new(ResourceType::new("Task"), body)
    }

    #[test]
    fn test_auto_commit_is_immediately_visible() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let b = store.connection();
        let id = Uuid::new_v4();
        a.create_with_id(&task(json!({"status": "draft"})), id)
            .unwrap();
        assert!(b.read(&ResourceType::new("Task"), id).unwrap().is_some());
    }

    #[test]
    fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let b = store.connection();
        let rt = ResourceType::new("Task");
        let id = Uuid::new_v4();

        a.begin(Isolation::RepeatableRead).unwrap();
        a.create_with_id(&task(json!({})), id).unwrap();

        // read-your-writes on a, invisible on b
        assert!(a.read(&rt, id).unwrap().is_some());
        assert!(b.read(&rt, id).unwrap().is_none());

        a.commit().unwrap();
        assert!(b.read(&rt, id).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_staging() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let rt = ResourceType::new("Task");
        let id = Uuid::new_v4();

        a.begin(Isolation::RepeatableRead).unwrap();
        a.create_with_id(&task(json!({})), id).unwrap();
        a.rollback().unwrap();

        assert!(a.auto_commit());
        assert!(a.read(&rt, id).unwrap().is_none());
    }

    #[test]
    fn test_chained_updates_in_one_transaction() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let id = Uuid::new_v4();

        a.begin(Isolation::RepeatableRead).unwrap();
        let v1 = a.create_with_id(&task(json!({"n": 1})), id).unwrap();
        assert_eq!(v1.version, 1);
        let v2 = a.update(&v1, Some(1)).unwrap();
        assert_eq!(v2.version, 2);
        let v3 = a.update(&v2, Some(2)).unwrap();
        assert_eq!(v3.version, 3);
        a.commit().unwrap();

        let read = a.read(&ResourceType::new("Task"), id).unwrap().unwrap();
        assert_eq!(read.version, 3);
    }

    #[test]
    fn test_commit_conflict_on_concurrent_update() {
        let store = MemoryStore::new();
        let mut setup = store.connection();
        let id = Uuid::new_v4();
        let v1 = setup.create_with_id(&task(json!({"n": 0})), id).unwrap();

        let mut a = store.connection();
        a.begin(Isolation::RepeatableRead).unwrap();
        a.update(&v1, Some(1)).unwrap();

        // concurrent auto-commit update wins
        setup.update(&v1, Some(1)).unwrap();

        assert!(matches!(
            a.commit(),
            Err(FolioError::VersionConflict { .. })
        ));
        // losing transaction left no trace
        let read = setup.read(&ResourceType::new("Task"), id).unwrap().unwrap();
        assert_eq!(read.version, 2);
    }

    #[test]
    fn test_read_deleted_is_gone() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let rt = ResourceType::new("Task");
        let id = Uuid::new_v4();
        a.create_with_id(&task(json!({})), id).unwrap();
        a.delete(&rt, id).unwrap();

        assert!(matches!(a.read(&rt, id), Err(FolioError::Gone { .. })));
        assert!(a.read_including_deleted(&rt, id).unwrap().is_some());
    }

    #[test]
    fn test_search_overlay_and_paging() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        for i in 0..3 {
            a.create_with_id(&task(json!({"status": "draft", "n": i})), Uuid::new_v4())
                .unwrap();
        }
        a.begin(Isolation::RepeatableRead).unwrap();
        a.create_with_id(&task(json!({"status": "draft", "n": 3})), Uuid::new_v4())
            .unwrap();

        let query = Query::parse(ResourceType::new("Task"), "status=draft");
        let result = a.search(&query, Page::default_count(2)).unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(result.matches.len(), 2);

        // another connection does not see the staged fourth document
        let b = store.connection();
        let result = b.search(&query, Page::default_count(10)).unwrap();
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_search_identifier_parameter() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        a.create_with_id(
            &task(json!({"identifier": {"system": "http://x", "value": "123"}})),
            Uuid::new_v4(),
        )
        .unwrap();
        let query = Query::parse(ResourceType::new("Task"), "identifier=http://x|123");
        assert_eq!(a.search(&query, Page::single()).unwrap().total, 1);
        let query = Query::parse(ResourceType::new("Task"), "identifier=http://x|999");
        assert_eq!(a.search(&query, Page::single()).unwrap().total, 0);
    }

    #[test]
    fn test_search_includes_referenced_documents() {
        let store = MemoryStore::new();
        let mut a = store.connection();
        let patient_id = Uuid::new_v4();
        a.create_with_id(
            &Document::new(ResourceType::new("Patient"), json!({"name": "x"})),
            patient_id,
        )
        .unwrap();
        a.create_with_id(
            &task(json!({"status": "draft",
                         "subject": {"reference": format!("Patient/{patient_id}")}})),
            Uuid::new_v4(),
        )
        .unwrap();

        let query = Query::parse(
            ResourceType::new("Task"),
            "status=draft&_include=subject",
        );
        let result = a.search(&query, Page::default_count(10)).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.includes.len(), 1);
        assert_eq!(result.includes[0].id, Some(patient_id));
    }

    #[test]
    fn test_unsupported_parameters() {
        let store = MemoryStore::new();
        let a = store.connection();
        let query = Query::parse(
            ResourceType::new("Task"),
            "_sort=status&status=draft&_include=subject",
        );
        assert_eq!(a.unsupported_parameters(&query), vec!["_sort".to_string()]);
    }
}
