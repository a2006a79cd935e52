//! In-memory versioned document store
//!
//! Documents live in per-identity version chains behind a single RwLock.
//! Deleting appends a tombstone version rather than removing the chain,
//! so history survives and deleted identities read as `Gone`.
//!
//! Connections (see [`crate::connection`]) stage mutations locally and
//! replay them here on commit. Replay runs against a copy of the chain
//! map under the write lock and swaps it in only when every staged
//! operation re-validates, so a commit is all-or-nothing and a
//! concurrently committed bundle surfaces as `VersionConflict`.

use chrono::Utc;
use folio_core::document::Document;
use folio_core::error::{FolioError, FolioResult};
use folio_core::traits::DocumentStore;
use folio_core::types::ResourceType;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::connection::MemoryConnection;

/// One version of a document, or a tombstone
#[derive(Debug, Clone)]
pub(crate) struct VersionEntry {
    /// Version number; tombstones consume a version too
    pub version: u64,
    /// None marks a tombstone
    pub doc: Option<Document>,
}

/// Full history of one document identity, oldest first
#[derive(Debug, Clone, Default)]
pub(crate) struct VersionChain {
    pub entries: Vec<VersionEntry>,
}

impl VersionChain {
    /// Latest entry, live or tombstone
    pub fn head(&self) -> Option<&VersionEntry> {
        self.entries.last()
    }

    /// Latest live document, if the head is not a tombstone
    pub fn current(&self) -> Option<&Document> {
        self.head().and_then(|e| e.doc.as_ref())
    }

    /// True when the head is a tombstone
    pub fn is_deleted(&self) -> bool {
        matches!(self.head(), Some(entry) if entry.doc.is_none())
    }

    /// Most recent live version regardless of a trailing tombstone
    pub fn last_live(&self) -> Option<&Document> {
        self.entries.iter().rev().find_map(|e| e.doc.as_ref())
    }

    /// Version number the next entry will take
    pub fn next_version(&self) -> u64 {
        self.head().map(|e| e.version + 1).unwrap_or(1)
    }
}

pub(crate) type ChainKey = (ResourceType, Uuid);
pub(crate) type Chains = BTreeMap<ChainKey, VersionChain>;

/// Append a freshly created document, failing if the id is live
pub(crate) fn create_in(chains: &mut Chains, doc: &Document, id: Uuid) -> FolioResult<Document> {
    let key = (doc.resource_type.clone(), id);
    let chain = chains.entry(key).or_default();
    if chain.current().is_some() {
        return Err(FolioError::Storage(format!(
            "id {id} already in use for {}",
            doc.resource_type
        )));
    }
    let mut stored = doc.clone();
    stored.set_assigned_id(id);
    stored.version = chain.next_version();
    stored.last_updated = Some(Utc::now());
    chain.entries.push(VersionEntry {
        version: stored.version,
        doc: Some(stored.clone()),
    });
    Ok(stored)
}

/// Append a new version, fencing on the current head
pub(crate) fn update_in(
    chains: &mut Chains,
    doc: &Document,
    expected_version: Option<u64>,
) -> FolioResult<Document> {
    let id = doc.id.ok_or_else(|| {
        FolioError::Storage("update requires a document with an assigned id".to_string())
    })?;
    let key = (doc.resource_type.clone(), id);
    let chain = chains.get_mut(&key).ok_or_else(|| FolioError::NotFound {
        resource_type: doc.resource_type.clone(),
        id,
    })?;
    let current = chain.current().ok_or_else(|| FolioError::Gone {
        resource_type: doc.resource_type.clone(),
        id,
    })?;
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
    stored.version = chain.next_version();
    stored.last_updated = Some(Utc::now());
    chain.entries.push(VersionEntry {
        version: stored.version,
        doc: Some(stored.clone()),
    });
    Ok(stored)
}

/// Append a tombstone; `Ok(false)` when already absent or deleted
pub(crate) fn delete_in(
    chains: &mut Chains,
    resource_type: &ResourceType,
    id: Uuid,
) -> FolioResult<bool> {
    let key = (resource_type.clone(), id);
    match chains.get_mut(&key) {
        Some(chain) if chain.current().is_some() => {
            let version = chain.next_version();
            chain.entries.push(VersionEntry { version, doc: None });
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Shared state behind every connection of one store
#[derive(Debug, Default)]
pub(crate) struct Shared {
    // BTreeMap keeps search iteration deterministic
    pub chains: RwLock<Chains>,
}

/// The default in-memory [`DocumentStore`]
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub(crate) shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn connection(&self) -> Box<dyn folio_core::traits::StoreConnection> {
        Box::new(MemoryConnection::new(Arc::clone(&self.shared)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(body: serde_json::Value) -> Document {
        Document::new(ResourceType::new("Task"), body)
    }

    #[test]
    fn test_create_assigns_version_one() {
        let mut chains = Chains::new();
        let id = Uuid::new_v4();
        let stored = create_in(&mut chains, &task(json!({"status": "draft"})), id).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.id, Some(id));
        assert!(stored.last_updated.is_some());
    }

    #[test]
    fn test_create_rejects_live_id() {
        let mut chains = Chains::new();
        let id = Uuid::new_v4();
        create_in(&mut chains, &task(json!({})), id).unwrap();
        assert!(matches!(
            create_in(&mut chains, &task(json!({})), id),
            Err(FolioError::Storage(_))
        ));
    }

    #[test]
    fn test_update_fences_on_version() {
        let mut chains = Chains::new();
        let id = Uuid::new_v4();
        let v1 = create_in(&mut chains, &task(json!({})), id).unwrap();
        let v2 = update_in(&mut chains, &v1, Some(1)).unwrap();
        assert_eq!(v2.version, 2);

        let err = update_in(&mut chains, &v2, Some(1)).unwrap_err();
        assert!(matches!(
            err,
            FolioError::VersionConflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_delete_then_recreate_continues_versions() {
        let mut chains = Chains::new();
        let rt = ResourceType::new("Task");
        let id = Uuid::new_v4();
        create_in(&mut chains, &task(json!({})), id).unwrap();
        assert!(delete_in(&mut chains, &rt, id).unwrap());
        // repeated delete is a no-op
        assert!(!delete_in(&mut chains, &rt, id).unwrap());
        // id slot can be reused; version history continues
        let recreated = create_in(&mut chains, &task(json!({})), id).unwrap();
        assert_eq!(recreated.version, 3);
    }

    #[test]
    fn test_update_after_delete_is_gone() {
        let mut chains = Chains::new();
        let id = Uuid::new_v4();
        let v1 = create_in(&mut chains, &task(json!({})), id).unwrap();
        delete_in(&mut chains, &ResourceType::new("Task"), id).unwrap();
        assert!(matches!(
            update_in(&mut chains, &v1, None),
            Err(FolioError::Gone { .. })
        ));
    }
}
