//! Translation table from entry identifiers to persistent ids
//!
//! Bundles reference not-yet-created documents through `urn:uuid:`
//! full-urls. During pre-execution each mutating command registers the
//! persistent id its entry will end up with; later commands rewrite
//! references through this table.

use std::collections::BTreeMap;

use folio_core::types::{parse_temp_urn, DocumentId};
use tracing::debug;
use uuid::Uuid;

/// Maps entry full-urls to the persistent ids they resolve to
#[derive(Debug, Default)]
pub struct IdTranslation {
    entries: BTreeMap<String, DocumentId>,
}

impl IdTranslation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the persistent id an entry resolves to
    ///
    /// Returns an error value of the previous mapping when the full-url
    /// was already registered; duplicate full-urls in one bundle are a
    /// client error the caller reports.
    pub fn register(&mut self, full_url: &str, id: DocumentId) -> Result<(), DocumentId> {
        if let Some(existing) = self.entries.get(full_url) {
            return Err(existing.clone());
        }
        debug!(target: "folio::txn", full_url, id = %id, "registered id translation");
        self.entries.insert(full_url.to_string(), id);
        Ok(())
    }

    /// Look up the persistent id for an entry full-url
    pub fn get(&self, full_url: &str) -> Option<&DocumentId> {
        self.entries.get(full_url)
    }

    /// Resolve a temporary identifier to its persistent id
    pub fn resolve_temp(&self, temp: Uuid) -> Option<&DocumentId> {
        self.entries
            .iter()
            .find(|(url, _)| parse_temp_urn(url) == Some(temp))
            .map(|(_, id)| id)
    }

    fn throwaway(id: &DocumentId) -> DocumentId {
        DocumentId::new(id.resource_type.clone(), Uuid::new_v4())
    }

    /// Point every mapping at `deleted` to a fresh unused id
    ///
    /// After a delete, later commands must not resolve references to the
    /// removed document; rewriting the mapping makes their reference
    /// checks fail the way a dangling reference would.
    pub fn invalidate(&mut self, deleted: &DocumentId) {
        for (url, id) in self.entries.iter_mut() {
            if id == deleted {
                let fresh = Self::throwaway(id);
                debug!(
                    target: "folio::txn",
                    full_url = %url,
                    old = %id,
                    new = %fresh,
                    "invalidated id translation after delete"
                );
                *id = fresh;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
