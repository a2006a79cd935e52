//! FolioDB - embedded versioned document store with transactional
//! bundle processing
//!
//! FolioDB stores JSON documents in per-identity version chains and
//! executes bundles of operations (create, read, update, delete,
//! search) against them, under batch semantics (entries independent)
//! or transaction semantics (all-or-nothing).
//!
//! # Quick Start
//!
//! ```
//! use foliodb::{Bundle, BundleEntry, BundleMode, EntryRequest, Folio, Identity, Verb};
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let db = Folio::in_memory();
//! let bundle = Bundle {
//!     mode: BundleMode::Transaction,
//!     entries: vec![BundleEntry {
//!         full_url: Some(format!("urn:uuid:{}", Uuid::new_v4())),
//!         resource: Some(json!({"resourceType": "Patient", "name": "smith"})),
//!         request: EntryRequest {
//!             verb: Some(Verb::Post),
//!             url: "Patient".to_string(),
//!             ..Default::default()
//!         },
//!     }],
//! };
//! let response = db.execute(&bundle, &Identity::new("app")).unwrap();
//! assert_eq!(response.entries[0].status.code, 201);
//! ```
//!
//! # Architecture
//!
//! The workspace splits into `folio-core` (data model, error taxonomy,
//! collaborator traits), `folio-store` (the in-memory versioned store),
//! and `folio-engine` (classification, ordering, reference resolution,
//! authorization, events). [`Folio`] wires the default store into an
//! engine; bring your own [`DocumentStore`], [`Validator`],
//! [`AuthorizationPolicy`], or [`EventSink`] through [`Engine`].

use std::sync::Arc;

pub use folio_core::error::{FolioError, FolioResult};
pub use folio_core::event::Event;
pub use folio_core::query::{Page, Query};
pub use folio_core::traits::{
    AuthorizationPolicy, DocumentStore, EventSink, SearchResult, Severity, StoreConnection,
    ValidationIssue, Validator,
};
pub use folio_core::types::{
    BundleMode, DocumentId, Identity, PreferHandling, PreferReturn, ResourceType, Verb,
};
pub use folio_core::Document;
pub use folio_engine::entry::{Bundle, BundleEntry, EntryRequest};
pub use folio_engine::response::{
    OperationOutcome, ResponseBundle, ResponseKind, ResultBody, ResultEntry, StatusLine,
};
pub use folio_engine::{Engine, EngineConfig};
pub use folio_store::MemoryStore;

/// An embedded database: the default in-memory store behind an engine
pub struct Folio {
    engine: Engine,
}

impl Folio {
    /// Open an empty in-memory database with permissive defaults
    pub fn in_memory() -> Self {
        Folio {
            engine: Engine::new(Arc::new(MemoryStore::new())),
        }
    }

    /// Wrap a pre-configured engine
    pub fn with_engine(engine: Engine) -> Self {
        Folio { engine }
    }

    /// Execute a bundle with default preferences
    pub fn execute(&self, bundle: &Bundle, identity: &Identity) -> FolioResult<ResponseBundle> {
        self.engine.execute_bundle(bundle, identity)
    }

    /// Execute a bundle under explicit return and handling preferences
    pub fn execute_with(
        &self,
        bundle: &Bundle,
        identity: &Identity,
        prefer_return: PreferReturn,
        handling: PreferHandling,
    ) -> FolioResult<ResponseBundle> {
        self.engine
            .execute_bundle_with(bundle, identity, prefer_return, handling)
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
