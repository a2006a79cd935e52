//! Bundle processing engine
//!
//! Takes a [`Bundle`](entry::Bundle) of operations (create, read,
//! update, delete, search) against a versioned document store and
//! executes it under batch or transaction semantics: batches run each
//! entry independently and report per-slot failures, transactions apply
//! every change atomically or none at all.
//!
//! The engine classifies entries into commands, orders them (deletes
//! before creates before updates, reads last), resolves references
//! between entries through a request-scoped id translation table,
//! enforces per-operation authorization with audit logging, and defers
//! change events until the storage commit.
//!
//! ```
//! use folio_core::types::{BundleMode, Identity, Verb};
//! use folio_engine::entry::{Bundle, BundleEntry, EntryRequest};
//! use folio_engine::Engine;
//! use folio_store::MemoryStore;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let engine = Engine::new(std::sync::Arc::new(MemoryStore::new()));
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
//! let response = engine
//!     .execute_bundle(&bundle, &Identity::new("tester"))
//!     .unwrap();
//! assert_eq!(response.entries[0].status.code, 201);
//! ```

pub mod authorization;
pub mod command;
pub mod entry;
pub mod events;
pub mod ids;
pub mod references;
pub mod response;

use std::sync::Arc;

use folio_core::error::FolioResult;
use folio_core::traits::{
    AcceptAll, AllowAll, AuthorizationPolicy, DocumentStore, EventSink, StoreConnection, Validator,
};
use folio_core::types::{BundleMode, Identity, PreferHandling, PreferReturn};
use tracing::debug;

use crate::authorization::AuthorizationGate;
use crate::command::{build_commands, CommandList};
use crate::entry::Bundle;
use crate::events::{DeliveryMode, EventBuffer, NullSink};
use crate::ids::IdTranslation;
use crate::response::ResponseBundle;

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The server's own base url; absolute declared ids must use it
    pub base_url: Option<String>,
    /// Page size applied when a search names no `_count`
    pub default_page_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: None,
            default_page_count: 20,
        }
    }
}

/// Everything one bundle execution needs, built fresh per request
pub(crate) struct BundleResources<'a> {
    pub(crate) conn: Box<dyn StoreConnection>,
    pub(crate) ids: IdTranslation,
    pub(crate) validator: &'a dyn Validator,
    pub(crate) gate: AuthorizationGate,
    pub(crate) events: EventBuffer,
    pub(crate) config: &'a EngineConfig,
    pub(crate) prefer_return: PreferReturn,
    pub(crate) handling: PreferHandling,
}

/// The bundle processing engine
///
/// Holds the store and the collaborator services; every
/// [`execute_bundle`](Engine::execute_bundle) call runs on a fresh
/// connection, id table, and event buffer.
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    validator: Arc<dyn Validator>,
    policy: Arc<dyn AuthorizationPolicy>,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with permissive defaults: no validation
    /// findings, every operation allowed, events dropped
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Engine {
            store,
            validator: Arc::new(AcceptAll),
            policy: Arc::new(AllowAll),
            sink: Arc::new(NullSink),
            config: EngineConfig::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AuthorizationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a bundle with default preferences (minimal bodies,
    /// lenient parameter handling)
    pub fn execute_bundle(
        &self,
        bundle: &Bundle,
        identity: &Identity,
    ) -> FolioResult<ResponseBundle> {
        self.execute_bundle_with(
            bundle,
            identity,
            PreferReturn::default(),
            PreferHandling::default(),
        )
    }

    /// Execute a bundle under the caller's return and handling
    /// preferences
    pub fn execute_bundle_with(
        &self,
        bundle: &Bundle,
        identity: &Identity,
        prefer_return: PreferReturn,
        handling: PreferHandling,
    ) -> FolioResult<ResponseBundle> {
        debug!(
            target: "folio::txn",
            mode = ?bundle.mode,
            entries = bundle.entries.len(),
            identity = %identity,
            "executing bundle"
        );
        let list = build_commands(bundle)?;
        let delivery = match bundle.mode {
            BundleMode::Batch => DeliveryMode::Immediate,
            BundleMode::Transaction => DeliveryMode::Deferred,
        };
        let mut resources = BundleResources {
            conn: self.store.connection(),
            ids: IdTranslation::new(),
            validator: self.validator.as_ref(),
            gate: AuthorizationGate::new(self.policy.clone(), identity.clone()),
            events: EventBuffer::new(self.sink.clone(), delivery),
            config: &self.config,
            prefer_return,
            handling,
        };
        match list {
            CommandList::Batch(commands) => commands.execute(&mut resources),
            CommandList::Transaction(commands) => commands.execute(&mut resources),
        }
    }
}
