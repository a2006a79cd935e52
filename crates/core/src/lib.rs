//! folio-core - foundational types for the folio document store
//!
//! This crate defines the data model (documents, queries, identities),
//! the error taxonomy, and the collaborator traits (storage, validation,
//! authorization, events) the bundle engine is built against.

pub mod document;
pub mod error;
pub mod event;
pub mod query;
pub mod traits;
pub mod types;

pub use document::{DeclaredId, Document, RefValue, Reference};
pub use error::{FolioError, FolioResult};
pub use event::Event;
pub use query::{Page, Query};
pub use types::{
    BundleMode, DocumentId, Identity, PreferHandling, PreferReturn, ResourceType, Verb,
};
