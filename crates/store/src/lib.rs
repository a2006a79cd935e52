//! folio-store - default in-memory versioned document store
//!
//! Implements the `folio-core` storage traits: per-identity version
//! chains with tombstones, connection-scoped staging with deferred
//! commit, rollback, version fencing, and dotted-path search.

mod connection;
mod memory;

pub use connection::MemoryConnection;
pub use memory::MemoryStore;
