//! Error types for the document store and bundle engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every error maps to an HTTP-style status code via [`FolioError::status_code`];
//! command lists use that mapping when rendering per-entry failure results.

use crate::types::ResourceType;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for folio operations
pub type FolioResult<T> = std::result::Result<T, FolioError>;

/// Error taxonomy for bundle processing and storage
#[derive(Debug, Clone, Error)]
pub enum FolioError {
    /// Structural problem in a bundle entry, always fatal to the whole
    /// request and raised before any command runs
    #[error("malformed bundle entry at index {index}: {message}")]
    MalformedBundle {
        /// Zero-based index of the offending entry
        index: usize,
        /// What was wrong with the entry
        message: String,
    },

    /// Problem with one entry's request detected while its command ran
    /// (bad target url, bad conditional criteria, id mismatch); unlike
    /// `MalformedBundle` this is scoped to the command, so batch bundles
    /// capture it per slot
    #[error("bad request for entry at index {index}: {message}")]
    BadRequest {
        /// Zero-based index of the command
        index: usize,
        /// What was wrong with the request
        message: String,
    },

    /// The acting identity is not allowed to perform the operation
    #[error("{operation} of {resource_type} denied at index {index}")]
    AuthorizationDenied {
        /// Zero-based index of the command
        index: usize,
        /// Operation name ("create", "read", "update", "delete", "search")
        operation: &'static str,
        /// Resource type the operation targeted
        resource_type: ResourceType,
    },

    /// A conditional create/update/delete matched more than one document
    #[error("criteria '{criteria}' matched multiple {resource_type} documents")]
    ConditionalMatchAmbiguous {
        /// Resource type the condition ran against
        resource_type: ResourceType,
        /// The match criteria as submitted
        criteria: String,
    },

    /// Target document does not exist
    #[error("{resource_type}/{id} not found")]
    NotFound {
        /// Resource type of the missing document
        resource_type: ResourceType,
        /// Document id
        id: Uuid,
    },

    /// Target document existed but has been deleted
    #[error("{resource_type}/{id} is deleted")]
    Gone {
        /// Resource type of the deleted document
        resource_type: ResourceType,
        /// Document id
        id: Uuid,
    },

    /// Optimistic-concurrency precondition failed
    #[error("version conflict: expected {expected}, current {actual}")]
    VersionConflict {
        /// Version the client expected
        expected: u64,
        /// Version found in the store
        actual: u64,
    },

    /// A reference inside a document body could not be resolved
    #[error("unresolvable reference '{reference}' in entry at index {index}")]
    ReferenceUnresolvable {
        /// Zero-based index of the command
        index: usize,
        /// The reference value as authored
        reference: String,
    },

    /// Schema/profile validation reported blocking issues
    #[error("validation of entry at index {index} failed: {}", issues.join("; "))]
    ValidationFailed {
        /// Zero-based index of the command
        index: usize,
        /// Blocking issue messages
        issues: Vec<String>,
    },

    /// Conditional update matched nothing but the body declares a
    /// persistent id the server did not assign
    #[error("update as create of {resource_type} not allowed")]
    UpdateAsCreateNotAllowed {
        /// Resource type of the rejected update
        resource_type: ResourceType,
    },

    /// Internal storage failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl FolioError {
    /// HTTP-style status code for this error, used when rendering
    /// per-entry failure results
    pub fn status_code(&self) -> u16 {
        match self {
            FolioError::MalformedBundle { .. } => 400,
            FolioError::BadRequest { .. } => 400,
            FolioError::AuthorizationDenied { .. } => 403,
            FolioError::NotFound { .. } => 404,
            FolioError::Gone { .. } => 410,
            FolioError::ConditionalMatchAmbiguous { .. } => 412,
            FolioError::VersionConflict { .. } => 412,
            FolioError::UpdateAsCreateNotAllowed { .. } => 405,
            FolioError::ReferenceUnresolvable { .. } => 422,
            FolioError::ValidationFailed { .. } => 422,
            FolioError::Storage(_) => 500,
        }
    }

    /// Canonical reason phrase for [`status_code`](Self::status_code)
    pub fn reason_phrase(&self) -> &'static str {
        reason_phrase(self.status_code())
    }
}

/// Reason phrase for the status codes the engine emits
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        410 => "Gone",
        412 => "Precondition Failed",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}
