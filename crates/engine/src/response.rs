//! Response bundle assembly
//!
//! Every command yields one [`ResultEntry`]; the list implementations
//! collect them in entry order and wrap them in a [`ResponseBundle`].

use folio_core::document::Document;
use folio_core::error::{reason_phrase, FolioError};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// HTTP-style status of a result entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn new(code: u16) -> Self {
        StatusLine {
            code,
            reason: reason_phrase(code).to_string(),
        }
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Severity of an outcome issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
}

impl IssueSeverity {
    fn as_str(self) -> &'static str {
        match self {
            IssueSeverity::Information => "information",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
        }
    }
}

/// Diagnostic payload attached to a result entry
#[derive(Debug, Clone, Default)]
pub struct OperationOutcome {
    pub issues: Vec<(IssueSeverity, String)>,
}

impl OperationOutcome {
    pub fn error(diagnostics: impl Into<String>) -> Self {
        OperationOutcome {
            issues: vec![(IssueSeverity::Error, diagnostics.into())],
        }
    }

    pub fn information(diagnostics: impl Into<String>) -> Self {
        OperationOutcome {
            issues: vec![(IssueSeverity::Information, diagnostics.into())],
        }
    }

    pub fn push(&mut self, severity: IssueSeverity, diagnostics: impl Into<String>) {
        self.issues.push((severity, diagnostics.into()));
    }

    pub fn to_json(&self) -> Value {
        json!({
            "resourceType": "OperationOutcome",
            "issue": self.issues.iter().map(|(sev, diag)| json!({
                "severity": sev.as_str(),
                "diagnostics": diag,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Body variants a result entry may carry
#[derive(Debug, Clone)]
pub enum ResultBody {
    /// The (possibly updated) document
    Resource(Document),
    /// Diagnostics only
    Outcome(OperationOutcome),
    /// A page of search results
    SearchSet {
        total: usize,
        matches: Vec<Document>,
        includes: Vec<Document>,
        warnings: Vec<String>,
    },
}

/// One slot of the response bundle
#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub status: StatusLine,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub body: Option<ResultBody>,
}

impl ResultEntry {
    pub fn new(code: u16) -> Self {
        ResultEntry {
            status: StatusLine::new(code),
            location: None,
            etag: None,
            last_modified: None,
            body: None,
        }
    }

    /// Fill location/etag/last-modified from a persisted document
    pub fn with_document_headers(mut self, doc: &Document) -> Self {
        self.location = doc.location();
        self.etag = Some(doc.etag());
        self.last_modified = doc.last_updated;
        self
    }

    pub fn with_body(mut self, body: ResultBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Failure slot for batch responses
    pub fn from_error(err: &FolioError) -> Self {
        ResultEntry::new(err.status_code())
            .with_body(ResultBody::Outcome(OperationOutcome::error(err.to_string())))
    }
}

/// Response kind, mirroring the request mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    BatchResponse,
    TransactionResponse,
}

/// The assembled response
#[derive(Debug, Clone)]
pub struct ResponseBundle {
    pub kind: ResponseKind,
    pub entries: Vec<ResultEntry>,
}
