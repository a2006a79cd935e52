//! Versioned document model and reference extraction
//!
//! A [`Document`] is one versioned JSON body belonging to a resource type.
//! Versions start at 1 on create and increment by 1 per update; version
//! metadata is assigned by the store, never by clients.
//!
//! Reference extraction walks a document body for reference objects.
//! A reference object is any JSON object that either
//! - carries a `"reference"` string field (temporary urn, conditional
//!   query, literal `Type/id`, or an opaque external url), or
//! - carries a `"type"` string plus an `"identifier"` object with
//!   `"system"` and `"value"` (a logical, business-identifier reference).
//!
//! Type-specific extraction rules are an external concern; this walk is the
//! generic contract every document satisfies.

use crate::error::FolioResult;
use crate::types::{parse_temp_urn, ResourceType, TEMP_URN_PREFIX};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One versioned document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Type this document belongs to
    pub resource_type: ResourceType,
    /// Persistent id, None until the store assigns one
    pub id: Option<Uuid>,
    /// Version assigned by the store, 0 until persisted
    pub version: u64,
    /// Last-modified timestamp assigned by the store
    pub last_updated: Option<DateTime<Utc>>,
    /// The document body
    pub body: Value,
}

impl Document {
    /// Create a not-yet-persisted document from a body
    pub fn new(resource_type: ResourceType, body: Value) -> Self {
        Self {
            resource_type,
            id: None,
            version: 0,
            last_updated: None,
            body,
        }
    }

    /// The id declared inside the body, if any
    pub fn declared_id(&self) -> Option<&str> {
        self.body.get("id").and_then(Value::as_str)
    }

    /// Parse the body-declared id
    pub fn declared(&self) -> Option<DeclaredId> {
        self.declared_id().map(DeclaredId::parse)
    }

    /// Set the persistent id on both the struct and the body
    pub fn set_assigned_id(&mut self, id: Uuid) {
        self.id = Some(id);
        if let Value::Object(map) = &mut self.body {
            map.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    /// Relative location including version, e.g. `Patient/0c3b.../_history/2`
    pub fn location(&self) -> Option<String> {
        self.id
            .map(|id| format!("{}/{}/_history/{}", self.resource_type, id, self.version))
    }

    /// Weak ETag for the current version, e.g. `W/"2"`
    pub fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }

    /// All outbound references found in the body
    pub fn references(&self) -> Vec<Reference> {
        let mut found = Vec::new();
        collect_references(&self.body, &mut String::new(), &mut found);
        found
    }

    /// True if the body carries at least one outbound reference
    pub fn has_references(&self) -> bool {
        !self.references().is_empty()
    }
}

/// The id declared inside a document body, in one of its accepted shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredId {
    /// `urn:uuid:...` temporary id
    Temporary(String),
    /// `http(s)://base/Type/id` absolute id
    Absolute {
        /// Server base url part
        base: String,
        /// Resource type part
        resource_type: String,
        /// Id part
        id: String,
    },
    /// Bare id part, e.g. a plain uuid
    Plain(String),
}

impl DeclaredId {
    /// Parse a declared id string
    pub fn parse(s: &str) -> Self {
        if s.starts_with(TEMP_URN_PREFIX) {
            return DeclaredId::Temporary(s.to_string());
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            let parts: Vec<&str> = s.rsplitn(3, '/').collect();
            if parts.len() == 3 {
                return DeclaredId::Absolute {
                    base: parts[2].to_string(),
                    resource_type: parts[1].to_string(),
                    id: parts[0].to_string(),
                };
            }
        }
        DeclaredId::Plain(s.to_string())
    }

    /// The bare id part
    pub fn id_part(&self) -> &str {
        match self {
            DeclaredId::Temporary(s) => s,
            DeclaredId::Absolute { id, .. } => id,
            DeclaredId::Plain(id) => id,
        }
    }

    /// True for `urn:uuid:` declared ids
    pub fn is_temporary(&self) -> bool {
        matches!(self, DeclaredId::Temporary(_))
    }
}

/// An outbound reference found in a document body
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Dotted path of the reference object within the body, for diagnostics
    pub path: String,
    /// Parsed reference value
    pub value: RefValue,
}

/// Classification of a reference value
#[derive(Debug, Clone, PartialEq)]
pub enum RefValue {
    /// `urn:uuid:...` pointing at another entry of the same bundle
    Temporary(Uuid),
    /// `Type?query` — target selected by match criteria at resolution time
    Conditional {
        /// Target resource type
        resource_type: ResourceType,
        /// Raw criteria string (the part after `?`)
        criteria: String,
    },
    /// `Type/id` with an optional `/_history/version` suffix
    Literal {
        /// Target resource type
        resource_type: ResourceType,
        /// Target id
        id: Uuid,
        /// Pinned version, when the reference names one
        version: Option<u64>,
    },
    /// Business-identifier reference: `type` + `identifier{system, value}`
    Logical {
        /// Target resource type
        resource_type: ResourceType,
        /// Identifier system
        system: String,
        /// Identifier value
        value: String,
    },
    /// Anything else (external absolute url); left untouched by resolution
    Opaque(String),
}

/// Classify a `"reference"` string value
pub fn classify_reference(raw: &str) -> RefValue {
    if let Some(id) = parse_temp_urn(raw) {
        return RefValue::Temporary(id);
    }
    if raw.starts_with(TEMP_URN_PREFIX) {
        // urn prefix with an unparseable uuid stays opaque
        return RefValue::Opaque(raw.to_string());
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return RefValue::Opaque(raw.to_string());
    }
    if let Some((type_part, criteria)) = raw.split_once('?') {
        if !type_part.is_empty() && !type_part.contains('/') {
            return RefValue::Conditional {
                resource_type: ResourceType::new(type_part),
                criteria: criteria.to_string(),
            };
        }
        return RefValue::Opaque(raw.to_string());
    }
    let segments: Vec<&str> = raw.split('/').collect();
    match segments.as_slice() {
        [type_part, id_part] => {
            if let Ok(id) = Uuid::parse_str(id_part) {
                return RefValue::Literal {
                    resource_type: ResourceType::new(*type_part),
                    id,
                    version: None,
                };
            }
            RefValue::Opaque(raw.to_string())
        }
        [type_part, id_part, "_history", version_part] => {
            match (Uuid::parse_str(id_part), version_part.parse::<u64>()) {
                (Ok(id), Ok(version)) => RefValue::Literal {
                    resource_type: ResourceType::new(*type_part),
                    id,
                    version: Some(version),
                },
                _ => RefValue::Opaque(raw.to_string()),
            }
        }
        _ => RefValue::Opaque(raw.to_string()),
    }
}

/// Classify a reference object, if the map is one
pub fn classify_reference_object(map: &Map<String, Value>) -> Option<RefValue> {
    if let Some(raw) = map.get("reference").and_then(Value::as_str) {
        return Some(classify_reference(raw));
    }
    let type_name = map.get("type").and_then(Value::as_str)?;
    let identifier = map.get("identifier")?.as_object()?;
    let system = identifier.get("system").and_then(Value::as_str)?;
    let value = identifier.get("value").and_then(Value::as_str)?;
    Some(RefValue::Logical {
        resource_type: ResourceType::new(type_name),
        system: system.to_string(),
        value: value.to_string(),
    })
}

fn collect_references(value: &Value, path: &mut String, out: &mut Vec<Reference>) {
    match value {
        Value::Object(map) => {
            if let Some(ref_value) = classify_reference_object(map) {
                out.push(Reference {
                    path: path.clone(),
                    value: ref_value,
                });
                // reference objects do not nest further references
                return;
            }
            for (key, child) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                collect_references(child, path, out);
                path.truncate(len);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&i.to_string());
                collect_references(child, path, out);
                path.truncate(len);
            }
        }
        _ => {}
    }
}

/// Visit every reference object in a body mutably
///
/// The visitor receives each reference object's map and may rewrite it in
/// place (e.g. replacing a temporary urn with a resolved literal id).
/// Errors abort the walk.
pub fn visit_reference_objects_mut<F>(value: &mut Value, visit: &mut F) -> FolioResult<()>
where
    F: FnMut(&mut Map<String, Value>) -> FolioResult<()>,
{
    match value {
        Value::Object(map) => {
            if classify_reference_object(map).is_some() {
                return visit(map);
            }
            for (_, child) in map.iter_mut() {
                visit_reference_objects_mut(child, visit)?;
            }
        }
        Value::Array(items) => {
            for child in items {
                visit_reference_objects_mut(child, visit)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::temp_urn;
    use serde_json::json;

    fn doc(body: Value) -> Document {
        Document::new(ResourceType::new("Task"), body)
    }

    #[test]
    fn test_set_assigned_id_updates_body() {
        let mut d = doc(json!({"status": "draft"}));
        let id = Uuid::new_v4();
        d.set_assigned_id(id);
        assert_eq!(d.id, Some(id));
        assert_eq!(d.declared_id(), Some(id.to_string().as_str()));
    }

    #[test]
    fn test_etag_and_location() {
        let mut d = doc(json!({}));
        let id = Uuid::new_v4();
        d.set_assigned_id(id);
        d.version = 3;
        assert_eq!(d.etag(), "W/\"3\"");
        assert_eq!(d.location().unwrap(), format!("Task/{id}/_history/3"));
    }

    #[test]
    fn test_classify_temporary() {
        let id = Uuid::new_v4();
        assert_eq!(classify_reference(&temp_urn(id)), RefValue::Temporary(id));
    }

    #[test]
    fn test_classify_conditional() {
        match classify_reference("Patient?identifier=http://x|123") {
            RefValue::Conditional {
                resource_type,
                criteria,
            } => {
                assert_eq!(resource_type.as_str(), "Patient");
                assert_eq!(criteria, "identifier=http://x|123");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_literal_with_version() {
        let id = Uuid::new_v4();
        match classify_reference(&format!("Patient/{id}/_history/2")) {
            RefValue::Literal {
                id: got,
                version: Some(2),
                ..
            } => assert_eq!(got, id),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_external_url_is_opaque() {
        assert!(matches!(
            classify_reference("https://example.com/api/Patient/1"),
            RefValue::Opaque(_)
        ));
    }

    #[test]
    fn test_extract_references_nested() {
        let id = Uuid::new_v4();
        let d = doc(json!({
            "status": "draft",
            "subject": {"reference": temp_urn(id)},
            "inputs": [
                {"value": {"reference": format!("Patient/{}", Uuid::new_v4())}},
                {"value": {"type": "Organization",
                           "identifier": {"system": "http://orgs", "value": "A"}}}
            ]
        }));
        let refs = d.references();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].path, "subject");
        assert!(matches!(refs[0].value, RefValue::Temporary(got) if got == id));
        assert!(matches!(refs[1].value, RefValue::Literal { .. }));
        assert!(matches!(refs[2].value, RefValue::Logical { .. }));
    }

    #[test]
    fn test_no_references() {
        let d = doc(json!({"status": "draft", "count": 2}));
        assert!(!d.has_references());
    }

    #[test]
    fn test_visit_rewrites_in_place() {
        let id = Uuid::new_v4();
        let mut d = doc(json!({"subject": {"reference": temp_urn(id)}}));
        visit_reference_objects_mut(&mut d.body, &mut |map| {
            map.insert(
                "reference".to_string(),
                Value::String(format!("Patient/{id}")),
            );
            Ok(())
        })
        .unwrap();
        assert_eq!(
            d.body["subject"]["reference"],
            Value::String(format!("Patient/{id}"))
        );
    }

    #[test]
    fn test_declared_id_shapes() {
        assert!(DeclaredId::parse("urn:uuid:x").is_temporary());
        match DeclaredId::parse("http://server/base/Patient/123") {
            DeclaredId::Absolute {
                base,
                resource_type,
                id,
            } => {
                assert_eq!(base, "http://server/base");
                assert_eq!(resource_type, "Patient");
                assert_eq!(id, "123");
            }
            other => panic!("unexpected shape: {other:?}"),
        }
        assert_eq!(DeclaredId::parse("123").id_part(), "123");
    }
}
