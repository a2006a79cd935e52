//! Domain events emitted after durable mutations
//!
//! Events describe what a committed bundle did to the store. They are
//! buffered during transaction bundles and released only after the storage
//! commit; see the engine's event buffer.

use crate::document::Document;
use crate::types::ResourceType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One durable side effect of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A document was created; carries the durable state including
    /// resolved references
    Created(Document),
    /// A document was updated; carries the new durable state
    Updated(Document),
    /// A document was deleted
    Deleted(ResourceType, Uuid),
}

impl Event {
    /// Resource type the event concerns
    pub fn resource_type(&self) -> &ResourceType {
        match self {
            Event::Created(doc) | Event::Updated(doc) => &doc.resource_type,
            Event::Deleted(resource_type, _) => resource_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_resource_type() {
        let doc = Document::new(ResourceType::new("Task"), json!({}));
        assert_eq!(Event::Created(doc).resource_type().as_str(), "Task");
        let ev = Event::Deleted(ResourceType::new("Patient"), Uuid::new_v4());
        assert_eq!(ev.resource_type().as_str(), "Patient");
    }
}
