//! Match criteria for conditional operations and searches
//!
//! The query *language* is an external, pluggable concern; the engine
//! treats parameters as opaque key/value pairs and hands them to the
//! store. The default store interprets a key as a dotted JSON path and
//! matches the value for equality.

use crate::types::ResourceType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Match criteria against one resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Type the criteria run against
    pub resource_type: ResourceType,
    /// Opaque key/value criteria, in submission order
    pub parameters: Vec<(String, String)>,
}

impl Query {
    /// Criteria with no parameters (matches every document of the type)
    pub fn all(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            parameters: Vec::new(),
        }
    }

    /// Parse a criteria string (`k=v&k2=v2`) against a type
    ///
    /// Parameters without `=` are kept with an empty value; the store
    /// decides whether it supports them.
    pub fn parse(resource_type: ResourceType, criteria: &str) -> Self {
        let parameters = criteria
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Self {
            resource_type,
            parameters,
        }
    }

    /// The criteria part rendered back to `k=v&k2=v2` form
    pub fn criteria(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Remove the named parameters, returning those that were present
    pub fn strip_parameters(&mut self, names: &[&str]) -> Vec<(String, String)> {
        let (stripped, kept): (Vec<_>, Vec<_>) = self
            .parameters
            .drain(..)
            .partition(|(k, _)| names.contains(&k.as_str()));
        self.parameters = kept;
        stripped
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.resource_type, self.criteria())
    }
}

/// Page window for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Number of matches to skip
    pub offset: usize,
    /// Maximum matches to return
    pub count: usize,
}

impl Page {
    /// Window for conditional operations: one match is enough to act,
    /// the total tells us whether the criteria were ambiguous
    pub fn single() -> Self {
        Self {
            offset: 0,
            count: 1,
        }
    }

    /// Default search window
    pub fn default_count(count: usize) -> Self {
        Self { offset: 0, count }
    }
}
