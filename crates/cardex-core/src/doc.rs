//! Card instance documents.
//!
//! Instances are stored as JSON resource documents:
//!
//! ```json
//! {
//!   "data": {
//!     "attributes": { "firstName": "Mango" },
//!     "relationships": { "owner": { "links": { "self": "../Person/hassan" } } },
//!     "meta": { "adoptsFrom": { "module": "../pet", "name": "Pet" } }
//!   }
//! }
//! ```
//!
//! Relationship keys are field paths: `owner` for a `linksTo`, `friends.0`,
//! `friends.1`, ... for a `linksToMany`, and `address.owner` for links
//! inside contained fields.

use crate::card_ref::CardRef;
use crate::error::DocumentError;
use crate::url::{card_id, resolve_url};
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

static EMPTY_OBJECT: Lazy<Value> = Lazy::new(|| Value::Object(Map::new()));

/// What a relationship key points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// No relationship with this key.
    Absent,
    /// An explicit empty link.
    Null,
    /// The linked card's id.
    Card(String),
}

/// Builds a relationship key from a field path and an optional list index.
pub fn relationship_key(prefix: &str, field: &str, index: Option<usize>) -> String {
    let mut key = if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    };
    if let Some(index) = index {
        key.push('.');
        key.push_str(&index.to_string());
    }
    key
}

/// A parsed instance document.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDocument {
    /// Card id (file URL without `.json`).
    pub id: String,
    pub file_url: String,
    resource: Map<String, Value>,
}

impl CardDocument {
    /// Parses instance file contents.
    pub fn parse(file_url: &str, source: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(source).map_err(|e| DocumentError::InvalidJson {
            url: file_url.to_string(),
            message: e.to_string(),
        })?;
        Self::from_value(file_url, value)
    }

    /// Wraps an already-parsed document.
    pub fn from_value(file_url: &str, value: Value) -> Result<Self, DocumentError> {
        let resource = match value {
            Value::Object(mut doc) => match doc.remove("data") {
                Some(Value::Object(data)) => data,
                _ => {
                    return Err(DocumentError::MissingData {
                        url: file_url.to_string(),
                    })
                }
            },
            _ => {
                return Err(DocumentError::MissingData {
                    url: file_url.to_string(),
                })
            }
        };
        Ok(Self {
            id: card_id(file_url).to_string(),
            file_url: file_url.to_string(),
            resource,
        })
    }

    /// The card this instance adopts from, with its module made absolute.
    pub fn adopts_from(&self) -> Result<CardRef, DocumentError> {
        self.resource
            .get("meta")
            .and_then(|meta| meta.get("adoptsFrom"))
            .and_then(|r| serde_json::from_value::<CardRef>(r.clone()).ok())
            .map(|r| r.resolved_against(&self.file_url))
            .ok_or_else(|| DocumentError::MissingAdoptsFrom {
                url: self.file_url.clone(),
            })
    }

    /// The attributes object (empty if the document has none).
    pub fn attributes(&self) -> &Value {
        match self.resource.get("attributes") {
            Some(attrs @ Value::Object(_)) => attrs,
            _ => &EMPTY_OBJECT,
        }
    }

    /// Looks up a relationship by key.
    pub fn link(&self, key: &str) -> Link {
        let Some(relationship) = self
            .resource
            .get("relationships")
            .and_then(|r| r.get(key))
        else {
            return Link::Absent;
        };
        match relationship.get("links").and_then(|l| l.get("self")) {
            Some(Value::String(target)) => {
                Link::Card(card_id(&resolve_url(&self.file_url, target)).to_string())
            }
            Some(Value::Null) => Link::Null,
            _ => Link::Absent,
        }
    }

    /// Every non-empty link, in key order.
    pub fn links(&self) -> Vec<(String, String)> {
        let Some(Value::Object(relationships)) = self.resource.get("relationships") else {
            return Vec::new();
        };
        let mut out: Vec<(String, String)> = relationships
            .keys()
            .filter_map(|key| match self.link(key) {
                Link::Card(id) => Some((key.clone(), id)),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }

    /// The canonical stored form: absolute references, identity and
    /// realm metadata filled in.
    pub fn pristine(&self, adopts_from: &CardRef, realm_url: &str, last_modified: u64) -> Value {
        let mut relationships = Map::new();
        if let Some(Value::Object(existing)) = self.resource.get("relationships") {
            for key in existing.keys() {
                let target = match self.link(key) {
                    Link::Card(id) => Value::String(id),
                    _ => Value::Null,
                };
                relationships.insert(key.clone(), json!({ "links": { "self": target } }));
            }
        }

        let mut meta = match self.resource.get("meta") {
            Some(Value::Object(meta)) => meta.clone(),
            _ => Map::new(),
        };
        meta.insert(
            "adoptsFrom".to_string(),
            serde_json::to_value(adopts_from).unwrap_or(Value::Null),
        );
        meta.insert("lastModified".to_string(), Value::from(last_modified));
        meta.insert("realmURL".to_string(), Value::String(realm_url.to_string()));

        json!({
            "data": {
                "id": self.id,
                "type": "card",
                "attributes": self.attributes(),
                "relationships": relationships,
                "meta": meta,
                "links": { "self": self.id },
            }
        })
    }
}
