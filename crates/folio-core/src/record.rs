//! Records as they arrive from the remote log.
//!
//! A [`Record`] is one message of the append-only log: a content-addressed
//! [`RecordKey`] plus a [`RecordValue`] carrying the message [`Content`].
//!
//! Content is an open JSON object. Two fields are typed because the engine
//! reasons about them: `revisionRoot` (the key of the chain origin) and
//! `revisionBranch` (the key of the revision this one edits). Everything else
//! (`name`, `type`, `prototype`, ...) is kept in [`Content::fields`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Content field holding the display name of a record.
pub const NAME_FIELD: &str = "name";

/// Content field holding the record type.
pub const TYPE_FIELD: &str = "type";

/// Content field pointing at the prototype record (by key).
pub const PROTOTYPE_FIELD: &str = "prototype";

/// Content-addressed identity of one message in the log.
///
/// Opaque to the engine; compared and hashed as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Wrap a raw key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Return the raw key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Message content: revision links plus arbitrary JSON fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Key of the chain origin. `None` on the origin itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_root: Option<RecordKey>,

    /// Key of the revision this content edits. `None` on the origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_branch: Option<RecordKey>,

    /// All other content fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Content {
    /// Create empty content.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder: set the `name` field.
    #[must_use]
    pub fn with_name(self, name: &str) -> Self {
        self.with(NAME_FIELD, name)
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Look up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Look up a string field.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Display name, if the content carries a string `name`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.get_str(NAME_FIELD)
    }

    /// Record type, if the content carries a string `type`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get_str(TYPE_FIELD)
    }

    /// Key of the prototype this content inherits from.
    #[must_use]
    pub fn prototype(&self) -> Option<RecordKey> {
        self.get_str(PROTOTYPE_FIELD).map(RecordKey::from)
    }

    /// Render the content as a JSON object (revision fields included).
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        if let Some(root) = &self.revision_root {
            map.insert("revisionRoot".to_string(), Value::String(root.to_string()));
        }
        if let Some(branch) = &self.revision_branch {
            map.insert(
                "revisionBranch".to_string(),
                Value::String(branch.to_string()),
            );
        }
        Value::Object(map)
    }
}

/// The value half of a log message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValue {
    pub content: Content,
}

/// One keyed message of the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Content-addressed key of this revision.
    pub key: RecordKey,
    pub value: RecordValue,
}

impl Record {
    /// Create a record from a key and its content.
    pub fn new(key: impl Into<RecordKey>, content: Content) -> Self {
        Self {
            key: key.into(),
            value: RecordValue { content },
        }
    }

    /// Message content.
    #[must_use]
    pub fn content(&self) -> &Content {
        &self.value.content
    }

    /// Chain identity: the revision root, or the record's own key when it is
    /// the chain origin.
    ///
    /// Every revision of one logical entity shares this identity, so the
    /// local collection holds at most one record per identity.
    #[must_use]
    pub fn identity(&self) -> &RecordKey {
        self.value.content.revision_root.as_ref().unwrap_or(&self.key)
    }

    /// Whether this record starts a revision chain.
    #[must_use]
    pub fn is_chain_origin(&self) -> bool {
        self.value.content.revision_root.is_none()
    }

    /// Display name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.value.content.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_of_origin_is_own_key() {
        let record = Record::new("k1", Content::new().with_name("a"));
        assert_eq!(record.identity().as_str(), "k1");
        assert!(record.is_chain_origin());
    }

    #[test]
    fn identity_of_revision_is_root() {
        let mut content = Content::new().with_name("b");
        content.revision_root = Some("k1".into());
        content.revision_branch = Some("k1".into());
        let record = Record::new("k2", content);
        assert_eq!(record.identity().as_str(), "k1");
        assert!(!record.is_chain_origin());
    }

    #[test]
    fn content_serializes_camel_case_revision_fields() {
        let mut content = Content::new().with_name("x");
        content.revision_root = Some("root".into());
        content.revision_branch = Some("branch".into());

        let json = serde_json::to_value(&content).expect("serialize");
        assert_eq!(
            json,
            json!({"name": "x", "revisionRoot": "root", "revisionBranch": "branch"})
        );
        assert_eq!(json, content.to_value());
    }

    #[test]
    fn content_deserializes_unknown_fields_into_map() {
        let content: Content = serde_json::from_value(json!({
            "type": "sheet",
            "name": "Budget",
            "revisionRoot": "r",
            "nested": {"a": 1}
        }))
        .expect("deserialize");

        assert_eq!(content.revision_root, Some(RecordKey::from("r")));
        assert_eq!(content.revision_branch, None);
        assert_eq!(content.name(), Some("Budget"));
        assert_eq!(content.content_type(), Some("sheet"));
        assert_eq!(content.get("nested"), Some(&json!({"a": 1})));
        assert!(content.get("revisionRoot").is_none());
    }

    #[test]
    fn prototype_field_is_a_key() {
        let content = Content::new().with(PROTOTYPE_FIELD, "proto-key");
        assert_eq!(content.prototype(), Some(RecordKey::from("proto-key")));
        assert_eq!(Content::new().with(PROTOTYPE_FIELD, 3).prototype(), None);
    }
}
