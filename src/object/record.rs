//! Resource records: one open field bag tagged with a resource kind.
//!
//! The kind tag and all partiality bookkeeping live outside the bag, so no
//! remote field name can shadow record structure; `record.set("kind", ...)`
//! stores an ordinary field and leaves the tag untouched. The reserved
//! structural name set is therefore empty.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::ser::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};

use super::fields::Fields;
use super::value::FieldValue;

/// The closed set of remote resource kinds. Fields within a kind are
/// open-ended; the kinds themselves are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Bug,
    Attachment,
    Flag,
    Comment,
    User,
    Group,
    History,
    Change,
    Product,
    Component,
    FlagType,
    UpdateResult,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bug => "bug",
            ResourceKind::Attachment => "attachment",
            ResourceKind::Flag => "flag",
            ResourceKind::Comment => "comment",
            ResourceKind::User => "user",
            ResourceKind::Group => "group",
            ResourceKind::History => "history",
            ResourceKind::Change => "change",
            ResourceKind::Product => "product",
            ResourceKind::Component => "component",
            ResourceKind::FlagType => "flag_type",
            ResourceKind::UpdateResult => "update_result",
        }
    }

    /// Top-level key under which collection responses nest their list,
    /// e.g. `{"bugs": [...]}`.
    pub fn collection_key(&self) -> &'static str {
        match self {
            ResourceKind::Bug => "bugs",
            ResourceKind::Attachment => "attachments",
            ResourceKind::Flag => "flags",
            ResourceKind::Comment => "comments",
            ResourceKind::User => "users",
            ResourceKind::Group => "groups",
            ResourceKind::History => "history",
            ResourceKind::Change => "changes",
            ResourceKind::Product => "products",
            ResourceKind::Component => "components",
            ResourceKind::FlagType => "flag_types",
            ResourceKind::UpdateResult => "results",
        }
    }

    /// Field holding the primary key used for identity-addressed paths.
    pub fn primary_key(&self) -> &'static str {
        "id"
    }

    /// Known field names with their kind defaults, mirroring the documented
    /// field set of each REST resource. Used only for optional
    /// normalization of locally-built records; never to reject or drop
    /// unrecognized fields.
    pub fn default_fields(&self) -> Fields {
        let mut f = Fields::new();
        match self {
            ResourceKind::Bug => {
                f.set("alias", FieldValue::Array(vec![]));
                f.set("assigned_to_detail", FieldValue::Null);
                f.set("blocks", FieldValue::Array(vec![]));
                f.set("cc_detail", FieldValue::Array(vec![]));
                f.set("classification", "");
                f.set("component", "");
                f.set("creation_time", FieldValue::Null);
                f.set("creator_detail", FieldValue::Null);
                f.set("deadline", FieldValue::Null);
                f.set("depends_on", FieldValue::Array(vec![]));
                f.set("dupe_of", FieldValue::Null);
                f.set("flags", FieldValue::Array(vec![]));
                f.set("groups", FieldValue::Array(vec![]));
                f.set("id", -1i64);
                f.set("is_cc_accessible", false);
                f.set("is_confirmed", false);
                f.set("is_open", false);
                f.set("is_creator_accessible", false);
                f.set("keywords", FieldValue::Array(vec![]));
                f.set("last_change_time", FieldValue::Null);
                f.set("op_sys", "");
                f.set("platform", "");
                f.set("priority", "");
                f.set("product", "");
                f.set("qa_contact_detail", FieldValue::Null);
                f.set("resolution", "");
                f.set("see_also", FieldValue::Array(vec![]));
                f.set("severity", "");
                f.set("status", "");
                f.set("summary", "");
                f.set("target_milestone", "");
                f.set("url", "");
                f.set("version", "");
                f.set("whiteboard", "");
            },
            ResourceKind::Attachment => {
                f.set("data", FieldValue::Bytes(vec![]));
                f.set("creation_time", FieldValue::Null);
                f.set("last_change_time", FieldValue::Null);
                f.set("id", -1i64);
                f.set("bug_id", -1i64);
                f.set("file_name", "");
                f.set("summary", "");
                f.set("content_type", "");
                f.set("is_private", false);
                f.set("is_obsolete", false);
                f.set("is_patch", false);
                f.set("creator", FieldValue::Null);
                f.set("flags", FieldValue::Array(vec![]));
            },
            ResourceKind::Flag => {
                f.set("id", -1i64);
                f.set("name", "");
                f.set("type_id", -1i64);
                f.set("creation_date", FieldValue::Null);
                f.set("modification_date", FieldValue::Null);
                f.set("status", "");
                f.set("setter", FieldValue::Null);
                f.set("requestee", FieldValue::Null);
            },
            ResourceKind::Comment => {
                f.set("id", -1i64);
                f.set("bug_id", -1i64);
                f.set("attachment_id", FieldValue::Null);
                f.set("count", -1i64);
                f.set("text", "");
                f.set("creator", "");
                f.set("time", FieldValue::Null);
                f.set("creation_time", FieldValue::Null);
                f.set("is_private", false);
                f.set("is_markdown", false);
                f.set("tags", FieldValue::Array(vec![]));
            },
            ResourceKind::User => {
                f.set("id", -1i64);
                f.set("real_name", "");
                f.set("email", "");
                f.set("name", "");
                f.set("can_login", true);
                f.set("email_enabled", false);
                f.set("login_denied_text", "");
                f.set("groups", FieldValue::Array(vec![]));
                f.set("saved_searches", FieldValue::Array(vec![]));
                f.set("saved_reports", FieldValue::Array(vec![]));
            },
            ResourceKind::Group => {
                f.set("id", -1i64);
                f.set("name", "");
                f.set("description", "");
                f.set("is_bug_group", false);
                f.set("user_regexp", "");
                f.set("is_active", false);
                f.set("membership", FieldValue::Array(vec![]));
            },
            ResourceKind::History => {
                f.set("when", FieldValue::Null);
                f.set("who", "");
                f.set("changes", FieldValue::Array(vec![]));
            },
            ResourceKind::Change => {
                f.set("added", "");
                f.set("removed", "");
                f.set("field_name", "");
            },
            ResourceKind::Product => {
                f.set("id", -1i64);
                f.set("name", "");
                f.set("description", "");
                f.set("is_active", false);
                f.set("default_milestone", "");
                f.set("has_unconfirmed", false);
                f.set("classification", "");
                f.set("components", FieldValue::Array(vec![]));
                f.set("versions", FieldValue::Array(vec![]));
                f.set("milestones", FieldValue::Array(vec![]));
            },
            ResourceKind::Component => {
                f.set("id", -1i64);
                f.set("name", "");
                f.set("description", "");
                f.set("default_assigned_to", "");
                f.set("default_qa_contact", "");
                f.set("sort_key", 0i64);
                f.set("is_active", false);
            },
            ResourceKind::FlagType => {
                f.set("id", -1i64);
                f.set("name", "");
                f.set("description", "");
                f.set("cc_list", FieldValue::Array(vec![]));
                f.set("sort_key", 0i64);
                f.set("is_active", true);
                f.set("is_requestable", true);
                f.set("is_requesteeble", false);
                f.set("is_multiplicable", true);
                f.set("grant_group", FieldValue::Null);
                f.set("request_group", FieldValue::Null);
                f.set("type", "");
                f.set("values", FieldValue::Array(vec![]));
            },
            ResourceKind::UpdateResult => {
                f.set("changes", FieldValue::Array(vec![]));
                f.set("id", -1i64);
                f.set("last_change_time", FieldValue::Null);
            },
        }
        f
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remote resource instance of a specific kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    kind: ResourceKind,
    fields: Fields,
}

impl ResourceRecord {
    /// Create an empty record. Fields are assigned before submission.
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            fields: Fields::new(),
        }
    }

    pub fn with_fields(kind: ResourceKind, fields: Fields) -> Self {
        Self { kind, fields }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn get(&self, name: &str) -> Result<&FieldValue> {
        self.fields.get(name)
    }

    pub fn try_get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.try_get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.set(name, value);
    }

    pub fn update(&mut self, other: Fields) {
        self.fields.update(other);
    }

    /// Fill missing known fields with the kind defaults. Intended for
    /// locally-built records; wire decode never calls this, since default
    /// values would mask partiality.
    pub fn apply_defaults(&mut self) {
        self.fields.merge_missing(self.kind.default_fields());
    }

    /// Primary key as a path segment, if present and valid.
    pub fn identity(&self) -> Option<String> {
        match self.fields.try_get(self.kind.primary_key())? {
            FieldValue::Number(n) => {
                let id = n.as_i64()?;
                (id >= 0).then(|| id.to_string())
            },
            FieldValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.fields.try_get("id")?.as_i64()
    }

    /// Decode a record from wire JSON. The top level must be a JSON
    /// object; unknown fields are stored verbatim. Kind-specific decode
    /// hooks run afterwards.
    pub fn from_wire(kind: ResourceKind, json: Value) -> Result<Self> {
        let Value::Object(map) = json else {
            return Err(Error::decode(kind, "top-level value is not an object"));
        };
        let mut record = Self {
            kind,
            fields: Fields::from(map),
        };
        record.decode_hook()?;
        Ok(record)
    }

    /// Encode to wire JSON. Bytes fields render as base64 text.
    pub fn to_wire(&self) -> Value {
        Value::Object(self.fields.to_json_map())
    }

    /// Kind-specific wire-to-memory conversions. This is the one place
    /// type coercion happens; everything else passes through verbatim.
    fn decode_hook(&mut self) -> Result<()> {
        if self.kind == ResourceKind::Attachment {
            // data: base64 text on the wire, raw bytes in memory
            if let Some(FieldValue::String(text)) = self.fields.try_get("data") {
                let bytes = BASE64
                    .decode(text.as_bytes())
                    .map_err(|e| Error::decode(self.kind, format!("invalid base64 data: {e}")))?;
                self.fields.set("data", bytes);
            }
            // size is virtual, recomputed from data; the stored payload is
            // the single source of truth
            self.fields.remove("size");
        }
        Ok(())
    }
}

impl Serialize for ResourceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_wire_stores_unknown_fields_verbatim() {
        let record = ResourceRecord::from_wire(
            ResourceKind::Bug,
            json!({"id": 42, "summary": "x", "cf_custom_tracker": "yes"}),
        )
        .unwrap();
        assert_eq!(record.get("cf_custom_tracker").unwrap().as_str(), Some("yes"));
    }

    #[test]
    fn from_wire_rejects_non_object() {
        let err = ResourceRecord::from_wire(ResourceKind::Bug, json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn kind_tag_does_not_shadow_bag_fields() {
        let mut record = ResourceRecord::new(ResourceKind::Bug);
        record.set("kind", "something the server sent");
        assert_eq!(record.kind(), ResourceKind::Bug);
        assert_eq!(record.get("kind").unwrap().as_str(), Some("something the server sent"));
    }

    #[test]
    fn attachment_data_decodes_to_bytes() {
        let record = ResourceRecord::from_wire(
            ResourceKind::Attachment,
            json!({"id": 3, "data": "AP8Q", "size": 3}),
        )
        .unwrap();
        assert_eq!(record.get("data").unwrap().as_bytes(), Some(&[0x00, 0xff, 0x10][..]));
        // virtual size is dropped; data is authoritative
        assert!(record.try_get("size").is_none());
    }

    #[test]
    fn attachment_data_round_trips() {
        let record = ResourceRecord::from_wire(
            ResourceKind::Attachment,
            json!({"id": 3, "data": "AP8Q"}),
        )
        .unwrap();
        let wire = record.to_wire();
        assert_eq!(wire["data"], json!("AP8Q"));
    }

    #[test]
    fn attachment_bad_base64_is_decode_error() {
        let err = ResourceRecord::from_wire(
            ResourceKind::Attachment,
            json!({"id": 3, "data": "!!! not base64 !!!"}),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn apply_defaults_does_not_clobber() {
        let mut bug = ResourceRecord::new(ResourceKind::Bug);
        bug.set("summary", "set before defaults");
        bug.apply_defaults();
        assert_eq!(bug.get("summary").unwrap().as_str(), Some("set before defaults"));
        assert_eq!(bug.get("id").unwrap().as_i64(), Some(-1));
    }

    #[test]
    fn identity_rejects_unset_sentinel() {
        let mut bug = ResourceRecord::new(ResourceKind::Bug);
        bug.apply_defaults();
        assert_eq!(bug.identity(), None);
        bug.set("id", 42i64);
        assert_eq!(bug.identity(), Some("42".to_string()));
    }
}
