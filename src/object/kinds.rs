//! Typed convenience wrappers over [`ResourceRecord`].
//!
//! Each wrapper layers kind-specific accessors and the submission bodies
//! its create/update endpoint accepts on top of the open bag. No wrapper
//! ever rejects or drops unrecognized fields; the remote schema is
//! authoritative.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::time;

use super::record::{ResourceKind, ResourceRecord};
use super::value::FieldValue;

/// Bugzilla-style truthiness, used to decide which optional fields a
/// submission body carries.
fn is_truthy(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => false,
        FieldValue::Bool(b) => *b,
        FieldValue::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(true),
        FieldValue::String(s) => !s.is_empty(),
        FieldValue::Bytes(b) => !b.is_empty(),
        FieldValue::Array(items) => !items.is_empty(),
        FieldValue::Object(fields) => !fields.is_empty(),
    }
}

/// Copy `names` from the record into the body, unconditionally.
fn copy_fields(record: &ResourceRecord, names: &[&str], body: &mut Map<String, Value>) {
    for name in names {
        if let Some(value) = record.try_get(name) {
            body.insert((*name).to_string(), value.to_json());
        }
    }
}

/// Copy `names` from the record into the body, skipping falsy values.
fn copy_truthy_fields(record: &ResourceRecord, names: &[&str], body: &mut Map<String, Value>) {
    for name in names {
        if let Some(value) = record.try_get(name) {
            if is_truthy(value) {
                body.insert((*name).to_string(), value.to_json());
            }
        }
    }
}

/// Wire form of a flag list for attachment/bug submission: the server
/// accepts name, type_id, status and an optional requestee.
fn flag_entries(record: &ResourceRecord) -> Vec<Value> {
    let Some(flags) = record.try_get("flags").and_then(FieldValue::as_array) else {
        return Vec::new();
    };
    flags
        .iter()
        .filter_map(FieldValue::as_object)
        .map(|flag| {
            let mut entry = Map::new();
            for name in ["name", "type_id", "status"] {
                if let Some(value) = flag.try_get(name) {
                    entry.insert(name.to_string(), value.to_json());
                }
            }
            if let Some(requestee) = flag.try_get("requestee") {
                if is_truthy(requestee) {
                    entry.insert("requestee".to_string(), requestee.to_json());
                }
            }
            Value::Object(entry)
        })
        .collect()
}

fn detail_name(record: &ResourceRecord, detail_field: &str) -> Option<String> {
    record
        .try_get(detail_field)?
        .as_object()?
        .try_get("name")?
        .as_str()
        .map(str::to_string)
}

macro_rules! record_wrapper {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            record: ResourceRecord,
        }

        impl $name {
            /// New record with the kind defaults applied.
            pub fn new() -> Self {
                let mut record = ResourceRecord::new($kind);
                record.apply_defaults();
                Self { record }
            }

            pub fn record(&self) -> &ResourceRecord {
                &self.record
            }

            pub fn record_mut(&mut self) -> &mut ResourceRecord {
                &mut self.record
            }

            pub fn into_record(self) -> ResourceRecord {
                self.record
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = ResourceRecord;

            fn deref(&self) -> &ResourceRecord {
                &self.record
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut ResourceRecord {
                &mut self.record
            }
        }

        impl TryFrom<ResourceRecord> for $name {
            type Error = Error;

            fn try_from(record: ResourceRecord) -> Result<Self> {
                if record.kind() != $kind {
                    return Err(Error::decode(
                        $kind,
                        format!("record is a {}, not a {}", record.kind(), $kind),
                    ));
                }
                Ok(Self { record })
            }
        }

        impl From<$name> for ResourceRecord {
            fn from(wrapper: $name) -> ResourceRecord {
                wrapper.record
            }
        }
    };
}

record_wrapper!(
    /// A bug report.
    ///
    /// `assigned_to`, `cc`, `creator` and `qa_contact` are virtual reads
    /// over the corresponding `*_detail` fields; they have no setters.
    Bug,
    ResourceKind::Bug
);

impl Bug {
    const CUSTOM_FIELD_PREFIX: &'static str = "cf_";

    pub fn summary(&self) -> Option<&str> {
        self.try_get("summary")?.as_str()
    }

    pub fn status(&self) -> Option<&str> {
        self.try_get("status")?.as_str()
    }

    pub fn assigned_to(&self) -> Option<String> {
        detail_name(&self.record, "assigned_to_detail")
    }

    pub fn creator(&self) -> Option<String> {
        detail_name(&self.record, "creator_detail")
    }

    pub fn qa_contact(&self) -> Option<String> {
        detail_name(&self.record, "qa_contact_detail")
    }

    pub fn cc(&self) -> Vec<String> {
        let Some(details) = self.try_get("cc_detail").and_then(FieldValue::as_array) else {
            return Vec::new();
        };
        details
            .iter()
            .filter_map(|d| d.as_object()?.try_get("name")?.as_str().map(str::to_string))
            .collect()
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        time::parse_datetime(self.try_get("creation_time")?.as_str()?)
    }

    pub fn last_change_time(&self) -> Option<DateTime<Utc>> {
        time::parse_datetime(self.try_get("last_change_time")?.as_str()?)
    }

    pub fn deadline(&self) -> Option<NaiveDate> {
        time::parse_date(self.try_get("deadline")?.as_str()?)
    }

    /// All `cf_*` fields, which Bugzilla treats as installation-defined.
    pub fn custom_fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields()
            .iter()
            .filter(|(name, _)| name.starts_with(Self::CUSTOM_FIELD_PREFIX))
    }

    /// The documentation-required create fields. The server may require
    /// more depending on configuration.
    pub fn can_be_added(&self) -> bool {
        ["product", "component", "summary", "version"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    /// Body for the create-bug endpoint. Optional fields are only sent
    /// when truthy; the server rejects set-but-invalid values.
    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Bug,
            });
        }
        let mut body = Map::new();
        copy_truthy_fields(
            &self.record,
            &[
                "product",
                "component",
                "summary",
                "version",
                "op_sys",
                "platform",
                "priority",
                "severity",
                "alias",
                "groups",
                "keywords",
                "status",
                "resolution",
                "target_milestone",
            ],
            &mut body,
        );
        if let Some(assignee) = self.assigned_to() {
            body.insert("assigned_to".to_string(), Value::String(assignee));
        }
        if let Some(qa) = self.qa_contact() {
            body.insert("qa_contact".to_string(), Value::String(qa));
        }
        let cc = self.cc();
        if !cc.is_empty() {
            body.insert("cc".to_string(), Value::Array(cc.into_iter().map(Value::String).collect()));
        }
        body.insert("flags".to_string(), Value::Array(flag_entries(&self.record)));
        for (name, value) in self.custom_fields() {
            body.insert(name.to_string(), value.to_json());
        }
        Ok(Value::Object(body))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Bug,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &[
                "is_cc_accessible",
                "op_sys",
                "platform",
                "priority",
                "is_creator_accessible",
                "resolution",
                "severity",
                "status",
                "summary",
                "url",
                "version",
                "whiteboard",
            ],
            &mut body,
        );
        if let Some(assignee) = self.assigned_to() {
            body.insert("assigned_to".to_string(), Value::String(assignee));
        }
        if let Some(qa) = self.qa_contact() {
            body.insert("qa_contact".to_string(), Value::String(qa));
        }
        if let Some(deadline) = self.deadline() {
            body.insert("deadline".to_string(), Value::String(time::encode_date(&deadline)));
        }
        for (name, value) in self.custom_fields() {
            body.insert(name.to_string(), value.to_json());
        }
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A bug attachment.
    ///
    /// `data` is raw bytes in memory and base64 text on the wire. `size`
    /// is virtual, always computed from `data`, and cannot be set.
    Attachment,
    ResourceKind::Attachment
);

impl Attachment {
    pub fn data(&self) -> Result<&[u8]> {
        match self.get("data")? {
            FieldValue::Bytes(b) => Ok(b),
            other => Err(Error::decode(
                ResourceKind::Attachment,
                format!("data field holds {other:?}, not bytes"),
            )),
        }
    }

    pub fn set_data(&mut self, bytes: Vec<u8>) {
        self.set("data", bytes);
    }

    pub fn size(&self) -> Result<usize> {
        self.data().map(<[u8]>::len)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.try_get("file_name")?.as_str()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.try_get("content_type")?.as_str()
    }

    pub fn summary(&self) -> Option<&str> {
        self.try_get("summary")?.as_str()
    }

    pub fn is_patch(&self) -> bool {
        self.try_get("is_patch").and_then(FieldValue::as_bool).unwrap_or(false)
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        time::parse_datetime(self.try_get("creation_time")?.as_str()?)
    }

    pub fn can_be_added(&self) -> bool {
        ["file_name", "summary", "content_type"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Attachment,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["is_patch", "summary", "content_type", "file_name", "is_private"],
            &mut body,
        );
        // to_json renders the Bytes payload as base64
        if let Some(data) = self.try_get("data") {
            body.insert("data".to_string(), data.to_json());
        }
        body.insert("flags".to_string(), Value::Array(flag_entries(&self.record)));
        Ok(Value::Object(body))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Attachment,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["file_name", "summary", "content_type", "is_patch", "is_private", "is_obsolete"],
            &mut body,
        );
        body.insert("flags".to_string(), Value::Array(flag_entries(&self.record)));
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A bug comment.
    Comment,
    ResourceKind::Comment
);

impl Comment {
    pub fn text(&self) -> Option<&str> {
        self.try_get("text")?.as_str()
    }

    pub fn creator(&self) -> Option<&str> {
        self.try_get("creator")?.as_str()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        time::parse_datetime(self.try_get("time")?.as_str()?)
    }

    pub fn can_be_added(&self) -> bool {
        self.try_get("text").map(is_truthy).unwrap_or(false)
    }

    /// Body for the create-comment endpoint; the text field is called
    /// `comment` on the wire.
    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Comment,
            });
        }
        let mut body = Map::new();
        copy_fields(&self.record, &["is_private", "is_markdown"], &mut body);
        if let Some(text) = self.text() {
            body.insert("comment".to_string(), Value::String(text.to_string()));
        }
        if let Some(tags) = self.try_get("tags") {
            if is_truthy(tags) {
                body.insert("comment_tags".to_string(), tags.to_json());
            }
        }
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A Bugzilla user account.
    User,
    ResourceKind::User
);

impl User {
    pub fn email(&self) -> Option<&str> {
        self.try_get("email")?.as_str()
    }

    pub fn login(&self) -> Option<&str> {
        self.try_get("name")?.as_str()
    }

    pub fn real_name(&self) -> Option<&str> {
        self.try_get("real_name")?.as_str()
    }

    pub fn can_be_added(&self) -> bool {
        self.try_get("email").map(is_truthy).unwrap_or(false)
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::User,
            });
        }
        let mut body = Map::new();
        if let Some(email) = self.email() {
            body.insert("email".to_string(), Value::String(email.to_string()));
        }
        if let Some(real_name) = self.real_name() {
            body.insert("full_name".to_string(), Value::String(real_name.to_string()));
        }
        Ok(Value::Object(body))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::User,
            });
        }
        let mut body = Map::new();
        copy_fields(&self.record, &["email", "email_enabled", "login_denied_text"], &mut body);
        if let Some(real_name) = self.real_name() {
            body.insert("full_name".to_string(), Value::String(real_name.to_string()));
        }
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A permission group.
    Group,
    ResourceKind::Group
);

impl Group {
    pub fn name(&self) -> Option<&str> {
        self.try_get("name")?.as_str()
    }

    pub fn description(&self) -> Option<&str> {
        self.try_get("description")?.as_str()
    }

    pub fn can_be_added(&self) -> bool {
        ["name", "description"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Group,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["name", "description", "user_regexp", "is_active"],
            &mut body,
        );
        Ok(Value::Object(body))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Group,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["name", "description", "user_regexp", "is_active"],
            &mut body,
        );
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A product bugs are filed against.
    Product,
    ResourceKind::Product
);

impl Product {
    pub fn name(&self) -> Option<&str> {
        self.try_get("name")?.as_str()
    }

    pub fn can_be_added(&self) -> bool {
        ["name", "description", "version"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Product,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["name", "description", "version", "has_unconfirmed", "classification", "default_milestone"],
            &mut body,
        );
        Ok(Value::Object(body))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Product,
            });
        }
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["name", "default_milestone", "description", "has_unconfirmed"],
            &mut body,
        );
        Ok(Value::Object(body))
    }
}

record_wrapper!(
    /// A component of a product.
    ///
    /// The stored field is `default_assigned_to`, but the create/update
    /// endpoints call it `default_assignee`; the bodies rename it.
    Component,
    ResourceKind::Component
);

impl Component {
    pub fn name(&self) -> Option<&str> {
        self.try_get("name")?.as_str()
    }

    pub fn can_be_added(&self) -> bool {
        ["name", "description", "default_assigned_to"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Component,
            });
        }
        Ok(Value::Object(self.body_fields()))
    }

    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Component,
            });
        }
        Ok(Value::Object(self.body_fields()))
    }

    fn body_fields(&self) -> Map<String, Value> {
        let mut body = Map::new();
        copy_fields(&self.record, &["name", "description", "default_qa_contact"], &mut body);
        if let Some(assignee) = self.try_get("default_assigned_to") {
            body.insert("default_assignee".to_string(), assignee.to_json());
        }
        body
    }
}

record_wrapper!(
    /// A flag type definition.
    FlagType,
    ResourceKind::FlagType
);

impl FlagType {
    pub fn name(&self) -> Option<&str> {
        self.try_get("name")?.as_str()
    }

    pub fn can_be_added(&self) -> bool {
        ["name", "description"]
            .iter()
            .all(|name| self.try_get(name).map(is_truthy).unwrap_or(false))
    }

    pub fn can_be_updated(&self) -> bool {
        self.identity().is_some()
    }

    pub fn add_body(&self) -> Result<Value> {
        if !self.can_be_added() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::FlagType,
            });
        }
        Ok(Value::Object(self.body_fields()))
    }

    /// The update endpoint accepts the same field set as create.
    pub fn update_body(&self) -> Result<Value> {
        if !self.can_be_updated() {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::FlagType,
            });
        }
        Ok(Value::Object(self.body_fields()))
    }

    fn body_fields(&self) -> Map<String, Value> {
        let mut body = Map::new();
        copy_fields(
            &self.record,
            &["name", "description", "is_active", "is_requestable", "cc_list", "is_multiplicable"],
            &mut body,
        );
        copy_truthy_fields(&self.record, &["grant_group", "request_group"], &mut body);
        // the endpoint spells this one without the underscore
        if let Some(sort_key) = self.try_get("sort_key") {
            if is_truthy(sort_key) {
                body.insert("sortkey".to_string(), sort_key.to_json());
            }
        }
        body
    }
}
