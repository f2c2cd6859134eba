//! Request dispatch: REST call descriptors and response decoding.
//!
//! Maps (resource kind, operation) pairs to Bugzilla REST paths and turns
//! response JSON back into records. The transport call itself belongs to
//! the connection; nothing here touches the network.

use reqwest::Method;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::object::{ResourceKind, ResourceRecord};

/// The operations the dispatcher knows request templates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Search,
    Create,
    Update,
    Delete,
    History,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Search => "search",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::History => "history",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-specified pending HTTP-level call. Immutable once built;
/// exactly one descriptor maps to one `perform_request` call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the `rest/` base.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, params: &QueryParams) -> Self {
        self.query = params.pairs().to_vec();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Query parameters with the Bugzilla calling conventions applied:
/// sequences supplied for `include_fields`/`exclude_fields` are
/// comma-joined, other list parameters repeat the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn set_list(mut self, key: &str, values: &[&str]) -> Self {
        if key == "include_fields" || key == "exclude_fields" {
            self.pairs.push((key.to_string(), values.join(",")));
        } else {
            for value in values {
                self.pairs.push((key.to_string(), (*value).to_string()));
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

fn quote(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn require_identity(
    identity: Option<&str>,
    kind: ResourceKind,
    op: Operation,
) -> Result<String> {
    // an identity-less call has no template for these pairs
    identity.map(quote).ok_or(Error::UnsupportedOperation {
        kind,
        operation: op.as_str(),
    })
}

/// Build the request descriptor for a kind/operation pair.
///
/// Fails fast with [`Error::UnsupportedOperation`] when no template is
/// registered, before any network call. `identity` is the primary key (or
/// alias/login, where the API accepts one); for sub-resource searches it
/// is the owning bug's id.
pub fn build(
    kind: ResourceKind,
    op: Operation,
    identity: Option<&str>,
    params: &QueryParams,
    body: Option<Value>,
) -> Result<RequestDescriptor> {
    use Operation as Op;
    use ResourceKind as Kind;

    let (method, path) = match (kind, op) {
        (Kind::Bug, Op::Get) => {
            (Method::GET, format!("bug/{}", require_identity(identity, kind, op)?))
        },
        (Kind::Bug, Op::Search) => (Method::GET, "bug".to_string()),
        (Kind::Bug, Op::Create) => (Method::POST, "bug".to_string()),
        (Kind::Bug, Op::Update) => {
            (Method::PUT, format!("bug/{}", require_identity(identity, kind, op)?))
        },
        // history is addressed through the owning bug
        (Kind::Bug | Kind::History, Op::History) => (
            Method::GET,
            format!("bug/{}/history", require_identity(identity, kind, op)?),
        ),

        (Kind::Attachment, Op::Get) => (
            Method::GET,
            format!("bug/attachment/{}", require_identity(identity, kind, op)?),
        ),
        (Kind::Attachment, Op::Search) => (
            Method::GET,
            format!("bug/{}/attachment", require_identity(identity, kind, op)?),
        ),
        (Kind::Attachment, Op::Create) => (
            Method::POST,
            format!("bug/{}/attachment", require_identity(identity, kind, op)?),
        ),
        (Kind::Attachment, Op::Update) => (
            Method::PUT,
            format!("bug/attachment/{}", require_identity(identity, kind, op)?),
        ),

        (Kind::Comment, Op::Get) => (
            Method::GET,
            format!("bug/comment/{}", require_identity(identity, kind, op)?),
        ),
        (Kind::Comment, Op::Search) => (
            Method::GET,
            format!("bug/{}/comment", require_identity(identity, kind, op)?),
        ),
        (Kind::Comment, Op::Create) => (
            Method::POST,
            format!("bug/{}/comment", require_identity(identity, kind, op)?),
        ),

        (Kind::User, Op::Get) => {
            (Method::GET, format!("user/{}", require_identity(identity, kind, op)?))
        },
        (Kind::User, Op::Search) => (Method::GET, "user".to_string()),
        (Kind::User, Op::Create) => (Method::POST, "user".to_string()),
        (Kind::User, Op::Update) => {
            (Method::PUT, format!("user/{}", require_identity(identity, kind, op)?))
        },

        (Kind::Group, Op::Get) => {
            (Method::GET, format!("group/{}", require_identity(identity, kind, op)?))
        },
        (Kind::Group, Op::Search) => (Method::GET, "group".to_string()),
        (Kind::Group, Op::Create) => (Method::POST, "group".to_string()),
        (Kind::Group, Op::Update) => {
            (Method::PUT, format!("group/{}", require_identity(identity, kind, op)?))
        },

        (Kind::Product, Op::Get) => (
            Method::GET,
            format!("product/{}", require_identity(identity, kind, op)?),
        ),
        (Kind::Product, Op::Search) => (Method::GET, "product".to_string()),
        (Kind::Product, Op::Create) => (Method::POST, "product".to_string()),
        (Kind::Product, Op::Update) => (
            Method::PUT,
            format!("product/{}", require_identity(identity, kind, op)?),
        ),

        (Kind::Component, Op::Create) => (Method::POST, "component".to_string()),
        (Kind::Component, Op::Update) => (
            Method::PUT,
            format!("component/{}", require_identity(identity, kind, op)?),
        ),
        (Kind::Component, Op::Delete) => (
            Method::DELETE,
            format!("component/{}", require_identity(identity, kind, op)?),
        ),

        (Kind::FlagType, Op::Create) => (Method::POST, "flag_type".to_string()),
        (Kind::FlagType, Op::Update) => (
            Method::PUT,
            format!("flag_type/{}", require_identity(identity, kind, op)?),
        ),

        _ => {
            return Err(Error::UnsupportedOperation {
                kind,
                operation: op.as_str(),
            })
        },
    };

    tracing::debug!(%kind, %op, %path, "built request descriptor");

    let mut descriptor = RequestDescriptor::new(method, path).with_query(params);
    if let Some(body) = body {
        descriptor = descriptor.with_body(body);
    }
    Ok(descriptor)
}

/// Decode a response into records of the given kind.
///
/// Handles the wire shapes the REST API produces: a collection nested
/// under the kind's top-level key (`{"bugs": [...]}`), by-id object maps
/// (`{"attachments": {"3": {...}}}`), per-bug nesting
/// (`{"bugs": {"42": [...]}}`, `{"bugs": {"42": {"comments": [...]}}}`,
/// `{"bugs": [{"history": [...]}]}`), and a bare single object (`whoami`).
pub fn decode(kind: ResourceKind, response: Value) -> Result<Vec<ResourceRecord>> {
    let Value::Object(mut map) = response else {
        return Err(Error::decode(kind, "response is not a JSON object"));
    };

    // history rides inside the owning bug
    if kind == ResourceKind::History {
        let bugs = map
            .remove("bugs")
            .ok_or_else(|| Error::decode(kind, "missing 'bugs' key"))?;
        let Value::Array(bugs) = bugs else {
            return Err(Error::decode(kind, "'bugs' is not an array"));
        };
        let mut records = Vec::new();
        for bug in bugs {
            let Some(Value::Array(entries)) = bug.get("history").cloned() else {
                return Err(Error::decode(kind, "bug entry has no 'history' array"));
            };
            for entry in entries {
                records.push(ResourceRecord::from_wire(kind, entry)?);
            }
        }
        return Ok(records);
    }

    // comments arrive under a by-id map, a per-bug nest, or both
    if kind == ResourceKind::Comment {
        let mut found = false;
        let mut records = Vec::new();
        if let Some(Value::Object(comments)) = map.remove("comments") {
            found = true;
            for (_, comment) in comments {
                records.push(ResourceRecord::from_wire(kind, comment)?);
            }
        }
        if let Some(Value::Object(bugs)) = map.remove("bugs") {
            found = true;
            for (_, entry) in bugs {
                if let Some(Value::Array(comments)) = entry.get("comments").cloned() {
                    for comment in comments {
                        records.push(ResourceRecord::from_wire(kind, comment)?);
                    }
                }
            }
        }
        if !found {
            return Err(Error::decode(kind, "no comment nest in response"));
        }
        return Ok(records);
    }

    if let Some(nested) = map.remove(kind.collection_key()) {
        return decode_collection(kind, nested);
    }

    // sub-resources of a bug nest under "bugs" keyed by bug id; an array
    // under "bugs" is a different shape (update results) handled below
    if matches!(map.get("bugs"), Some(Value::Object(_))) {
        if let Some(Value::Object(bugs)) = map.remove("bugs") {
            let mut records = Vec::new();
            for (_, entry) in bugs {
                match entry {
                    Value::Array(items) => {
                        for item in items {
                            records.push(ResourceRecord::from_wire(kind, item)?);
                        }
                    },
                    other => records.push(ResourceRecord::from_wire(kind, other)?),
                }
            }
            return Ok(records);
        }
    }

    // update results come back under the updated kind's plural key
    if map.len() == 1 {
        let key = map.keys().next().cloned();
        if let Some(key) = key {
            if let Some(Value::Array(_)) = map.get(&key) {
                let nested = map.remove(&key).unwrap_or(Value::Null);
                return decode_collection(kind, nested);
            }
        }
    }

    // bare single object
    ResourceRecord::from_wire(kind, Value::Object(map)).map(|r| vec![r])
}

fn decode_collection(kind: ResourceKind, nested: Value) -> Result<Vec<ResourceRecord>> {
    match nested {
        Value::Array(items) => items
            .into_iter()
            .map(|item| ResourceRecord::from_wire(kind, item))
            .collect(),
        // by-id map, e.g. GET bug/attachment/{id}
        Value::Object(by_id) => {
            let mut records = Vec::new();
            for (_, entry) in by_id {
                match entry {
                    Value::Array(items) => {
                        for item in items {
                            records.push(ResourceRecord::from_wire(kind, item)?);
                        }
                    },
                    other => records.push(ResourceRecord::from_wire(kind, other)?),
                }
            }
            Ok(records)
        },
        _ => Err(Error::decode(kind, "collection value is neither array nor object")),
    }
}

/// Decode a response expected to carry exactly one record.
pub fn decode_one(kind: ResourceKind, response: Value) -> Result<ResourceRecord> {
    decode(kind, response)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::decode(kind, "empty response"))
}

/// Build an `{"ids": [...]}`-style body extension used by bulk updates.
pub fn extend_body_with_ids(body: &mut Value, ids: &[i64]) {
    if let Value::Object(map) = body {
        map.insert(
            "ids".to_string(),
            Value::Array(ids.iter().map(|id| Value::from(*id)).collect()),
        );
    }
}

/// Mutation of an array-valued update field.
///
/// Bugzilla updates list fields (keywords, groups, cc, ...) through an
/// `{"add": [...], "remove": [...]}` or `{"set": [...]}` object. The API
/// rejects `set` combined with `add`/`remove` on the same field, so the
/// two forms are separate variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ListChange {
    AddRemove { add: Vec<Value>, remove: Vec<Value> },
    Set(Vec<Value>),
}

impl ListChange {
    pub fn add<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ListChange::AddRemove {
            add: values.into_iter().map(Into::into).collect(),
            remove: Vec::new(),
        }
    }

    pub fn remove<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ListChange::AddRemove {
            add: Vec::new(),
            remove: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace the whole list. An empty `set` clears the field.
    pub fn set<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ListChange::Set(values.into_iter().map(Into::into).collect())
    }

    pub fn to_json(&self) -> Value {
        let mut entry = serde_json::Map::new();
        match self {
            ListChange::AddRemove { add, remove } => {
                if !add.is_empty() {
                    entry.insert("add".to_string(), Value::Array(add.clone()));
                }
                if !remove.is_empty() {
                    entry.insert("remove".to_string(), Value::Array(remove.clone()));
                }
            },
            ListChange::Set(values) => {
                entry.insert("set".to_string(), Value::Array(values.clone()));
            },
        }
        Value::Object(entry)
    }
}

/// Merge list-field mutations into an update body. Later entries for the
/// same field overwrite earlier ones, like the scalar fields they ride
/// next to.
pub fn extend_body_with_list_changes(body: &mut Value, changes: &[(&str, ListChange)]) {
    if let Value::Object(map) = body {
        for (field, change) in changes {
            map.insert((*field).to_string(), change.to_json());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_get_bug_quotes_identity() {
        let descriptor = build(
            ResourceKind::Bug,
            Operation::Get,
            Some("dupe of #1"),
            &QueryParams::new(),
            None,
        )
        .unwrap();
        assert_eq!(descriptor.method, Method::GET);
        assert_eq!(descriptor.path, "bug/dupe%20of%20%231");
        assert!(descriptor.body.is_none());
    }

    #[test]
    fn build_unknown_pair_fails_fast() {
        let err = build(
            ResourceKind::Comment,
            Operation::Delete,
            Some("1"),
            &QueryParams::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedOperation {
                kind: ResourceKind::Comment,
                operation: "delete"
            }
        ));
    }

    #[test]
    fn build_history_accepts_both_kind_spellings() {
        for kind in [ResourceKind::History, ResourceKind::Bug] {
            let descriptor =
                build(kind, Operation::History, Some("3"), &QueryParams::new(), None).unwrap();
            assert_eq!(descriptor.method, Method::GET);
            assert_eq!(descriptor.path, "bug/3/history");
        }
    }

    #[test]
    fn list_changes_take_the_wire_shape() {
        assert_eq!(
            ListChange::add(["key", "word"]).to_json(),
            json!({"add": ["key", "word"]})
        );
        assert_eq!(ListChange::remove(["old"]).to_json(), json!({"remove": ["old"]}));
        assert_eq!(
            ListChange::set(Vec::<&str>::new()).to_json(),
            json!({"set": []})
        );

        let mut body = json!({"status": "RESOLVED"});
        extend_body_with_list_changes(
            &mut body,
            &[("keywords", ListChange::add(["regression"]))],
        );
        assert_eq!(body["keywords"], json!({"add": ["regression"]}));
        assert_eq!(body["status"], json!("RESOLVED"));
    }

    #[test]
    fn build_identity_addressed_without_identity_fails() {
        let err = build(
            ResourceKind::Bug,
            Operation::Get,
            None,
            &QueryParams::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn include_fields_are_comma_joined() {
        let params = QueryParams::new()
            .set_list("include_fields", &["id", "summary"])
            .set_list("ids", &["1", "2"]);
        assert_eq!(
            params.pairs(),
            &[
                ("include_fields".to_string(), "id,summary".to_string()),
                ("ids".to_string(), "1".to_string()),
                ("ids".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn decode_bug_collection() {
        let records = decode(
            ResourceKind::Bug,
            json!({"bugs": [{"id": 42, "summary": "x"}]}),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id").unwrap().as_i64(), Some(42));
        assert_eq!(records[0].get("summary").unwrap().as_str(), Some("x"));
    }

    #[test]
    fn decode_attachment_by_id_map() {
        let records = decode(
            ResourceKind::Attachment,
            json!({"attachments": {"3": {"id": 3, "data": "AP8Q"}}}),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get("data").unwrap().as_bytes(),
            Some(&[0x00, 0xff, 0x10][..])
        );
    }

    #[test]
    fn decode_attachments_nested_by_bug() {
        let records = decode(
            ResourceKind::Attachment,
            json!({"bugs": {"42": [{"id": 3, "data": ""}, {"id": 4, "data": ""}]}}),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decode_history_nested_in_bug() {
        let records = decode(
            ResourceKind::History,
            json!({"bugs": [{"id": 42, "history": [
                {"when": "2024-03-01T12:30:00Z", "who": "a@b.com", "changes": []}
            ]}]}),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("who").unwrap().as_str(), Some("a@b.com"));
    }

    #[test]
    fn decode_comments_mixed_nests() {
        let records = decode(
            ResourceKind::Comment,
            json!({
                "comments": {"11": {"id": 11, "text": "direct"}},
                "bugs": {"42": {"comments": [{"id": 12, "text": "nested"}]}}
            }),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decode_bare_object_is_single_record() {
        let records = decode(ResourceKind::User, json!({"id": 7, "name": "me@x.com"})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("id").unwrap().as_i64(), Some(7));
    }

    #[test]
    fn decode_update_results_under_foreign_key() {
        let records = decode(
            ResourceKind::UpdateResult,
            json!({"bugs": [{"id": 42, "changes": {}, "last_change_time": "2024-03-01T12:30:00Z"}]}),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), ResourceKind::UpdateResult);
    }

    #[test]
    fn decode_non_object_fails() {
        assert!(decode(ResourceKind::Bug, json!(["not", "an", "object"])).is_err());
    }
}
