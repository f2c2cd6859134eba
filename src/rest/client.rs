//! Bugzilla connection handle.
//!
//! Owns the base URL, the API key and the HTTP client, and exposes the
//! per-endpoint operations as thin call sites over the dispatcher: build a
//! descriptor, perform it, decode the records.

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::dispatch::{self, ListChange, Operation, QueryParams, RequestDescriptor};
use crate::error::{Error, Result};
use crate::object::{
    Attachment, Bug, Comment, Component, FieldValue, Fields, FlagType, Group, LazyRecord,
    Product, ResourceKind, ResourceRecord, User,
};

use super::http::RestHttpClient;

/// Connection to one Bugzilla instance.
///
/// Cheap to clone; clones share the underlying HTTP client. The API key,
/// when set, is attached to every request as the `api_key` query
/// parameter; the core never handles credentials elsewhere.
#[derive(Clone)]
pub struct Bugzilla {
    base: Url,
    api_key: Option<String>,
    http: RestHttpClient,
}

impl Bugzilla {
    /// Connect to the instance at `url`. The URL must end with `/`; the
    /// `rest/` suffix is appended when missing.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self> {
        if !url.ends_with('/') {
            return Err(Error::transport("base URL must end with '/'"));
        }
        let mut base = Url::parse(url)
            .map_err(|e| Error::transport(format!("invalid base URL: {e}")))?;
        if !base.path().ends_with("rest/") {
            base = base
                .join("rest/")
                .map_err(|e| Error::transport(format!("invalid base URL: {e}")))?;
        }

        Ok(Self {
            base,
            api_key,
            http: RestHttpClient::new()?,
        })
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn set_api_key(&mut self, key: Option<String>) {
        self.api_key = key;
    }

    /// Execute one descriptor. Exactly one HTTP call per descriptor.
    pub async fn perform_request(&self, descriptor: &RequestDescriptor) -> Result<Value> {
        let mut url = self
            .base
            .join(&descriptor.path)
            .map_err(|e| Error::transport(format!("invalid request path: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(key) = &self.api_key {
                pairs.append_pair("api_key", key);
            }
            for (name, value) in &descriptor.query {
                pairs.append_pair(name, value);
            }
        }
        self.http
            .execute(descriptor.method.clone(), url, descriptor.body.as_ref())
            .await
    }

    async fn call(
        &self,
        kind: ResourceKind,
        op: Operation,
        identity: Option<&str>,
        params: &QueryParams,
        body: Option<Value>,
    ) -> Result<Vec<ResourceRecord>> {
        let descriptor = dispatch::build(kind, op, identity, params, body)?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(kind, response)
    }

    /// Full-fetch for a lazy record's identity: the complete remote field
    /// set for one resource.
    pub(crate) async fn fetch_full(
        &self,
        kind: ResourceKind,
        identity: &str,
    ) -> Result<ResourceRecord> {
        let records = self
            .call(kind, Operation::Get, Some(identity), &QueryParams::new(), None)
            .await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| Error::decode(kind, "full-fetch returned no records"))
    }

    // =========================================================================
    // Instance metadata
    // =========================================================================

    /// Server version string, usually `X.X` or `X.X.X`.
    pub async fn version(&self) -> Result<String> {
        let descriptor = RequestDescriptor::new(Method::GET, "version");
        let response = self.perform_request(&descriptor).await?;
        response
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Decode("version response missing 'version'".to_string()))
    }

    // =========================================================================
    // Bugs
    // =========================================================================

    /// Get one bug by numeric id or alias.
    pub async fn get_bug(&self, id_or_alias: &str) -> Result<Bug> {
        let records = self
            .call(ResourceKind::Bug, Operation::Get, Some(id_or_alias), &QueryParams::new(), None)
            .await?;
        first(records, ResourceKind::Bug)?.try_into()
    }

    /// Get one bug restricted to `include_fields`. The result is partial:
    /// accessing an elided field triggers a lazy full-fetch.
    pub async fn get_bug_partial(
        &self,
        id_or_alias: &str,
        include_fields: &[&str],
    ) -> Result<LazyRecord> {
        let params = QueryParams::new().set_list("include_fields", include_fields);
        let records = self
            .call(ResourceKind::Bug, Operation::Get, Some(id_or_alias), &params, None)
            .await?;
        let record = first(records, ResourceKind::Bug)?;
        Ok(LazyRecord::new(self.clone(), ResourceKind::Bug, id_or_alias, record))
    }

    /// Search bugs; see the Bugzilla search documentation for the
    /// accepted parameters.
    pub async fn search_bugs(&self, params: &QueryParams) -> Result<Vec<Bug>> {
        let records = self
            .call(ResourceKind::Bug, Operation::Search, None, params, None)
            .await?;
        records.into_iter().map(Bug::try_from).collect()
    }

    /// Create a bug, returning its new id.
    pub async fn create_bug(&self, bug: &Bug) -> Result<i64> {
        let body = bug.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::Bug, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::Bug)
    }

    /// Update one or more bugs from the record's updatable fields.
    /// `ids` defaults to the bug's own id. Array-valued fields mutate
    /// through `changes`, the add/remove/set convention of the endpoint.
    pub async fn update_bug(
        &self,
        bug: &Bug,
        ids: Option<&[i64]>,
        changes: &[(&str, ListChange)],
    ) -> Result<Vec<ResourceRecord>> {
        let own = bug.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord { kind: ResourceKind::Bug });
        };
        let mut body = bug.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        dispatch::extend_body_with_list_changes(&mut body, changes);
        let descriptor = dispatch::build(
            ResourceKind::Bug,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    /// All history entries for a bug.
    pub async fn bug_history(&self, id_or_alias: &str) -> Result<Vec<ResourceRecord>> {
        self.call(
            ResourceKind::History,
            Operation::History,
            Some(id_or_alias),
            &QueryParams::new(),
            None,
        )
        .await
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    /// Get one attachment by id.
    pub async fn get_attachment(&self, id: i64) -> Result<Attachment> {
        let records = self
            .call(
                ResourceKind::Attachment,
                Operation::Get,
                Some(&id.to_string()),
                &QueryParams::new(),
                None,
            )
            .await?;
        first(records, ResourceKind::Attachment)?.try_into()
    }

    /// All attachments of a bug.
    pub async fn attachments_for_bug(&self, bug_id: i64) -> Result<Vec<Attachment>> {
        let records = self
            .call(
                ResourceKind::Attachment,
                Operation::Search,
                Some(&bug_id.to_string()),
                &QueryParams::new(),
                None,
            )
            .await?;
        records.into_iter().map(Attachment::try_from).collect()
    }

    /// Attach a file to one or more bugs. `comment` accompanies the
    /// attachment per the endpoint's calling convention. Returns the new
    /// attachment ids.
    pub async fn add_attachment(
        &self,
        attachment: &Attachment,
        bug_ids: &[i64],
        comment: &str,
    ) -> Result<Vec<i64>> {
        let Some(&primary) = bug_ids.first() else {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Attachment,
            });
        };
        let mut body = attachment.add_body()?;
        dispatch::extend_body_with_ids(&mut body, bug_ids);
        if let Value::Object(map) = &mut body {
            map.insert("comment".to_string(), Value::String(comment.to_string()));
        }
        let descriptor = dispatch::build(
            ResourceKind::Attachment,
            Operation::Create,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        id_list(response.get("ids"))
            .ok_or_else(|| Error::decode(ResourceKind::Attachment, "create response missing 'ids'"))
    }

    /// Update one or more attachments. `ids` defaults to the
    /// attachment's own id.
    pub async fn update_attachment(
        &self,
        attachment: &Attachment,
        ids: Option<&[i64]>,
        comment: &str,
    ) -> Result<Vec<ResourceRecord>> {
        let own = attachment.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Attachment,
            });
        };
        let mut body = attachment.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        if let Value::Object(map) = &mut body {
            map.insert("comment".to_string(), Value::String(comment.to_string()));
        }
        let descriptor = dispatch::build(
            ResourceKind::Attachment,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    // =========================================================================
    // Comments
    // =========================================================================

    /// Get one comment by id.
    pub async fn get_comment(&self, id: i64) -> Result<Comment> {
        let records = self
            .call(
                ResourceKind::Comment,
                Operation::Get,
                Some(&id.to_string()),
                &QueryParams::new(),
                None,
            )
            .await?;
        first(records, ResourceKind::Comment)?.try_into()
    }

    /// All comments of a bug.
    pub async fn comments_for_bug(&self, bug_id: i64) -> Result<Vec<Comment>> {
        let records = self
            .call(
                ResourceKind::Comment,
                Operation::Search,
                Some(&bug_id.to_string()),
                &QueryParams::new(),
                None,
            )
            .await?;
        records.into_iter().map(Comment::try_from).collect()
    }

    /// Comment on a bug, returning the new comment id.
    pub async fn add_comment(&self, comment: &Comment, bug_id: i64) -> Result<i64> {
        let body = comment.add_body()?;
        let descriptor = dispatch::build(
            ResourceKind::Comment,
            Operation::Create,
            Some(&bug_id.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::Comment)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Get one user by numeric id or login name.
    pub async fn get_user(&self, id_or_login: &str) -> Result<User> {
        let records = self
            .call(ResourceKind::User, Operation::Get, Some(id_or_login), &QueryParams::new(), None)
            .await?;
        first(records, ResourceKind::User)?.try_into()
    }

    /// Search users by ids, names, match strings or groups.
    pub async fn search_users(&self, params: &QueryParams) -> Result<Vec<User>> {
        let records = self
            .call(ResourceKind::User, Operation::Search, None, params, None)
            .await?;
        records.into_iter().map(User::try_from).collect()
    }

    /// The user the API key belongs to.
    pub async fn whoami(&self) -> Result<User> {
        let descriptor = RequestDescriptor::new(Method::GET, "whoami");
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode_one(ResourceKind::User, response)?.try_into()
    }

    /// A lazily-loaded user known only by login name. No request is made
    /// until a missing field is accessed.
    pub fn lazy_user(&self, login: &str) -> LazyRecord {
        let mut record = ResourceRecord::new(ResourceKind::User);
        record.set("name", login);
        LazyRecord::new(self.clone(), ResourceKind::User, login, record)
    }

    /// The requestee of a flag, as a partial user record. Flags expose a
    /// reduced user field set, so the result is lazy. `None` when the
    /// flag has no requestee.
    pub fn requestee_of(&self, flag: &Fields) -> Option<LazyRecord> {
        self.partial_user(flag.try_get("requestee")?)
    }

    /// The user behind one of a record's reduced user nests, e.g. a bug's
    /// `assigned_to_detail` or a flag's `setter`. `None` when the field is
    /// absent or carries no usable identity.
    pub fn user_of(&self, record: &ResourceRecord, field: &str) -> Option<LazyRecord> {
        self.partial_user(record.try_get(field)?)
    }

    /// Reduced user nests arrive either as a bare login string or as an
    /// object with a subset of the user fields.
    fn partial_user(&self, nest: &FieldValue) -> Option<LazyRecord> {
        if let Some(login) = nest.as_str() {
            return Some(self.lazy_user(login));
        }
        let fields = nest.as_object()?.clone();
        let record = ResourceRecord::with_fields(ResourceKind::User, fields);
        let identity = record
            .identity()
            .or_else(|| record.try_get("name")?.as_str().map(str::to_string))
            .or_else(|| record.try_get("email")?.as_str().map(str::to_string))?;
        Some(LazyRecord::new(self.clone(), ResourceKind::User, identity, record))
    }

    /// Create a user account, returning its new id.
    pub async fn create_user(&self, user: &User) -> Result<i64> {
        let body = user.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::User, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::User)
    }

    /// Update one or more user accounts.
    pub async fn update_user(
        &self,
        user: &User,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ResourceRecord>> {
        let own = user.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord { kind: ResourceKind::User });
        };
        let mut body = user.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        let descriptor = dispatch::build(
            ResourceKind::User,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Get one group by numeric id or name.
    pub async fn get_group(&self, id_or_name: &str) -> Result<Group> {
        let records = self
            .call(ResourceKind::Group, Operation::Get, Some(id_or_name), &QueryParams::new(), None)
            .await?;
        first(records, ResourceKind::Group)?.try_into()
    }

    /// Search groups by ids or names.
    pub async fn search_groups(&self, params: &QueryParams) -> Result<Vec<Group>> {
        let records = self
            .call(ResourceKind::Group, Operation::Search, None, params, None)
            .await?;
        records.into_iter().map(Group::try_from).collect()
    }

    /// Create a group, returning its new id.
    pub async fn create_group(&self, group: &Group) -> Result<i64> {
        let body = group.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::Group, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::Group)
    }

    /// Update one or more groups.
    pub async fn update_group(
        &self,
        group: &Group,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ResourceRecord>> {
        let own = group.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord { kind: ResourceKind::Group });
        };
        let mut body = group.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        let descriptor = dispatch::build(
            ResourceKind::Group,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Get one product by id or name.
    pub async fn get_product(&self, id_or_name: &str) -> Result<Product> {
        let records = self
            .call(ResourceKind::Product, Operation::Get, Some(id_or_name), &QueryParams::new(), None)
            .await?;
        first(records, ResourceKind::Product)?.try_into()
    }

    /// Create a product, returning its new id.
    pub async fn create_product(&self, product: &Product) -> Result<i64> {
        let body = product.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::Product, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::Product)
    }

    /// Update one or more products.
    pub async fn update_product(
        &self,
        product: &Product,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ResourceRecord>> {
        let own = product.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord { kind: ResourceKind::Product });
        };
        let mut body = product.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        let descriptor = dispatch::build(
            ResourceKind::Product,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    /// Ids of products the caller can select bugs against.
    pub async fn selectable_product_ids(&self) -> Result<Vec<i64>> {
        self.product_ids("product_selectable").await
    }

    /// Ids of products the caller can access.
    pub async fn accessible_product_ids(&self) -> Result<Vec<i64>> {
        self.product_ids("product_accessible").await
    }

    /// Ids of products the caller can enter bugs into.
    pub async fn enterable_product_ids(&self) -> Result<Vec<i64>> {
        self.product_ids("product_enterable").await
    }

    async fn product_ids(&self, path: &str) -> Result<Vec<i64>> {
        let descriptor = RequestDescriptor::new(Method::GET, path);
        let response = self.perform_request(&descriptor).await?;
        let mut ids = id_list(response.get("ids"))
            .ok_or_else(|| Error::decode(ResourceKind::Product, "response missing 'ids'"))?;
        ids.sort_unstable();
        Ok(ids)
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Create a component, returning its new id.
    pub async fn create_component(&self, component: &Component) -> Result<i64> {
        let body = component.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::Component, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::Component)
    }

    /// Update one or more components.
    pub async fn update_component(
        &self,
        component: &Component,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ResourceRecord>> {
        let own = component.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::Component,
            });
        };
        let mut body = component.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        let descriptor = dispatch::build(
            ResourceKind::Component,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }

    /// Delete a component, returning the id the server confirms.
    pub async fn delete_component(&self, id: i64) -> Result<i64> {
        let descriptor = dispatch::build(
            ResourceKind::Component,
            Operation::Delete,
            Some(&id.to_string()),
            &QueryParams::new(),
            None,
        )?;
        let response = self.perform_request(&descriptor).await?;
        response
            .get("components")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::decode(ResourceKind::Component, "delete response missing 'components'"))
    }

    // =========================================================================
    // Flag types
    // =========================================================================

    /// Create a flag type, returning its new id.
    pub async fn create_flag_type(&self, flag_type: &FlagType) -> Result<i64> {
        let body = flag_type.add_body()?;
        let descriptor =
            dispatch::build(ResourceKind::FlagType, Operation::Create, None, &QueryParams::new(), Some(body))?;
        let response = self.perform_request(&descriptor).await?;
        created_id(&response, ResourceKind::FlagType)
    }

    /// Update one or more flag types.
    pub async fn update_flag_type(
        &self,
        flag_type: &FlagType,
        ids: Option<&[i64]>,
    ) -> Result<Vec<ResourceRecord>> {
        let own = flag_type.id().into_iter().collect::<Vec<_>>();
        let ids = ids.unwrap_or(&own);
        let Some(&primary) = ids.first() else {
            return Err(Error::IncompleteRecord {
                kind: ResourceKind::FlagType,
            });
        };
        let mut body = flag_type.update_body()?;
        dispatch::extend_body_with_ids(&mut body, ids);
        let descriptor = dispatch::build(
            ResourceKind::FlagType,
            Operation::Update,
            Some(&primary.to_string()),
            &QueryParams::new(),
            Some(body),
        )?;
        let response = self.perform_request(&descriptor).await?;
        dispatch::decode(ResourceKind::UpdateResult, response)
    }
}

/// Create responses carry the new id as `id` or, on some endpoints and
/// server versions, as a one-element `ids` list.
fn created_id(response: &Value, kind: ResourceKind) -> Result<i64> {
    response
        .get("id")
        .and_then(Value::as_i64)
        .or_else(|| {
            id_list(response.get("ids")).and_then(|ids| ids.first().copied())
        })
        .ok_or_else(|| Error::decode(kind, "create response missing 'id'"))
}

fn first(records: Vec<ResourceRecord>, kind: ResourceKind) -> Result<ResourceRecord> {
    records
        .into_iter()
        .next()
        .ok_or_else(|| Error::decode(kind, "empty response"))
}

/// Id lists arrive as numbers or numeric strings depending on server
/// version.
fn id_list(value: Option<&Value>) -> Option<Vec<i64>> {
    let items = value?.as_array()?;
    items
        .iter()
        .map(|item| {
            item.as_i64()
                .or_else(|| item.as_str().and_then(|s| s.parse().ok()))
        })
        .collect()
}
