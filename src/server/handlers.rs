//! HTTP handlers for every API route
//!
//! Each handler resolves the model from the URL, enforces its access policy,
//! runs the model hooks around the store calls and renders the response
//! envelope.

use super::extract::{ApiQuery, JsonObject};
use super::host::{ApiHost, column_equals};
use super::model_registry::{ModelRegistry, RegisteredModel};
use crate::core::error::{ApiError, ApiResult};
use crate::core::filter::ListQuery;
use crate::core::hooks::RequestContext;
use crate::core::query::{PageLinks, QueryParams};
use crate::core::record::Record;
use crate::core::render::{ListInfo, Renderer, list_envelope, single_envelope, timestamp};
use crate::core::schema::{Attribute, RelationKind, Relationship, WriteMode};
use crate::core::write::WritePlan;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::ALLOW;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Methods announced by OPTIONS requests
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE";

/// Root document: `GET /` and `GET /{version}/`
pub async fn root(State(host): State<Arc<ApiHost>>) -> Json<Value> {
    let mut api = Map::new();
    api.insert(
        "api_version".into(),
        Value::String(host.config.api_version.clone()),
    );
    if let Some(name) = &host.config.api_name {
        api.insert("api_name".into(), Value::String(name.clone()));
    }
    Json(single_envelope("api", Value::Object(api)))
}

/// `POST /{version}/login`: check credentials and issue a token
pub async fn login(
    State(host): State<Arc<ApiHost>>,
    JsonObject(credentials): JsonObject,
) -> ApiResult<Json<Value>> {
    let Some(authenticator) = &host.authenticator else {
        return Err(ApiError::resource_not_found());
    };

    let grant = authenticator
        .authenticate(&credentials)
        .await?
        .ok_or(ApiError::WrongLogin)?;
    let token = host
        .tokens
        .issue(grant.user_id, grant.expiration_hours, grant.counter)?;

    tracing::info!(user_id = grant.user_id, "login successful");

    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert("timestamp".into(), Value::String(timestamp()));
    body.insert("message".into(), Value::String("Login successful".into()));
    body.insert("auth_token".into(), Value::String(token));
    body.insert("user".into(), grant.user);
    Ok(Json(Value::Object(body)))
}

/// `GET /{version}/{resource}`: filtered, sorted, paginated list
pub async fn list(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path(resource): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    model.read_policy.enforce(&ctx.auth)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let list_query = host.list_query(model, &ctx, &params)?;
    let page = host.store.query(&model.schema.name, &list_query).await?;

    let depth = params.effective_depth(model.schema.json.depth, &host.config);
    let items = renderer(&host, model, &ctx, &params)
        .render_list(&page.records, depth)
        .await?;

    let links = PageLinks::new(
        &host.absolute_url(&headers, uri.path()),
        query.raw.as_deref(),
        params.offset,
        params.limit,
        page.count,
    );
    let info = ListInfo {
        sort: params.sort.clone(),
        offset: params.offset,
        limit: params.limit,
        filter: params.filters.clone(),
        count: page.count,
        links,
    };
    Ok(Json(list_envelope(
        &model.schema.list_resource_name(),
        items,
        info,
    )))
}

/// `POST /{version}/{resource}`: create a record
pub async fn create(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path(resource): Path<String>,
    JsonObject(data): JsonObject,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let model = host.model(&resource)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = create_record(&host, model, &ctx, data, Map::new()).await?;
    let body = render_record(&host, model, &ctx, &params, &record).await?;
    Ok((StatusCode::CREATED, Json(body)))
}

/// `GET /{version}/{resource}/{id}`
pub async fn fetch(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.read_policy.enforce(&ctx.auth)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    model.hooks.after_get(&ctx, &record).await?;
    Ok(Json(render_record(&host, model, &ctx, &params, &record).await?))
}

/// `PUT /{version}/{resource}/{id}`
pub async fn update(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id)): Path<(String, String)>,
    JsonObject(data): JsonObject,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    let record = update_record(&host, model, &ctx, &record, data).await?;
    Ok(Json(render_record(&host, model, &ctx, &params, &record).await?))
}

/// `DELETE /{version}/{resource}/{id}`: returns the deleted record
pub async fn delete(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    model.hooks.before_delete(&ctx, &record).await?;
    let body = render_record(&host, model, &ctx, &params, &record).await?;

    detach_dependents(&host, model, &record).await?;
    host.store.delete(&model.schema.name, id).await?;
    tracing::info!(model = %model.schema.name, id, "record deleted");

    model.hooks.after_delete(&ctx, &record).await?;
    Ok(Json(body))
}

/// `GET /{version}/{resource}/{id}/{attribute}`
pub async fn attribute_get(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id, attribute)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.read_policy.enforce(&ctx.auth)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    model.hooks.after_get(&ctx, &record).await?;

    let schema = &model.schema;
    if !schema.is_visible(&attribute) || !model.hooks.show_attribute(&ctx, &record, &attribute) {
        return Err(ApiError::attribute_not_found(attribute));
    }
    model
        .hooks
        .after_attribute_get(&ctx, &record, &attribute)
        .await?;

    let value = match schema.attribute(&attribute) {
        Some(Attribute::Relationship(relationship)) => {
            let target = host.target(&relationship.target)?;
            target.read_policy.enforce(&ctx.auth)?;
            let depth = params.effective_depth(target.schema.json.depth, &host.config);
            renderer(&host, target, &ctx, &params)
                .render_relationship(&record, relationship, depth)
                .await?
        }
        _ => {
            let value = record.get(&attribute).cloned().unwrap_or(Value::Null);
            model.hooks.render_attribute(&ctx, &record, &attribute, value)
        }
    };
    Ok(Json(single_envelope(&attribute, value)))
}

/// `POST /{version}/{resource}/{id}/{attribute}`: create a related record
///
/// The new record is attached to the parent through a 1-n or n-m
/// relationship; the parent is returned.
pub async fn attribute_post(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id, attribute)): Path<(String, String, String)>,
    JsonObject(data): JsonObject,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    let relationship = relationship_of(model, &attribute, "1-n or n-m", |kind| {
        !matches!(kind, RelationKind::ManyToOne { .. })
    })?;
    let target = host.target(&relationship.target)?;
    target.write_policy.enforce(&ctx.auth)?;
    ensure_writable(target)?;

    let mut fixed = Map::new();
    if let RelationKind::OneToMany { remote_key } = &relationship.kind {
        fixed.insert(remote_key.clone(), Value::from(record.id));
    }
    let related = create_record(&host, target, &ctx, data, fixed).await?;
    if let RelationKind::ManyToMany { .. } = &relationship.kind {
        host.store
            .add_association(&model.schema.name, record.id, relationship, related.id)
            .await?;
    }

    model
        .hooks
        .after_attribute_create(&ctx, &record, &attribute, &related)
        .await?;
    Ok(Json(render_record(&host, model, &ctx, &params, &record).await?))
}

/// `PUT /{version}/{resource}/{id}/{attribute}`: update the n-1 related record
pub async fn attribute_put(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id, attribute)): Path<(String, String, String)>,
    JsonObject(data): JsonObject,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    let relationship = relationship_of(model, &attribute, "n-1 or 1-1", |kind| {
        matches!(kind, RelationKind::ManyToOne { .. })
    })?;
    let target = host.target(&relationship.target)?;
    target.write_policy.enforce(&ctx.auth)?;
    ensure_writable(target)?;

    let related = related_record(&host, target, &ctx, &record, relationship).await?;
    let related = update_record(&host, target, &ctx, &related, data).await?;

    model
        .hooks
        .after_attribute_update(&ctx, &record, &attribute, &related)
        .await?;
    Ok(Json(render_record(&host, model, &ctx, &params, &record).await?))
}

/// `DELETE /{version}/{resource}/{id}/{attribute}`: detach the n-1 related record
///
/// The related record is kept; the foreign key of the parent is set to null.
pub async fn attribute_delete(
    State(host): State<Arc<ApiHost>>,
    ctx: RequestContext,
    query: ApiQuery,
    Path((resource, id, attribute)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let model = host.model(&resource)?;
    let id = parse_id(&id)?;
    model.write_policy.enforce(&ctx.auth)?;
    ensure_writable(model)?;
    let params = QueryParams::parse(&query.pairs, &host.config)?;

    let record = host.find(model, &ctx, id).await?;
    let relationship = relationship_of(model, &attribute, "n-1 or 1-1", |kind| {
        matches!(kind, RelationKind::ManyToOne { .. })
    })?;
    let RelationKind::ManyToOne { foreign_key } = &relationship.kind else {
        return Err(ApiError::internal("relationship kind changed"));
    };
    let nullable = model
        .schema
        .columns
        .get(foreign_key)
        .is_some_and(|column| column.nullable);
    if !nullable {
        return Err(ApiError::attribute_wrong(attribute, "may not be null"));
    }

    let target = host.target(&relationship.target)?;
    let related = related_record(&host, target, &ctx, &record, relationship).await?;
    target.hooks.before_delete(&ctx, &related).await?;

    let mut values = Map::new();
    values.insert(foreign_key.clone(), Value::Null);
    let record = host
        .store
        .update(&model.schema.name, record.id, values)
        .await?
        .ok_or_else(ApiError::model_not_found)?;
    tracing::info!(
        model = %model.schema.name,
        id = record.id,
        attribute = %attribute,
        "relationship detached"
    );

    model
        .hooks
        .after_attribute_delete(&ctx, &record, &attribute, &related)
        .await?;
    Ok(Json(render_record(&host, model, &ctx, &params, &record).await?))
}

/// `OPTIONS` on every route
pub async fn options() -> impl IntoResponse {
    (StatusCode::OK, [(ALLOW, ALLOWED_METHODS)])
}

/// Fallback for unmatched routes
pub async fn not_found(State(host): State<Arc<ApiHost>>, uri: Uri) -> ApiError {
    let prefix = host.config.prefix();
    let path = uri.path();
    if path == prefix || path.starts_with(&format!("{}/", prefix)) {
        ApiError::resource_not_found()
    } else {
        ApiError::ModelNotFound(format!(
            "API calls should start with the API version (`{}`)",
            prefix
        ))
    }
}

/// Ids in URLs are decimal digits
fn parse_id(raw: &str) -> ApiResult<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::resource_not_found());
    }
    raw.parse().map_err(|_| ApiError::resource_not_found())
}

fn ensure_writable(model: &RegisteredModel) -> ApiResult<()> {
    if model.schema.read_only {
        return Err(ApiError::ModelReadOnly {
            model: model.schema.name.clone(),
        });
    }
    Ok(())
}

/// Visible relationship `attribute` of `model` whose kind is accepted
fn relationship_of<'m>(
    model: &'m RegisteredModel,
    attribute: &str,
    expected: &str,
    accept: fn(&RelationKind) -> bool,
) -> ApiResult<&'m Relationship> {
    if !model.schema.is_visible(attribute) {
        return Err(ApiError::attribute_not_found(attribute));
    }
    match model.schema.relationships.get(attribute) {
        Some(relationship) if accept(&relationship.kind) => Ok(relationship),
        _ => Err(ApiError::AttributeWrong {
            attribute: Some(format!(
                "{} is not in {} relation to {}.",
                attribute, expected, model.schema.name
            )),
            message: None,
        }),
    }
}

/// The record a to-one relationship of `record` points to
async fn related_record(
    host: &ApiHost,
    target: &RegisteredModel,
    ctx: &RequestContext,
    record: &Record,
    relationship: &Relationship,
) -> ApiResult<Record> {
    let RelationKind::ManyToOne { foreign_key } = &relationship.kind else {
        return Err(ApiError::internal("expected a to-one relationship"));
    };
    let related_id = record
        .foreign_id(foreign_key)
        .ok_or_else(ApiError::model_not_found)?;
    host.find(target, ctx, related_id).await
}

fn renderer<'a>(
    host: &'a ApiHost,
    model: &'a RegisteredModel,
    ctx: &'a RequestContext,
    params: &'a QueryParams,
) -> Renderer<'a, ModelRegistry> {
    Renderer::new(
        host.registry.as_ref(),
        host.store.as_ref(),
        ctx,
        &model.schema.name,
        params,
    )
}

async fn render_record(
    host: &ApiHost,
    model: &RegisteredModel,
    ctx: &RequestContext,
    params: &QueryParams,
    record: &Record,
) -> ApiResult<Value> {
    let depth = params.effective_depth(model.schema.json.depth, &host.config);
    let rendered = renderer(host, model, ctx, params)
        .render_one(record, depth)
        .await?;
    Ok(single_envelope(&model.schema.single_resource_name(), rendered))
}

/// Run the create hooks around inserting a record
async fn create_record(
    host: &ApiHost,
    model: &RegisteredModel,
    ctx: &RequestContext,
    data: Map<String, Value>,
    fixed: Map<String, Value>,
) -> ApiResult<Record> {
    let data = model.hooks.before_create(ctx, &data).await?.unwrap_or(data);
    let plan = WritePlan::prepare_create_with(
        &host.config,
        host.store.as_ref(),
        &model.schema,
        &data,
        fixed,
    )
    .await?;
    let record = plan.insert(host.store.as_ref(), &model.schema.name).await?;
    model.hooks.after_create(ctx, &record).await?;
    Ok(record)
}

/// Run the update hooks around updating a record
async fn update_record(
    host: &ApiHost,
    model: &RegisteredModel,
    ctx: &RequestContext,
    record: &Record,
    data: Map<String, Value>,
) -> ApiResult<Record> {
    let data = model
        .hooks
        .before_update(ctx, record, &data)
        .await?
        .unwrap_or(data);
    let plan = WritePlan::prepare(
        &host.config,
        host.store.as_ref(),
        &model.schema,
        &data,
        WriteMode::Update,
        Some(record),
    )
    .await?;
    let updated = plan
        .update(host.store.as_ref(), &model.schema.name, record.id)
        .await?;
    model.hooks.after_update(ctx, &updated).await?;
    Ok(updated)
}

/// Null the foreign keys pointing at `record` before it is deleted
///
/// Every dependent is checked before anything changes: a dependent record
/// whose foreign key is not nullable aborts the delete.
async fn detach_dependents(
    host: &ApiHost,
    model: &RegisteredModel,
    record: &Record,
) -> ApiResult<()> {
    let name = model.schema.name.as_str();

    // (child model, foreign key column)
    let mut dependents: BTreeSet<(&str, &str)> = BTreeSet::new();
    for other in host.registry.models() {
        for relationship in other.schema.relationships.values() {
            if relationship.target == name
                && let RelationKind::ManyToOne { foreign_key } = &relationship.kind
            {
                dependents.insert((other.schema.name.as_str(), foreign_key.as_str()));
            }
        }
    }
    for relationship in model.schema.relationships.values() {
        if let RelationKind::OneToMany { remote_key } = &relationship.kind {
            dependents.insert((relationship.target.as_str(), remote_key.as_str()));
        }
    }

    let mut detach = Vec::new();
    for (child, column) in dependents {
        let child_model = host.target(child)?;
        let query = ListQuery::all().with_filter(column_equals(column, Value::from(record.id)));
        let page = host.store.query(child, &query).await?;
        if page.records.is_empty() {
            continue;
        }
        let nullable = child_model
            .schema
            .columns
            .get(column)
            .is_some_and(|c| c.nullable);
        if !nullable {
            return Err(ApiError::attribute_wrong(
                child_model.schema.list_resource_name(),
                "has dependent records",
            ));
        }
        detach.push((child, column, page.records));
    }

    for (child, column, records) in detach {
        for dependent in &records {
            let mut values = Map::new();
            values.insert(column.to_string(), Value::Null);
            host.store.update(child, dependent.id, values).await?;
        }
        tracing::debug!(
            model = %child,
            column = %column,
            count = records.len(),
            "detached dependent records"
        );
    }
    Ok(())
}
