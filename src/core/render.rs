//! JSON rendering of records and response envelopes
//!
//! Relationships are rendered according to the depth of the record being
//! rendered:
//!
//! - depth 0: relationships are omitted (nothing is loaded)
//! - depth 1: relationships render as ids
//! - depth 2+: relationships render as objects at depth - 1
//!
//! An expanded relationship always renders as objects, at the same depth as
//! its parent. Related rows are loaded once per relationship and nesting
//! level for all records of that level, so a page of N records costs one
//! store call per rendered relationship, not N.

use crate::core::error::{ApiError, ApiResult};
use crate::core::hooks::{HookCatalog, RequestContext};
use crate::core::query::{AttributeSelection, MAX_NESTING, PageLinks, QueryParams, Scoped};
use crate::core::record::Record;
use crate::core::schema::{Attribute, ModelSchema, RelationKind, Relationship, SchemaCatalog};
use crate::storage::ModelStore;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;

type RenderFuture<'b> = Pin<Box<dyn Future<Output = ApiResult<Vec<Value>>> + Send + 'b>>;

/// How one attribute of a model is rendered
enum Field<'s> {
    Column(&'s str),
    Omitted,
    Ids(&'s str, &'s Relationship),
    Nested {
        name: &'s str,
        relationship: &'s Relationship,
        depth: u32,
    },
}

impl Field<'_> {
    fn name(&self) -> Option<&str> {
        match self {
            Field::Column(name) | Field::Ids(name, _) | Field::Nested { name, .. } => Some(name),
            Field::Omitted => None,
        }
    }
}

/// Renders records of one request
pub struct Renderer<'a, C: ?Sized> {
    catalog: &'a C,
    store: &'a dyn ModelStore,
    ctx: &'a RequestContext,
    root_model: &'a str,
    attributes: &'a AttributeSelection,
    expand: &'a [Scoped],
}

impl<'a, C> Renderer<'a, C>
where
    C: SchemaCatalog + HookCatalog + Sync + ?Sized,
{
    pub fn new(
        catalog: &'a C,
        store: &'a dyn ModelStore,
        ctx: &'a RequestContext,
        root_model: &'a str,
        params: &'a QueryParams,
    ) -> Self {
        Self {
            catalog,
            store,
            ctx,
            root_model,
            attributes: &params.attributes,
            expand: &params.expand,
        }
    }

    /// Render one record of the requested model
    pub async fn render_one(&self, record: &Record, depth: u32) -> ApiResult<Value> {
        let mut rendered = self
            .render_level(self.root_model, std::slice::from_ref(record), depth, 0)
            .await?;
        Ok(rendered.pop().unwrap_or(Value::Null))
    }

    /// Render a page of records of the requested model
    pub async fn render_list(&self, records: &[Record], depth: u32) -> ApiResult<Vec<Value>> {
        self.render_level(self.root_model, records, depth, 0).await
    }

    /// Render the value of a relationship of one record
    ///
    /// To-one relationships render as an object or null, to-many as an array.
    pub async fn render_relationship(
        &self,
        record: &Record,
        relationship: &Relationship,
        depth: u32,
    ) -> ApiResult<Value> {
        let related = self
            .store
            .load_related(&record.model, relationship, &[record.id])
            .await?
            .remove(&record.id)
            .unwrap_or_default();
        let rendered = self
            .render_level(&relationship.target, &related, depth, 1)
            .await?;

        if relationship.is_to_many() {
            Ok(Value::Array(rendered))
        } else {
            Ok(rendered.into_iter().next().unwrap_or(Value::Null))
        }
    }

    /// Whether a scoped request parameter applies to `model`
    fn applies(&self, scoped: &Scoped, model: &str) -> bool {
        match &scoped.model {
            None => model == self.root_model,
            Some(scope) => {
                model != self.root_model
                    && self.catalog.resolve(scope).is_some_and(|s| s.name == model)
            }
        }
    }

    fn expanded(&self, schema: &ModelSchema) -> BTreeSet<String> {
        let mut expanded: BTreeSet<String> = self
            .expand
            .iter()
            .filter(|scoped| self.applies(scoped, &schema.name))
            .map(|scoped| scoped.name.clone())
            .collect();
        expanded.extend(schema.json.expand.iter().cloned());
        expanded
    }

    /// Attribute names rendered for `schema`, in output order
    fn attribute_names<'s>(
        &self,
        schema: &'s ModelSchema,
        expanded: &BTreeSet<String>,
    ) -> Vec<&'s str> {
        let candidates: Vec<&'s str> = match &schema.json.include {
            Some(include) => include
                .iter()
                .filter_map(|name| schema.attribute_names().find(|n| *n == name.as_str()))
                .collect(),
            None => schema.attribute_names().collect(),
        };

        let requested: Vec<&str> = self
            .attributes
            .include
            .iter()
            .filter(|scoped| self.applies(scoped, &schema.name))
            .map(|scoped| scoped.name.as_str())
            .collect();
        let refused: Vec<&str> = self
            .attributes
            .exclude
            .iter()
            .filter(|scoped| self.applies(scoped, &schema.name))
            .map(|scoped| scoped.name.as_str())
            .collect();

        candidates
            .into_iter()
            .filter(|name| !ModelSchema::is_hidden(name) && !schema.is_private(name))
            .filter(|name| {
                !schema.json.exclude.iter().any(|e| e == name) || expanded.contains(*name)
            })
            .filter(|name| !refused.contains(name))
            .filter(|name| requested.is_empty() || requested.contains(name))
            .collect()
    }

    fn plan<'s>(&self, schema: &'s ModelSchema, depth: u32, level: u32) -> Vec<Field<'s>> {
        let expanded = self.expanded(schema);
        self.attribute_names(schema, &expanded)
            .into_iter()
            .map(|name| match schema.attribute(name) {
                Some(Attribute::Relationship(relationship)) => {
                    let is_expanded = expanded.contains(name);
                    if level >= MAX_NESTING {
                        Field::Ids(name, relationship)
                    } else if is_expanded || depth > 1 {
                        Field::Nested {
                            name,
                            relationship,
                            depth: if is_expanded { depth } else { depth - 1 },
                        }
                    } else if depth == 1 {
                        Field::Ids(name, relationship)
                    } else {
                        Field::Omitted
                    }
                }
                _ => Field::Column(name),
            })
            .filter(|field| !matches!(field, Field::Omitted))
            .collect()
    }

    fn render_level<'b>(
        &'b self,
        model: &'b str,
        records: &'b [Record],
        depth: u32,
        level: u32,
    ) -> RenderFuture<'b> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(Vec::new());
            }
            let schema = self
                .catalog
                .schema(model)
                .ok_or_else(|| ApiError::internal(format!("model `{}` is not registered", model)))?;
            let hooks = self.catalog.hooks(model);
            let fields = self.plan(schema, depth, level);
            let ids: Vec<i64> = records.iter().map(|r| r.id).collect();

            // One batch per relationship that needs loading
            let mut loaded: HashMap<&str, HashMap<i64, Vec<Value>>> = HashMap::new();
            for field in &fields {
                match field {
                    Field::Nested {
                        name,
                        relationship,
                        depth,
                    } => {
                        let related = self.store.load_related(model, relationship, &ids).await?;
                        let (owners, flat): (Vec<i64>, Vec<Record>) = ids
                            .iter()
                            .flat_map(|id| {
                                related
                                    .get(id)
                                    .into_iter()
                                    .flatten()
                                    .map(move |record| (*id, record.clone()))
                            })
                            .unzip();
                        let rendered = self
                            .render_level(&relationship.target, &flat, *depth, level + 1)
                            .await?;
                        let mut by_owner: HashMap<i64, Vec<Value>> = HashMap::new();
                        for (owner, value) in owners.into_iter().zip(rendered) {
                            by_owner.entry(owner).or_default().push(value);
                        }
                        loaded.insert(*name, by_owner);
                    }
                    Field::Ids(name, relationship)
                        if !matches!(relationship.kind, RelationKind::ManyToOne { .. }) =>
                    {
                        let related = self.store.load_related(model, relationship, &ids).await?;
                        let by_owner = related
                            .into_iter()
                            .map(|(owner, records)| {
                                (owner, records.iter().map(|r| Value::from(r.id)).collect())
                            })
                            .collect();
                        loaded.insert(*name, by_owner);
                    }
                    _ => {}
                }
            }

            let mut output = Vec::with_capacity(records.len());
            for record in records {
                let mut object = Map::new();
                for field in &fields {
                    let Some(name) = field.name() else { continue };
                    if !hooks.show_attribute(self.ctx, record, name) {
                        continue;
                    }
                    let value = match field {
                        Field::Column(name) => record.get(name).cloned().unwrap_or(Value::Null),
                        Field::Ids(_, relationship) => match &relationship.kind {
                            RelationKind::ManyToOne { foreign_key } => record
                                .foreign_id(foreign_key)
                                .map(Value::from)
                                .unwrap_or(Value::Null),
                            _ => related_value(relationship, loaded.get(name), record.id),
                        },
                        Field::Nested { relationship, .. } => {
                            related_value(relationship, loaded.get(name), record.id)
                        }
                        Field::Omitted => continue,
                    };
                    let value = hooks.render_attribute(self.ctx, record, name, value);
                    object.insert(name.to_string(), value);
                }
                output.push(Value::Object(object));
            }
            Ok(output)
        })
    }
}

fn related_value(
    relationship: &Relationship,
    loaded: Option<&HashMap<i64, Vec<Value>>>,
    id: i64,
) -> Value {
    let values = loaded.and_then(|by_owner| by_owner.get(&id));
    if relationship.is_to_many() {
        Value::Array(values.cloned().unwrap_or_default())
    } else {
        values
            .and_then(|values| values.first().cloned())
            .unwrap_or(Value::Null)
    }
}

/// Current time as sent in every envelope
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn envelope(resource: &str, payload: Value, info: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(true));
    body.insert("timestamp".into(), Value::String(timestamp()));
    body.extend(info);
    body.insert("resource".into(), Value::String(resource.to_string()));
    body.insert(resource.to_string(), payload);
    Value::Object(body)
}

/// Envelope of a single record, attribute value or the root document
pub fn single_envelope(resource: &str, payload: Value) -> Value {
    envelope(resource, payload, Map::new())
}

/// Pagination details of a list response
#[derive(Debug, Clone)]
pub struct ListInfo {
    pub sort: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub filter: Vec<(String, String)>,
    pub count: usize,
    pub links: PageLinks,
}

/// Envelope of a page of records
pub fn list_envelope(resource: &str, items: Vec<Value>, info: ListInfo) -> Value {
    let mut fields = Map::new();
    fields.insert("sort".into(), info.sort.map(Value::String).unwrap_or(Value::Null));
    fields.insert("offset".into(), Value::from(info.offset));
    fields.insert("limit".into(), Value::from(info.limit));
    fields.insert(
        "filter".into(),
        Value::Array(
            info.filter
                .into_iter()
                .map(|(k, v)| Value::Array(vec![Value::String(k), Value::String(v)]))
                .collect(),
        ),
    );
    fields.insert("count".into(), Value::from(info.count));
    fields.insert(
        "previous".into(),
        info.links.previous.map(Value::String).unwrap_or(Value::Null),
    );
    fields.insert(
        "next".into(),
        info.links.next.map(Value::String).unwrap_or(Value::Null),
    );
    envelope(resource, Value::Array(items), fields)
}
