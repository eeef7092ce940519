//! In-memory implementation of ModelStore for testing and development

use super::{ModelStore, Page};
use crate::core::filter::{AttributePath, ListQuery, PathTarget};
use crate::core::record::Record;
use crate::core::schema::{PRIMARY_KEY, RelationKind, Relationship};
use crate::core::value::{as_id, sort_order};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

type Row = Map<String, Value>;

#[derive(Debug, Default)]
struct Table {
    last_id: i64,
    rows: BTreeMap<i64, Row>,
}

/// One row of an n-m association table
#[derive(Debug, Clone, PartialEq, Eq)]
struct Association {
    left_model: String,
    left_id: i64,
    right_model: String,
    right_id: i64,
}

impl Association {
    /// The other side of the link when `(model, id)` is one side of it
    fn other(&self, model: &str, id: i64, target: &str) -> Option<i64> {
        if self.left_model == model && self.left_id == id && self.right_model == target {
            Some(self.right_id)
        } else if self.right_model == model && self.right_id == id && self.left_model == target {
            Some(self.left_id)
        } else {
            None
        }
    }

    fn involves(&self, model: &str, id: i64) -> bool {
        (self.left_model == model && self.left_id == id)
            || (self.right_model == model && self.right_id == id)
    }
}

#[derive(Debug, Default)]
struct Tables {
    tables: HashMap<String, Table>,
    associations: HashMap<String, Vec<Association>>,
}

impl Tables {
    fn row(&self, model: &str, id: i64) -> Option<&Row> {
        self.tables.get(model)?.rows.get(&id)
    }

    /// Rows reached from one row through a relationship, ordered by id
    fn related(&self, model: &str, row: &Row, relationship: &Relationship) -> Vec<&Row> {
        let target = relationship.target.as_str();
        let Some(id) = row.get(PRIMARY_KEY).and_then(as_id) else {
            return Vec::new();
        };

        match &relationship.kind {
            RelationKind::ManyToOne { foreign_key } => row
                .get(foreign_key)
                .and_then(as_id)
                .and_then(|fk| self.row(target, fk))
                .into_iter()
                .collect(),
            RelationKind::OneToMany { remote_key } => self
                .tables
                .get(target)
                .map(|table| {
                    table
                        .rows
                        .values()
                        .filter(|r| r.get(remote_key).and_then(as_id) == Some(id))
                        .collect()
                })
                .unwrap_or_default(),
            RelationKind::ManyToMany { secondary } => {
                let mut ids: Vec<i64> = self
                    .associations
                    .get(secondary)
                    .map(|links| {
                        links
                            .iter()
                            .filter_map(|link| link.other(model, id, target))
                            .collect()
                    })
                    .unwrap_or_default();
                ids.sort_unstable();
                ids.dedup();
                ids.into_iter()
                    .filter_map(|id| self.row(target, id))
                    .collect()
            }
        }
    }

    /// Every value a path reaches from `row`, with LEFT JOIN semantics
    ///
    /// A missing related row contributes a single null.
    fn path_values(&self, model: &str, row: &Row, path: &AttributePath) -> Vec<Value> {
        let mut frontier: Vec<Option<(&str, &Row)>> = vec![Some((model, row))];

        for hop in &path.hops {
            let mut next = Vec::new();
            for item in frontier {
                match item {
                    Some((model, row)) => {
                        let related = self.related(model, row, &hop.relationship);
                        if related.is_empty() {
                            next.push(None);
                        }
                        next.extend(
                            related
                                .into_iter()
                                .map(|r| Some((hop.relationship.target.as_str(), r))),
                        );
                    }
                    None => next.push(None),
                }
            }
            frontier = next;
        }

        let mut values = Vec::new();
        for item in frontier {
            let Some((model, row)) = item else {
                values.push(Value::Null);
                continue;
            };
            match &path.target {
                PathTarget::Column { name, json_path } => {
                    let mut value = row.get(name);
                    for key in json_path {
                        value = value.and_then(|v| match v {
                            Value::Object(map) => map.get(key),
                            Value::Array(items) => {
                                key.parse::<usize>().ok().and_then(|i| items.get(i))
                            }
                            _ => None,
                        });
                    }
                    values.push(value.cloned().unwrap_or(Value::Null));
                }
                PathTarget::Relationship(hop) => {
                    let related = self.related(model, row, &hop.relationship);
                    if related.is_empty() {
                        values.push(Value::Null);
                    }
                    values.extend(
                        related
                            .into_iter()
                            .filter_map(|r| r.get(PRIMARY_KEY).cloned()),
                    );
                }
            }
        }
        values
    }
}

/// In-memory model store
///
/// Useful for testing and development. Uses RwLock for thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_record(model: &str, row: &Row) -> Option<Record> {
    let id = row.get(PRIMARY_KEY).and_then(as_id)?;
    Some(Record::new(model, id, row.clone()))
}

#[async_trait]
impl ModelStore for InMemoryStore {
    async fn query(&self, model: &str, query: &ListQuery) -> Result<Page> {
        let tables = self
            .inner
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        let Some(table) = tables.tables.get(model) else {
            return Ok(Page::default());
        };

        // Rows come out of the BTreeMap ordered by id
        let mut rows: Vec<&Row> = table
            .rows
            .values()
            .filter(|row| {
                query.filters.iter().all(|filter| {
                    tables
                        .path_values(model, row, &filter.path)
                        .iter()
                        .any(|value| filter.condition.matches(value))
                })
            })
            .filter(|row| match &query.search {
                Some(search) => search
                    .columns
                    .iter()
                    .any(|column| row.get(column).is_some_and(|v| search.matches(v))),
                None => true,
            })
            .collect();

        if !query.sort.is_empty() {
            let mut keyed: Vec<(Vec<Value>, &Row)> = rows
                .into_iter()
                .map(|row| {
                    let keys = query
                        .sort
                        .iter()
                        .map(|sort| {
                            tables
                                .path_values(model, row, &sort.path)
                                .into_iter()
                                .next()
                                .unwrap_or(Value::Null)
                        })
                        .collect();
                    (keys, row)
                })
                .collect();

            // Stable sort keeps id order among equal keys
            keyed.sort_by(|(a, _), (b, _)| {
                query
                    .sort
                    .iter()
                    .zip(a.iter().zip(b.iter()))
                    .map(|(sort, (a, b))| {
                        let ordering = sort_order(Some(a), Some(b));
                        if sort.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        let count = rows.len();
        let records = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .filter_map(|row| to_record(model, row))
            .collect();

        Ok(Page { records, count })
    }

    async fn get(&self, model: &str, id: i64) -> Result<Option<Record>> {
        let tables = self
            .inner
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(tables.row(model, id).and_then(|row| to_record(model, row)))
    }

    async fn insert(&self, model: &str, mut values: Map<String, Value>) -> Result<Record> {
        let mut tables = self
            .inner
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let table = tables.tables.entry(model.to_string()).or_default();
        table.last_id += 1;
        let id = table.last_id;

        values.insert(PRIMARY_KEY.to_string(), Value::from(id));
        table.rows.insert(id, values.clone());

        Ok(Record::new(model, id, values))
    }

    async fn update(
        &self,
        model: &str,
        id: i64,
        values: Map<String, Value>,
    ) -> Result<Option<Record>> {
        let mut tables = self
            .inner
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let Some(row) = tables
            .tables
            .get_mut(model)
            .and_then(|table| table.rows.get_mut(&id))
        else {
            return Ok(None);
        };

        for (key, value) in values {
            if key != PRIMARY_KEY {
                row.insert(key, value);
            }
        }

        Ok(to_record(model, row))
    }

    async fn delete(&self, model: &str, id: i64) -> Result<Option<Record>> {
        let mut tables = self
            .inner
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let removed = tables
            .tables
            .get_mut(model)
            .and_then(|table| table.rows.remove(&id));

        if removed.is_some() {
            for links in tables.associations.values_mut() {
                links.retain(|link| !link.involves(model, id));
            }
        }

        Ok(removed.and_then(|row| to_record(model, &row)))
    }

    async fn load_related(
        &self,
        model: &str,
        relationship: &Relationship,
        ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Record>>> {
        let tables = self
            .inner
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        let mut related = HashMap::new();
        for &id in ids {
            let Some(row) = tables.row(model, id) else {
                continue;
            };
            let records: Vec<Record> = tables
                .related(model, row, relationship)
                .into_iter()
                .filter_map(|r| to_record(&relationship.target, r))
                .collect();
            if !records.is_empty() {
                related.insert(id, records);
            }
        }

        Ok(related)
    }

    async fn set_associations(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_ids: &[i64],
    ) -> Result<()> {
        let RelationKind::ManyToMany { secondary } = &relationship.kind else {
            return Err(anyhow!("`{}` is not an n-m relationship", relationship.target));
        };

        let mut tables = self
            .inner
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let links = tables.associations.entry(secondary.clone()).or_default();
        links.retain(|link| link.other(model, id, &relationship.target).is_none());
        for &target_id in target_ids {
            links.push(Association {
                left_model: model.to_string(),
                left_id: id,
                right_model: relationship.target.clone(),
                right_id: target_id,
            });
        }

        Ok(())
    }

    async fn add_association(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_id: i64,
    ) -> Result<()> {
        let RelationKind::ManyToMany { secondary } = &relationship.kind else {
            return Err(anyhow!("`{}` is not an n-m relationship", relationship.target));
        };

        let mut tables = self
            .inner
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let links = tables.associations.entry(secondary.clone()).or_default();
        if !links
            .iter()
            .any(|link| link.other(model, id, &relationship.target) == Some(target_id))
        {
            links.push(Association {
                left_model: model.to_string(),
                left_id: id,
                right_model: relationship.target.clone(),
                right_id: target_id,
            });
        }

        Ok(())
    }
}
