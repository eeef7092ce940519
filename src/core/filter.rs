//! Filter language and attribute path planning
//!
//! A filter is a query pair `key=value`. The key names an attribute, possibly
//! through relationships (`author.name`), and its last characters select the
//! comparison:
//!
//! | key        | meaning                      |
//! |------------|------------------------------|
//! | `name=a`   | equal                        |
//! | `name!=a`  | not equal                    |
//! | `age<=3`   | less or equal                |
//! | `age>=3`   | greater or equal             |
//! | `name=a,b` | in list (`!=`: not in list)  |
//! | `name=Jo*` | wildcard match               |
//! | `name=null`| is null (`!=`: is not null)  |
//!
//! A trailing `_` is dropped so attributes named like reserved keys can still
//! be filtered (`limit_=5`). Filtering on a relationship compares related ids
//! (`tags=1,2`, `tags!=null`).
//!
//! Relationships behave like LEFT JOINs: a missing related row yields null, and
//! through to-many relationships a record matches when any related row does.

use crate::core::error::{ApiError, ApiResult};
use crate::core::query::SortKey;
use crate::core::schema::{
    Column, ColumnType, ModelSchema, RelationKind, Relationship, SchemaCatalog,
};
use crate::core::value::{compare, parse_query_value, values_equal};
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// A filter key split into its path and comparison flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub path: Vec<String>,
    pub negate: bool,
    pub less_equal: bool,
    pub greater_equal: bool,
    pub value: String,
}

impl Filter {
    pub fn parse(key: &str, value: &str) -> Self {
        let negate = key.ends_with('!');
        let less_equal = key.ends_with('<');
        let greater_equal = key.ends_with('>');

        let key = key.trim_end_matches(['!', '<', '>']);
        let key = key.strip_suffix('_').unwrap_or(key);

        Self {
            path: key.split('.').map(str::to_string).collect(),
            negate,
            less_equal,
            greater_equal,
            value: value.to_string(),
        }
    }
}

/// One relationship traversed by a path
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    /// Model owning the relationship
    pub source: String,
    pub name: String,
    pub relationship: Relationship,
}

/// What a path ends on
#[derive(Debug, Clone, PartialEq)]
pub enum PathTarget {
    /// A column, optionally descending into a JSON value
    Column { name: String, json_path: Vec<String> },

    /// Ids of the records related through `hop`
    Relationship(Hop),
}

/// A dotted attribute path resolved against the schemas
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePath {
    pub hops: Vec<Hop>,
    pub target: PathTarget,
}

impl AttributePath {
    /// Resolve `segments` starting at `root`
    ///
    /// Leading segments name relationships of the current model, either by
    /// relationship name or by the target model (table, snake or model name).
    /// A segment naming the current model itself is skipped.
    pub fn resolve<C>(catalog: &C, root: &ModelSchema, segments: &[String]) -> ApiResult<Self>
    where
        C: SchemaCatalog + ?Sized,
    {
        let mut current = root;
        let mut hops = Vec::new();

        let Some((last, leading)) = segments.split_last() else {
            return Err(ApiError::AttributeNotFound { attribute: None });
        };

        for (i, segment) in leading.iter().enumerate() {
            // JSON columns swallow the remaining segments
            if let Some(column) = current.columns.get(segment.as_str())
                && column.column_type == ColumnType::Json
                && current.is_visible(segment)
            {
                let json_path = segments[i + 1..].to_vec();
                return Ok(Self {
                    hops,
                    target: PathTarget::Column {
                        name: segment.clone(),
                        json_path,
                    },
                });
            }

            let (name, relationship) = match current.relationships.get_key_value(segment.as_str()) {
                Some((name, rel)) if current.is_visible(name) => (name.clone(), rel.clone()),
                Some(_) => return Err(ApiError::attribute_not_found(segment.clone())),
                None => {
                    let Some(target) = catalog.resolve(segment) else {
                        return Err(ApiError::attribute_not_found(segment.clone()));
                    };
                    if target.name == current.name {
                        continue;
                    }
                    match current
                        .relationships
                        .iter()
                        .find(|(name, rel)| rel.target == target.name && current.is_visible(name))
                    {
                        Some((name, rel)) => (name.clone(), rel.clone()),
                        None => {
                            return Err(ApiError::AttributeWrong {
                                attribute: Some(segment.clone()),
                                message: None,
                            });
                        }
                    }
                }
            };

            let next = catalog
                .schema(&relationship.target)
                .ok_or_else(|| ApiError::attribute_not_found(segment.clone()))?;
            hops.push(Hop {
                source: current.name.clone(),
                name,
                relationship,
            });
            current = next;
        }

        if !current.is_visible(last) {
            return Err(ApiError::attribute_not_found(last.clone()));
        }

        let target = match current.relationships.get(last.as_str()) {
            Some(relationship) => PathTarget::Relationship(Hop {
                source: current.name.clone(),
                name: last.clone(),
                relationship: relationship.clone(),
            }),
            None => PathTarget::Column {
                name: last.clone(),
                json_path: Vec::new(),
            },
        };

        Ok(Self { hops, target })
    }

    /// Whether any hop can yield several rows
    pub fn is_to_many(&self) -> bool {
        self.hops.iter().any(|hop| hop.relationship.is_to_many())
            || matches!(
                &self.target,
                PathTarget::Relationship(hop) if hop.relationship.is_to_many()
            )
    }
}

/// Comparison applied to the values reached by a path
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Le(Value),
    Ge(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Like(Regex),
    NotLike(Regex),
    IsNull,
    IsNotNull,
}

impl Condition {
    /// Evaluate against one value; comparisons involving null are false
    pub fn matches(&self, value: &Value) -> bool {
        if value.is_null() {
            return matches!(self, Condition::IsNull);
        }
        match self {
            Condition::Eq(expected) => values_equal(value, expected),
            Condition::Ne(expected) => !values_equal(value, expected),
            Condition::Le(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Ge(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Condition::In(list) => list.iter().any(|v| values_equal(value, v)),
            Condition::NotIn(list) => !list.iter().any(|v| values_equal(value, v)),
            Condition::Like(re) => re.is_match(&like_text(value)),
            Condition::NotLike(re) => !re.is_match(&like_text(value)),
            Condition::IsNull => false,
            Condition::IsNotNull => true,
        }
    }
}

fn like_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Anchored, case-sensitive regex for a `*` wildcard pattern
pub fn wildcard_regex(pattern: &str) -> ApiResult<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("(?s)^{}$", body)).map_err(|e| ApiError::filter_invalid(e.to_string()))
}

/// A filter ready to be evaluated by a store
#[derive(Debug, Clone)]
pub struct ResolvedFilter {
    pub path: AttributePath,
    pub condition: Condition,
}

impl ResolvedFilter {
    pub fn plan<C>(catalog: &C, root: &ModelSchema, key: &str, value: &str) -> ApiResult<Self>
    where
        C: SchemaCatalog + ?Sized,
    {
        let filter = Filter::parse(key, value);
        let path = AttributePath::resolve(catalog, root, &filter.path)?;

        let condition = match &path.target {
            PathTarget::Relationship(hop) => relationship_condition(&hop.name, &filter)?,
            PathTarget::Column { name, json_path } => {
                let owner = match path.hops.last() {
                    Some(hop) => catalog
                        .schema(&hop.relationship.target)
                        .ok_or_else(|| ApiError::attribute_not_found(name.clone()))?,
                    None => root,
                };
                let column = owner
                    .columns
                    .get(name.as_str())
                    .ok_or_else(|| ApiError::attribute_not_found(name.clone()))?;
                // Values inside JSON documents are compared untyped
                let column = if json_path.is_empty() {
                    column.clone()
                } else {
                    Column::json().nullable()
                };
                column_condition(name, &column, &filter)?
            }
        };

        tracing::debug!(filter = %key, value = %value, ?condition, "planned filter");
        Ok(Self { path, condition })
    }
}

fn column_condition(name: &str, column: &Column, filter: &Filter) -> ApiResult<Condition> {
    let value = filter.value.as_str();
    let ranged = filter.less_equal || filter.greater_equal;

    if value.contains(',') {
        if ranged {
            return Err(ApiError::filter_invalid(
                "Less or greater equal only allowed with single values.",
            ));
        }
        let list = value
            .split(',')
            .map(|item| parse_query_value(name, column, item))
            .collect::<ApiResult<Vec<_>>>()?;
        return Ok(if filter.negate {
            Condition::NotIn(list)
        } else {
            Condition::In(list)
        });
    }

    if value.contains('*') {
        if ranged {
            return Err(ApiError::filter_invalid(
                "Less or greater equal is not allowed for wildcards (`*`).",
            ));
        }
        parse_query_value(name, column, value)?;
        let re = wildcard_regex(value)?;
        return Ok(if filter.negate {
            Condition::NotLike(re)
        } else {
            Condition::Like(re)
        });
    }

    if value.eq_ignore_ascii_case("null") {
        if ranged {
            return Err(ApiError::filter_invalid(
                "Less or greater equal is not allowed with `null`.",
            ));
        }
        return Ok(if filter.negate {
            Condition::IsNotNull
        } else {
            Condition::IsNull
        });
    }

    let value = parse_query_value(name, column, value)?;
    Ok(if filter.negate {
        Condition::Ne(value)
    } else if filter.less_equal {
        Condition::Le(value)
    } else if filter.greater_equal {
        Condition::Ge(value)
    } else {
        Condition::Eq(value)
    })
}

fn relationship_condition(name: &str, filter: &Filter) -> ApiResult<Condition> {
    if filter.value.eq_ignore_ascii_case("null") {
        return Ok(if filter.negate {
            Condition::IsNotNull
        } else {
            Condition::IsNull
        });
    }

    let ids = filter
        .value
        .split(',')
        .map(|raw| {
            raw.trim().parse::<i64>().map(Value::from).map_err(|_| {
                ApiError::attribute_wrong(name, format!("\"{}\" is not a valid number", raw))
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(if filter.negate {
        Condition::NotIn(ids)
    } else {
        Condition::In(ids)
    })
}

/// A sort key ready to be evaluated by a store
#[derive(Debug, Clone)]
pub struct ResolvedSort {
    pub path: AttributePath,
    pub descending: bool,
}

impl ResolvedSort {
    /// Resolve a sort key; paths through to-many relationships are rejected
    pub fn plan<C>(catalog: &C, root: &ModelSchema, key: &SortKey) -> ApiResult<Self>
    where
        C: SchemaCatalog + ?Sized,
    {
        let mut path = AttributePath::resolve(catalog, root, &key.path)?;

        if path.is_to_many() {
            return Err(ApiError::param_wrong(format!(
                "can't sort by to-many relationship `{}`",
                key.path.join(".")
            )));
        }

        // A to-one relationship sorts by its foreign key
        if let PathTarget::Relationship(hop) = &path.target
            && let RelationKind::ManyToOne { foreign_key } = &hop.relationship.kind
        {
            path.target = PathTarget::Column {
                name: foreign_key.clone(),
                json_path: Vec::new(),
            };
        }

        Ok(Self {
            path,
            descending: key.descending,
        })
    }
}

/// Free-text search over some columns of the root model
#[derive(Debug, Clone)]
pub struct Search {
    /// Lower-cased search term
    pub term: String,
    pub columns: Vec<String>,
}

impl Search {
    pub fn new(term: &str, columns: Vec<String>) -> Self {
        Self {
            term: term.to_lowercase(),
            columns,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(&self.term))
    }
}

/// Everything a store needs to answer a list request
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filters: Vec<ResolvedFilter>,
    pub sort: Vec<ResolvedSort>,
    pub search: Option<Search>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ListQuery {
    /// Query matching everything, unpaginated
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: ResolvedFilter) -> Self {
        self.filters.push(filter);
        self
    }
}
