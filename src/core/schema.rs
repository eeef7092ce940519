//! Model metadata
//!
//! A [`ModelSchema`] describes one resource: its columns (type, nullability,
//! default), its relationships to other models, and the rendering and write
//! rules that apply to it. Everything the API does is derived from this
//! metadata.
//!
//! Schemas can be declared in code:
//!
//! ```rust,ignore
//! let post = ModelSchema::new("BlogPost")
//!     .column("title", Column::string().max_length(200))
//!     .column("author_id", Column::integer().nullable())
//!     .relationship("author", Relationship::many_to_one("User", "author_id"))
//!     .relationship("tags", Relationship::many_to_many("Tag", "post_tags"))
//!     .expand(["author"]);
//! ```
//!
//! or in the YAML configuration under `models:`:
//!
//! ```yaml
//! models:
//!   - name: BlogPost
//!     columns:
//!       title: { type: string, max_length: 200 }
//!       author_id: { type: integer, nullable: true }
//!     relationships:
//!       author: { target: User, kind: many_to_one, foreign_key: author_id }
//! ```

use crate::core::naming;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Name of the primary key every model carries
pub const PRIMARY_KEY: &str = "id";

/// Write-only attribute available on models with `password: true`
pub const PASSWORD_ATTRIBUTE: &str = "password";
pub const PASSWORD_HASH_COLUMN: &str = "_password";
pub const PASSWORD_COUNTER_COLUMN: &str = "_password_counter";

/// Storage type of a column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Decimal,
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Text,
    Boolean,
    DateTime,
    Enum {
        values: Vec<String>,
    },
    Json,
}

impl ColumnType {
    /// Whether values are strings that can be matched by `search` and wildcards
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::String { .. } | ColumnType::Text | ColumnType::Enum { .. }
        )
    }
}

/// A column definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    #[serde(flatten)]
    pub column_type: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    fn of(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: false,
            default: None,
            primary_key: false,
        }
    }

    pub fn integer() -> Self {
        Self::of(ColumnType::Integer)
    }

    pub fn float() -> Self {
        Self::of(ColumnType::Float)
    }

    pub fn decimal() -> Self {
        Self::of(ColumnType::Decimal)
    }

    pub fn string() -> Self {
        Self::of(ColumnType::String { max_length: None })
    }

    pub fn text() -> Self {
        Self::of(ColumnType::Text)
    }

    pub fn boolean() -> Self {
        Self::of(ColumnType::Boolean)
    }

    pub fn datetime() -> Self {
        Self::of(ColumnType::DateTime)
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(ColumnType::Enum {
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn json() -> Self {
        Self::of(ColumnType::Json)
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Limit the length of a string column (no effect on other types)
    pub fn max_length(mut self, len: usize) -> Self {
        if let ColumnType::String { max_length } = &mut self.column_type {
            *max_length = Some(len);
        }
        self
    }

    /// A create without this column fails unless it is nullable or defaulted
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.primary_key
    }
}

/// How two models are related
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// n-1 or 1-1: `foreign_key` on this model holds the target id
    ManyToOne { foreign_key: String },

    /// 1-n: `remote_key` on the target model holds this model's id
    OneToMany { remote_key: String },

    /// n-m through the association table `secondary`
    ManyToMany { secondary: String },
}

/// A relationship definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    /// Name of the target model
    pub target: String,

    #[serde(flatten)]
    pub kind: RelationKind,
}

impl Relationship {
    pub fn many_to_one(target: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::ManyToOne {
                foreign_key: foreign_key.into(),
            },
        }
    }

    pub fn one_to_many(target: impl Into<String>, remote_key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::OneToMany {
                remote_key: remote_key.into(),
            },
        }
    }

    pub fn many_to_many(target: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            kind: RelationKind::ManyToMany {
                secondary: secondary.into(),
            },
        }
    }

    /// Whether the relationship yields a collection
    pub fn is_to_many(&self) -> bool {
        !matches!(self.kind, RelationKind::ManyToOne { .. })
    }
}

/// Rendering rules of a model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JsonOptions {
    /// Only these attributes are rendered (default: all)
    pub include: Option<Vec<String>>,

    /// Not rendered unless explicitly expanded
    pub exclude: Vec<String>,

    /// Never rendered nor filterable
    pub private: Vec<String>,

    /// Relationships expanded by default
    pub expand: Vec<String>,

    /// Default depth when the request doesn't specify one
    pub depth: Option<u32>,
}

/// Write rules of a model
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WriteOptions {
    pub writable: Vec<String>,
    pub read_only: Vec<String>,
    pub create_writable: Vec<String>,
    pub create_read_only: Vec<String>,
    pub update_writable: Vec<String>,
    pub update_read_only: Vec<String>,
}

/// Access policy names for a model
///
/// Names are parsed by [`AuthPolicy::parse_policy`](crate::core::auth::AuthPolicy::parse_policy).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AccessOptions {
    pub read: Option<String>,
    pub write: Option<String>,
}

/// Which kind of write is being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

/// A column or a relationship of a model
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'a> {
    Column(&'a Column),
    Relationship(&'a Relationship),
}

/// Metadata of one model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSchema {
    /// CamelCase model name
    pub name: String,

    /// Collection name used in URLs (default: plural of the snake-cased name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(default)]
    pub columns: IndexMap<String, Column>,

    #[serde(default)]
    pub relationships: IndexMap<String, Relationship>,

    #[serde(default)]
    pub json: JsonOptions,

    #[serde(default)]
    pub write: WriteOptions,

    /// Reject every write on this model
    #[serde(default)]
    pub read_only: bool,

    /// Columns matched by the `search` parameter (default: textual columns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<Vec<String>>,

    /// Add a write-only `password` attribute stored as a bcrypt hash
    #[serde(default)]
    pub password: bool,

    #[serde(default)]
    pub access: AccessOptions,
}

impl ModelSchema {
    /// Create a schema with only the integer primary key
    pub fn new(name: impl Into<String>) -> Self {
        let mut columns = IndexMap::new();
        columns.insert(PRIMARY_KEY.to_string(), Column::integer().primary_key());
        Self {
            name: name.into(),
            table: None,
            columns,
            relationships: IndexMap::new(),
            json: JsonOptions::default(),
            write: WriteOptions::default(),
            read_only: false,
            searchable: None,
            password: false,
            access: AccessOptions::default(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    pub fn relationship(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.insert(name.into(), relationship);
        self
    }

    pub fn include<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json.include = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json.exclude.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn private<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json.private.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn expand<I, S>(mut self, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.json.expand.extend(relationships.into_iter().map(Into::into));
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.json.depth = Some(depth);
        self
    }

    pub fn write_options(mut self, options: WriteOptions) -> Self {
        self.write = options;
        self
    }

    pub fn read_only_model(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn searchable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_password(mut self) -> Self {
        self.password = true;
        self
    }

    pub fn access(mut self, read: impl Into<String>, write: impl Into<String>) -> Self {
        self.access = AccessOptions {
            read: Some(read.into()),
            write: Some(write.into()),
        };
        self
    }

    /// Fill in implicit columns (primary key, password storage)
    ///
    /// Called when the model is registered; calling it twice is harmless.
    pub fn normalized(mut self) -> Self {
        if !self.columns.contains_key(PRIMARY_KEY) {
            self.columns
                .shift_insert(0, PRIMARY_KEY.to_string(), Column::integer().primary_key());
        }
        if self.password {
            self.columns
                .entry(PASSWORD_HASH_COLUMN.to_string())
                .or_insert_with(|| Column::string().max_length(60).nullable());
            self.columns
                .entry(PASSWORD_COUNTER_COLUMN.to_string())
                .or_insert_with(|| Column::integer().default_value(0));
        }
        self
    }

    /// Name used for a single record in responses (`blog_post`)
    pub fn single_resource_name(&self) -> String {
        naming::snake_case(&self.name)
    }

    /// Name used for collections in URLs and responses (`blog_posts`)
    pub fn list_resource_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| naming::table_name(&self.name))
    }

    /// Look up a column or relationship by name
    pub fn attribute(&self, name: &str) -> Option<Attribute<'_>> {
        if let Some(column) = self.columns.get(name) {
            return Some(Attribute::Column(column));
        }
        self.relationships.get(name).map(Attribute::Relationship)
    }

    /// All attribute names: columns first, then relationships, in declaration order
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.columns
            .keys()
            .chain(self.relationships.keys())
            .map(String::as_str)
    }

    /// Attributes starting with `_` are internal
    pub fn is_hidden(name: &str) -> bool {
        name.starts_with('_')
    }

    pub fn is_private(&self, name: &str) -> bool {
        self.json.private.iter().any(|p| p == name)
    }

    /// Whether an attribute may be read, filtered or sorted on by clients
    pub fn is_visible(&self, name: &str) -> bool {
        !Self::is_hidden(name) && !self.is_private(name) && self.attribute(name).is_some()
    }

    /// Columns matched by the `search` parameter
    pub fn searchable_columns(&self) -> Vec<String> {
        match &self.searchable {
            Some(columns) => columns.clone(),
            None => self
                .columns
                .iter()
                .filter(|(name, column)| {
                    column.column_type.is_textual() && self.is_visible(name)
                })
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }

    /// Attributes that can't be written in `mode`
    pub fn read_only_attributes(&self, global: &[String], mode: WriteMode) -> BTreeSet<String> {
        let mut attrs: BTreeSet<String> = global.iter().cloned().collect();
        attrs.extend(self.write.read_only.iter().cloned());
        match mode {
            WriteMode::Create => attrs.extend(self.write.create_read_only.iter().cloned()),
            WriteMode::Update => attrs.extend(self.write.update_read_only.iter().cloned()),
        }
        attrs.insert(PRIMARY_KEY.to_string());
        attrs.extend(
            self.attribute_names()
                .filter(|name| Self::is_hidden(name))
                .map(str::to_string),
        );
        attrs
    }

    /// Attributes a client may write in `mode`
    ///
    /// The union of the global, model and mode-specific writable lists; an empty
    /// union means every attribute. Read-only attributes are removed afterwards.
    pub fn writable_attributes(
        &self,
        global_writable: &[String],
        global_read_only: &[String],
        mode: WriteMode,
    ) -> BTreeSet<String> {
        let mut attrs: BTreeSet<String> = global_writable.iter().cloned().collect();
        attrs.extend(self.write.writable.iter().cloned());
        match mode {
            WriteMode::Create => attrs.extend(self.write.create_writable.iter().cloned()),
            WriteMode::Update => attrs.extend(self.write.update_writable.iter().cloned()),
        }

        let mut defined: BTreeSet<String> =
            self.attribute_names().map(str::to_string).collect();
        if self.password {
            defined.insert(PASSWORD_ATTRIBUTE.to_string());
        }

        let mut attrs = if attrs.is_empty() {
            defined
        } else {
            attrs.intersection(&defined).cloned().collect()
        };

        for read_only in self.read_only_attributes(global_read_only, mode) {
            attrs.remove(&read_only);
        }
        attrs
    }
}

/// Lookup of registered schemas, used to resolve dotted attribute paths
pub trait SchemaCatalog {
    /// Schema of the model named exactly `model`
    fn schema(&self, model: &str) -> Option<&ModelSchema>;

    /// Schema addressed by a table, snake-cased or model name
    fn resolve(&self, name: &str) -> Option<&ModelSchema>;
}

impl SchemaCatalog for [ModelSchema] {
    fn schema(&self, model: &str) -> Option<&ModelSchema> {
        self.iter().find(|s| s.name == model)
    }

    fn resolve(&self, name: &str) -> Option<&ModelSchema> {
        self.iter().find(|s| {
            s.name == name || s.single_resource_name() == name || s.list_resource_name() == name
        })
    }
}

/// Errors raised while registering models
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("model `{0}` is registered twice")]
    Duplicate(String),

    #[error("resource name `{resource}` of model `{model}` is already used by `{other}`")]
    ResourceClash {
        resource: String,
        model: String,
        other: String,
    },

    #[error("model `{model}`: {message}")]
    Invalid { model: String, message: String },
}

impl SchemaError {
    pub(crate) fn invalid(model: &str, message: impl Into<String>) -> Self {
        SchemaError::Invalid {
            model: model.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> ModelSchema {
        ModelSchema::new("User")
            .column("name", Column::string().max_length(50))
            .column("email", Column::string().nullable())
            .column("role", Column::enumeration(["admin", "member"]).default_value("member"))
            .relationship("posts", Relationship::one_to_many("BlogPost", "author_id"))
            .private(["email"])
            .with_password()
            .normalized()
    }

    #[test]
    fn test_resource_names() {
        let schema = ModelSchema::new("BlogPost");
        assert_eq!(schema.single_resource_name(), "blog_post");
        assert_eq!(schema.list_resource_name(), "blog_posts");
        assert_eq!(schema.table("posts").list_resource_name(), "posts");
    }

    #[test]
    fn test_new_schema_has_primary_key() {
        let schema = ModelSchema::new("Tag");
        let id = schema.columns.get(PRIMARY_KEY).expect("id column");
        assert!(id.primary_key);
        assert!(!id.is_required());
    }

    #[test]
    fn test_normalized_adds_password_columns_once() {
        let schema = user().normalized();
        assert!(schema.columns.contains_key(PASSWORD_HASH_COLUMN));
        assert!(schema.columns.contains_key(PASSWORD_COUNTER_COLUMN));
        assert_eq!(
            schema.columns.keys().filter(|k| k.starts_with('_')).count(),
            2
        );
    }

    #[test]
    fn test_attribute_lookup() {
        let schema = user();
        assert!(matches!(schema.attribute("name"), Some(Attribute::Column(_))));
        assert!(matches!(
            schema.attribute("posts"),
            Some(Attribute::Relationship(_))
        ));
        assert!(schema.attribute("missing").is_none());
    }

    #[test]
    fn test_visibility() {
        let schema = user();
        assert!(schema.is_visible("name"));
        assert!(!schema.is_visible("email"));
        assert!(!schema.is_visible(PASSWORD_HASH_COLUMN));
        assert!(!schema.is_visible("missing"));
    }

    #[test]
    fn test_searchable_defaults_to_visible_text_columns() {
        let schema = user();
        assert_eq!(schema.searchable_columns(), vec!["name", "role"]);
    }

    #[test]
    fn test_writable_defaults_to_everything_but_read_only() {
        let schema = user();
        let writable = schema.writable_attributes(&[], &[], WriteMode::Create);
        assert!(writable.contains("name"));
        assert!(writable.contains("posts"));
        assert!(writable.contains(PASSWORD_ATTRIBUTE));
        assert!(!writable.contains(PRIMARY_KEY));
        assert!(!writable.contains(PASSWORD_HASH_COLUMN));
    }

    #[test]
    fn test_writable_respects_mode_lists() {
        let schema = user().write_options(WriteOptions {
            writable: vec!["name".into()],
            create_writable: vec!["role".into(), "unknown".into()],
            update_read_only: vec!["name".into()],
            ..Default::default()
        });

        let create = schema.writable_attributes(&[], &[], WriteMode::Create);
        assert_eq!(
            create.into_iter().collect::<Vec<_>>(),
            vec!["name".to_string(), "role".to_string()]
        );

        let update = schema.writable_attributes(&[], &[], WriteMode::Update);
        assert!(update.is_empty());
    }

    #[test]
    fn test_global_read_only_applies() {
        let schema = user();
        let writable =
            schema.writable_attributes(&[], &["role".to_string()], WriteMode::Update);
        assert!(!writable.contains("role"));
        assert!(writable.contains("name"));
    }

    #[test]
    fn test_yaml_declaration() {
        let yaml = r#"
name: BlogPost
columns:
  title: { type: string, max_length: 200 }
  state: { type: enum, values: [draft, published], default: draft }
  author_id: { type: integer, nullable: true }
relationships:
  author: { target: User, kind: many_to_one, foreign_key: author_id }
  tags: { target: Tag, kind: many_to_many, secondary: post_tags }
json:
  expand: [author]
"#;
        let schema: ModelSchema = serde_yaml::from_str(yaml).unwrap();
        let schema = schema.normalized();

        assert_eq!(schema.columns.get_index(0).unwrap().0, PRIMARY_KEY);
        assert_eq!(
            schema.columns["title"].column_type,
            ColumnType::String {
                max_length: Some(200)
            }
        );
        assert_eq!(
            schema.columns["state"].default,
            Some(Value::String("draft".into()))
        );
        assert!(schema.columns["author_id"].nullable);
        assert_eq!(
            schema.relationships["author"].kind,
            RelationKind::ManyToOne {
                foreign_key: "author_id".into()
            }
        );
        assert!(schema.relationships["tags"].is_to_many());
        assert_eq!(schema.json.expand, vec!["author"]);
    }
}
