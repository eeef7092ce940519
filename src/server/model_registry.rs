//! Model registry resolving URL resource names to registered models

use crate::config::AuthConfig;
use crate::core::auth::AuthPolicy;
use crate::core::hooks::{HookCatalog, ModelHooks, NoHooks};
use crate::core::schema::{
    ColumnType, ModelSchema, PRIMARY_KEY, RelationKind, SchemaCatalog, SchemaError,
};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// A model with everything needed to serve it
#[derive(Clone)]
pub struct RegisteredModel {
    pub schema: ModelSchema,
    pub hooks: Arc<dyn ModelHooks>,
    pub read_policy: AuthPolicy,
    pub write_policy: AuthPolicy,
}

impl std::fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModel")
            .field("schema", &self.schema.name)
            .field("read_policy", &self.read_policy)
            .field("write_policy", &self.write_policy)
            .finish_non_exhaustive()
    }
}

/// Registry for all models of the application
///
/// Models are addressed in URLs by their list resource name (`blog_posts`);
/// the snake-cased (`blog_post`) and model (`BlogPost`) names resolve too.
#[derive(Default)]
pub struct ModelRegistry {
    models: IndexMap<String, RegisteredModel>,
    resources: HashMap<String, String>,
}

impl ModelRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model
    ///
    /// The schema is normalized and checked on its own; references to other
    /// models are checked by [`validate`](Self::validate) once every model is
    /// registered.
    pub fn register(
        &mut self,
        schema: ModelSchema,
        hooks: Arc<dyn ModelHooks>,
        auth: &AuthConfig,
    ) -> Result<(), SchemaError> {
        let schema = schema.normalized();
        check_schema(&schema)?;

        if self.models.contains_key(&schema.name) {
            return Err(SchemaError::Duplicate(schema.name));
        }

        let names = [
            schema.list_resource_name(),
            schema.single_resource_name(),
            schema.name.clone(),
        ];
        for resource in &names {
            if let Some(other) = self.resources.get(resource) {
                return Err(SchemaError::ResourceClash {
                    resource: resource.clone(),
                    model: schema.name.clone(),
                    other: other.clone(),
                });
            }
        }
        for resource in names {
            self.resources.insert(resource, schema.name.clone());
        }

        let read = schema.access.read.as_deref().unwrap_or(&auth.read_policy);
        let write = schema.access.write.as_deref().unwrap_or(&auth.write_policy);
        let model = RegisteredModel {
            read_policy: AuthPolicy::parse_policy(read),
            write_policy: AuthPolicy::parse_policy(write),
            schema,
            hooks,
        };

        tracing::debug!(
            model = %model.schema.name,
            resource = %model.schema.list_resource_name(),
            "registered model"
        );
        self.models.insert(model.schema.name.clone(), model);
        Ok(())
    }

    /// Replace the access policies of a registered model
    pub fn set_policies(
        &mut self,
        model: &str,
        read: AuthPolicy,
        write: AuthPolicy,
    ) -> Result<(), SchemaError> {
        let registered = self
            .models
            .get_mut(model)
            .ok_or_else(|| SchemaError::invalid(model, "model is not registered"))?;
        registered.read_policy = read;
        registered.write_policy = write;
        Ok(())
    }

    /// Check references between models
    pub fn validate(&self) -> Result<(), SchemaError> {
        for model in self.models.values() {
            let schema = &model.schema;
            for (name, relationship) in &schema.relationships {
                let Some(target) = self.get(&relationship.target) else {
                    return Err(SchemaError::invalid(
                        &schema.name,
                        format!(
                            "relationship `{}` targets unknown model `{}`",
                            name, relationship.target
                        ),
                    ));
                };
                if let RelationKind::OneToMany { remote_key } = &relationship.kind
                    && !target.schema.columns.contains_key(remote_key)
                {
                    return Err(SchemaError::invalid(
                        &schema.name,
                        format!(
                            "relationship `{}`: `{}` has no column `{}`",
                            name, target.schema.name, remote_key
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, model: &str) -> Option<&RegisteredModel> {
        self.models.get(model)
    }

    /// Look up a model by resource, snake-cased or model name
    pub fn by_resource(&self, resource: &str) -> Option<&RegisteredModel> {
        self.resources
            .get(resource)
            .and_then(|model| self.models.get(model))
    }

    /// Registered models in registration order
    pub fn models(&self) -> impl Iterator<Item = &RegisteredModel> {
        self.models.values()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }
}

impl SchemaCatalog for ModelRegistry {
    fn schema(&self, model: &str) -> Option<&ModelSchema> {
        self.get(model).map(|m| &m.schema)
    }

    fn resolve(&self, name: &str) -> Option<&ModelSchema> {
        self.by_resource(name).map(|m| &m.schema)
    }
}

impl HookCatalog for ModelRegistry {
    fn hooks(&self, model: &str) -> &dyn ModelHooks {
        match self.models.get(model) {
            Some(registered) => registered.hooks.as_ref(),
            None => &NoHooks,
        }
    }
}

/// Checks a schema needs no other model for
fn check_schema(schema: &ModelSchema) -> Result<(), SchemaError> {
    let name = schema.name.as_str();
    if name.is_empty() {
        return Err(SchemaError::invalid(name, "model name must not be empty"));
    }

    match schema.columns.get(PRIMARY_KEY) {
        Some(column) if column.primary_key && column.column_type == ColumnType::Integer => {}
        _ => {
            return Err(SchemaError::invalid(
                name,
                "`id` must be an integer primary key",
            ));
        }
    }
    if let Some((other, _)) = schema
        .columns
        .iter()
        .find(|(column, c)| c.primary_key && column.as_str() != PRIMARY_KEY)
    {
        return Err(SchemaError::invalid(
            name,
            format!("`{}` can't be a primary key, only `id` is", other),
        ));
    }

    for relationship in schema.relationships.keys() {
        if schema.columns.contains_key(relationship) {
            return Err(SchemaError::invalid(
                name,
                format!("`{}` is both a column and a relationship", relationship),
            ));
        }
    }

    for (relationship_name, relationship) in &schema.relationships {
        if let RelationKind::ManyToOne { foreign_key } = &relationship.kind
            && !schema.columns.contains_key(foreign_key)
        {
            return Err(SchemaError::invalid(
                name,
                format!(
                    "relationship `{}` uses missing foreign key `{}`",
                    relationship_name, foreign_key
                ),
            ));
        }
    }

    let json = &schema.json;
    let referenced = json
        .include
        .iter()
        .flatten()
        .chain(&json.exclude)
        .chain(&json.private)
        .chain(&json.expand);
    for attribute in referenced {
        if schema.attribute(attribute).is_none() {
            return Err(SchemaError::invalid(
                name,
                format!("json options name unknown attribute `{}`", attribute),
            ));
        }
    }

    if let Some(searchable) = &schema.searchable {
        for column in searchable {
            if !schema.columns.contains_key(column) {
                return Err(SchemaError::invalid(
                    name,
                    format!("searchable column `{}` does not exist", column),
                ));
            }
        }
    }

    Ok(())
}
