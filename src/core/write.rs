//! Applying JSON request bodies to records
//!
//! [`WritePlan::prepare`] checks every key of the body against the model
//! (known, writable, well-typed) and splits it into column values and n-m
//! association updates. [`WritePlan::insert`] and [`WritePlan::update`] then
//! perform the writes.

use crate::config::ApiConfig;
use crate::core::error::{ApiError, ApiResult};
use crate::core::password::password_columns;
use crate::core::record::Record;
use crate::core::schema::{
    Attribute, ModelSchema, PASSWORD_ATTRIBUTE, PASSWORD_COUNTER_COLUMN, RelationKind,
    Relationship, WriteMode,
};
use crate::core::value::{as_id, validate};
use crate::storage::ModelStore;
use serde_json::{Map, Value};

/// Validated changes for one record
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    /// Column values to store
    pub values: Map<String, Value>,

    /// n-m relationships whose association set is replaced
    pub associations: Vec<(Relationship, Vec<i64>)>,
}

impl WritePlan {
    /// Check `data` against `schema` for a create or an update of `current`
    pub async fn prepare(
        config: &ApiConfig,
        store: &dyn ModelStore,
        schema: &ModelSchema,
        data: &Map<String, Value>,
        mode: WriteMode,
        current: Option<&Record>,
    ) -> ApiResult<Self> {
        let mut plan = Self::check(config, store, schema, data, mode, current).await?;
        if mode == WriteMode::Create {
            plan.complete_create(schema)?;
        }
        Ok(plan)
    }

    /// Check `data` for a create where the server sets some columns itself
    ///
    /// `fixed` values bypass the writable checks and win over the body, e.g.
    /// the foreign key of a record created through its parent.
    pub async fn prepare_create_with(
        config: &ApiConfig,
        store: &dyn ModelStore,
        schema: &ModelSchema,
        data: &Map<String, Value>,
        fixed: Map<String, Value>,
    ) -> ApiResult<Self> {
        let mut data = data.clone();
        for key in fixed.keys() {
            data.remove(key);
        }
        let mut plan = Self::check(config, store, schema, &data, WriteMode::Create, None).await?;
        plan.values.extend(fixed);
        plan.complete_create(schema)?;
        Ok(plan)
    }

    async fn check(
        config: &ApiConfig,
        store: &dyn ModelStore,
        schema: &ModelSchema,
        data: &Map<String, Value>,
        mode: WriteMode,
        current: Option<&Record>,
    ) -> ApiResult<Self> {
        let writable = schema.writable_attributes(
            &config.writable_attributes,
            &config.read_only_attributes,
            mode,
        );
        let mut plan = WritePlan::default();

        for (key, value) in data {
            if schema.password && key == PASSWORD_ATTRIBUTE {
                if !writable.contains(key) {
                    return Err(ApiError::attribute_read_only(key.clone()));
                }
                let Some(password) = value.as_str() else {
                    return Err(ApiError::attribute_wrong(key.clone(), "is not a string"));
                };
                let counter = current
                    .and_then(|r| r.get(PASSWORD_COUNTER_COLUMN))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                let columns = password_columns(password, counter, config.auth.bcrypt_cost)
                    .map_err(ApiError::internal)?;
                plan.values.extend(columns);
                continue;
            }

            let Some(attribute) = schema.attribute(key) else {
                return Err(ApiError::attribute_not_found(key.clone()));
            };
            if !writable.contains(key) {
                return Err(ApiError::attribute_read_only(key.clone()));
            }

            match attribute {
                Attribute::Column(column) => {
                    plan.values.insert(key.clone(), validate(key, column, value)?);
                }
                Attribute::Relationship(relationship) => {
                    plan.add_relationship(store, schema, key, relationship, value)
                        .await?;
                }
            }
        }

        Ok(plan)
    }

    async fn add_relationship(
        &mut self,
        store: &dyn ModelStore,
        schema: &ModelSchema,
        key: &str,
        relationship: &Relationship,
        value: &Value,
    ) -> ApiResult<()> {
        match &relationship.kind {
            RelationKind::ManyToOne { foreign_key } => {
                if value.is_null() {
                    let nullable = schema
                        .columns
                        .get(foreign_key)
                        .is_some_and(|column| column.nullable);
                    if !nullable {
                        return Err(ApiError::attribute_wrong(key, "may not be null"));
                    }
                    self.values.insert(foreign_key.clone(), Value::Null);
                    return Ok(());
                }
                let id = related_id(store, key, relationship, value).await?;
                self.values.insert(foreign_key.clone(), Value::from(id));
            }
            RelationKind::ManyToMany { .. } => {
                let Some(items) = value.as_array() else {
                    return Err(ApiError::attribute_wrong(key, "has to be a list of ids"));
                };
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    ids.push(related_id(store, key, relationship, item).await?);
                }
                self.associations.push((relationship.clone(), ids));
            }
            RelationKind::OneToMany { .. } => {
                return Err(ApiError::attribute_wrong(
                    key,
                    "is a 1-n relation, create the related records instead",
                ));
            }
        }
        Ok(())
    }

    /// Report missing required columns and fill in defaults
    fn complete_create(&mut self, schema: &ModelSchema) -> ApiResult<()> {
        let missing: Vec<&str> = schema
            .columns
            .iter()
            .filter(|(name, column)| column.is_required() && !self.values.contains_key(*name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::MissingParameters(format!(
                "Missing parameters: {}",
                missing.join(", ")
            )));
        }

        for (name, column) in &schema.columns {
            if column.primary_key || self.values.contains_key(name) {
                continue;
            }
            let value = column.default.clone().unwrap_or(Value::Null);
            self.values.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Insert a new record of `model` and set its associations
    pub async fn insert(self, store: &dyn ModelStore, model: &str) -> ApiResult<Record> {
        let record = store.insert(model, self.values).await?;
        for (relationship, ids) in &self.associations {
            store
                .set_associations(model, record.id, relationship, ids)
                .await?;
        }
        tracing::info!(model = %model, id = record.id, "record created");
        Ok(record)
    }

    /// Apply the changes to record `id` of `model`
    pub async fn update(self, store: &dyn ModelStore, model: &str, id: i64) -> ApiResult<Record> {
        for (relationship, ids) in &self.associations {
            store.set_associations(model, id, relationship, ids).await?;
        }
        let record = store
            .update(model, id, self.values)
            .await?
            .ok_or_else(ApiError::model_not_found)?;
        tracing::info!(model = %model, id, "record updated");
        Ok(record)
    }
}

/// Read a related id and check the related record exists
async fn related_id(
    store: &dyn ModelStore,
    key: &str,
    relationship: &Relationship,
    value: &Value,
) -> ApiResult<i64> {
    let id = match value {
        Value::Number(_) | Value::String(_) => as_id(value),
        _ => None,
    }
    .ok_or_else(|| ApiError::attribute_wrong(key, format!("\"{}\" is not a valid id", value)))?;

    if store.get(&relationship.target, id).await?.is_none() {
        return Err(ApiError::attribute_wrong(
            key,
            format!("{} {} does not exist", relationship.target, id),
        ));
    }
    Ok(id)
}
