//! Storage of model records
//!
//! The framework is agnostic to the underlying storage mechanism: every
//! backend implements [`ModelStore`]. [`InMemoryStore`] is provided for tests,
//! demos and small deployments.

pub mod in_memory;

pub use in_memory::InMemoryStore;

use crate::core::filter::ListQuery;
use crate::core::record::Record;
use crate::core::schema::Relationship;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One page of a list query
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<Record>,
    /// Number of matching records before pagination
    pub count: usize,
}

/// Service trait for model records
///
/// Models are addressed by their model name (`BlogPost`). Ids are assigned by
/// the store, monotonically per model and starting at 1.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Filter, search, sort, count and paginate the records of `model`
    ///
    /// Records with equal sort keys are ordered by id.
    async fn query(&self, model: &str, query: &ListQuery) -> Result<Page>;

    /// Get a record by id
    async fn get(&self, model: &str, id: i64) -> Result<Option<Record>>;

    /// Insert a new record and assign its id
    async fn insert(&self, model: &str, values: Map<String, Value>) -> Result<Record>;

    /// Merge `values` into an existing record
    async fn update(&self, model: &str, id: i64, values: Map<String, Value>)
    -> Result<Option<Record>>;

    /// Delete a record and its association links
    async fn delete(&self, model: &str, id: i64) -> Result<Option<Record>>;

    /// Load the records related to several records of `model` in one call
    ///
    /// Returns, for each id in `ids` that has related records, the related
    /// records ordered by id.
    async fn load_related(
        &self,
        model: &str,
        relationship: &Relationship,
        ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Record>>>;

    /// Replace the n-m associations of one record
    async fn set_associations(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_ids: &[i64],
    ) -> Result<()>;

    /// Add one n-m association
    async fn add_association(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_id: i64,
    ) -> Result<()>;
}
