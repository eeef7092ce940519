//! Shared state of a running API
//!
//! `ApiHost` holds everything the handlers need: configuration, the model
//! registry, the store and the token machinery. It is built once by
//! [`ApiBuilder`](super::ApiBuilder) and shared as `Arc<ApiHost>`.

use super::model_registry::{ModelRegistry, RegisteredModel};
use crate::config::ApiConfig;
use crate::core::auth::{Authenticator, TokenIssuer};
use crate::core::error::{ApiError, ApiResult};
use crate::core::filter::{
    AttributePath, Condition, ListQuery, PathTarget, ResolvedFilter, ResolvedSort, Search,
};
use crate::core::hooks::RequestContext;
use crate::core::query::QueryParams;
use crate::core::record::Record;
use crate::core::schema::PRIMARY_KEY;
use crate::storage::ModelStore;
use axum::http::HeaderMap;
use axum::http::header::HOST;
use serde_json::Value;
use std::sync::Arc;

/// Host context containing all framework state
pub struct ApiHost {
    pub config: Arc<ApiConfig>,

    pub registry: Arc<ModelRegistry>,

    pub store: Arc<dyn ModelStore>,

    pub tokens: TokenIssuer,

    /// Checks login credentials; `/login` is only routed when set
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl ApiHost {
    pub fn new(
        config: ApiConfig,
        registry: ModelRegistry,
        store: Arc<dyn ModelStore>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let tokens = TokenIssuer::from_config(&config.auth);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            store,
            tokens,
            authenticator,
        }
    }

    /// Model addressed by a URL resource segment
    pub fn model(&self, resource: &str) -> ApiResult<&RegisteredModel> {
        self.registry
            .by_resource(resource)
            .ok_or_else(|| ApiError::ResourceNotFound(format!("Resource {} not found", resource)))
    }

    /// Registered model by exact model name
    pub fn target(&self, model: &str) -> ApiResult<&RegisteredModel> {
        self.registry
            .get(model)
            .ok_or_else(|| ApiError::internal(format!("model `{}` is not registered", model)))
    }

    /// Absolute URL of `path`, based on `public_url` or the `Host` header
    pub fn absolute_url(&self, headers: &HeaderMap, path: &str) -> String {
        match &self.config.public_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => {
                let host = headers
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("localhost");
                format!("http://{}{}", host, path)
            }
        }
    }

    /// Filters applied to every read of `model` by the request's hooks
    pub fn read_filters(
        &self,
        model: &RegisteredModel,
        ctx: &RequestContext,
    ) -> ApiResult<Vec<ResolvedFilter>> {
        model
            .hooks
            .read_filters(ctx)
            .iter()
            .map(|(key, value)| {
                ResolvedFilter::plan(self.registry.as_ref(), &model.schema, key, value)
            })
            .collect()
    }

    /// Plan a list request: hook filters, request filters, search and sort
    pub fn list_query(
        &self,
        model: &RegisteredModel,
        ctx: &RequestContext,
        params: &QueryParams,
    ) -> ApiResult<ListQuery> {
        let catalog = self.registry.as_ref();
        let mut filters = self.read_filters(model, ctx)?;
        for (key, value) in &params.filters {
            filters.push(ResolvedFilter::plan(catalog, &model.schema, key, value)?);
        }

        let sort = params
            .sort_keys
            .iter()
            .map(|key| ResolvedSort::plan(catalog, &model.schema, key))
            .collect::<ApiResult<Vec<_>>>()?;

        let search = params
            .search
            .as_deref()
            .map(|term| Search::new(term, model.schema.searchable_columns()));

        tracing::debug!(
            model = %model.schema.name,
            filters = filters.len(),
            sort = sort.len(),
            search = search.is_some(),
            offset = params.offset,
            limit = params.limit,
            "planned list query"
        );

        Ok(ListQuery {
            filters,
            sort,
            search,
            offset: params.offset,
            limit: Some(params.limit),
        })
    }

    /// Load one record, honoring the read filters of the model's hooks
    pub async fn find(
        &self,
        model: &RegisteredModel,
        ctx: &RequestContext,
        id: i64,
    ) -> ApiResult<Record> {
        let filters = self.read_filters(model, ctx)?;
        let record = if filters.is_empty() {
            self.store.get(&model.schema.name, id).await?
        } else {
            let mut query = ListQuery {
                filters,
                limit: Some(1),
                ..ListQuery::all()
            };
            query.filters.push(column_equals(PRIMARY_KEY, Value::from(id)));
            self.store
                .query(&model.schema.name, &query)
                .await?
                .records
                .pop()
        };
        record.ok_or_else(ApiError::model_not_found)
    }
}

/// Filter on a column of the queried model itself
pub(crate) fn column_equals(column: &str, value: Value) -> ResolvedFilter {
    ResolvedFilter {
        path: AttributePath {
            hops: Vec::new(),
            target: PathTarget::Column {
                name: column.to_string(),
                json_path: Vec::new(),
            },
        },
        condition: Condition::Eq(value),
    }
}
