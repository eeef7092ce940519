//! Lifecycle hooks run by the request handlers
//!
//! Every method has a no-op default, so an implementation only overrides what
//! it needs. Returning an error from a hook aborts the request with that error.

use crate::core::auth::AuthContext;
use crate::core::error::ApiResult;
use crate::core::record::Record;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::{Map, Value};

/// What hooks know about the current request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub auth: AuthContext,
    pub method: Method,
    pub path: String,
}

impl RequestContext {
    pub fn new(auth: AuthContext, method: Method, path: impl Into<String>) -> Self {
        Self {
            auth,
            method,
            path: path.into(),
        }
    }

    /// Context for code running outside of a request
    pub fn anonymous() -> Self {
        Self::new(AuthContext::Anonymous, Method::GET, "/")
    }
}

/// Per-model lifecycle hooks
///
/// # Example
///
/// ```rust,ignore
/// struct OwnPostsOnly;
///
/// #[async_trait]
/// impl ModelHooks for OwnPostsOnly {
///     fn read_filters(&self, ctx: &RequestContext) -> Vec<(String, String)> {
///         match ctx.auth.user_id() {
///             Some(id) => vec![("author_id".into(), id.to_string())],
///             None => vec![("id".into(), "null".into())],
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait ModelHooks: Send + Sync {
    async fn after_get(&self, _ctx: &RequestContext, _record: &Record) -> ApiResult<()> {
        Ok(())
    }

    async fn after_attribute_get(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _attribute: &str,
    ) -> ApiResult<()> {
        Ok(())
    }

    /// Runs before a record is created; returned data replaces the request body
    async fn before_create(
        &self,
        _ctx: &RequestContext,
        _data: &Map<String, Value>,
    ) -> ApiResult<Option<Map<String, Value>>> {
        Ok(None)
    }

    async fn after_create(&self, _ctx: &RequestContext, _record: &Record) -> ApiResult<()> {
        Ok(())
    }

    /// Runs on the parent after a related record was created through it
    async fn after_attribute_create(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _attribute: &str,
        _related: &Record,
    ) -> ApiResult<()> {
        Ok(())
    }

    /// Runs before a record is updated; returned data replaces the request body
    async fn before_update(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _data: &Map<String, Value>,
    ) -> ApiResult<Option<Map<String, Value>>> {
        Ok(None)
    }

    async fn after_update(&self, _ctx: &RequestContext, _record: &Record) -> ApiResult<()> {
        Ok(())
    }

    async fn after_attribute_update(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _attribute: &str,
        _related: &Record,
    ) -> ApiResult<()> {
        Ok(())
    }

    async fn before_delete(&self, _ctx: &RequestContext, _record: &Record) -> ApiResult<()> {
        Ok(())
    }

    async fn after_delete(&self, _ctx: &RequestContext, _record: &Record) -> ApiResult<()> {
        Ok(())
    }

    async fn after_attribute_delete(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _attribute: &str,
        _related: &Record,
    ) -> ApiResult<()> {
        Ok(())
    }

    /// Extra filter pairs applied to every list and single read
    fn read_filters(&self, _ctx: &RequestContext) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether `attribute` of `record` is rendered
    fn show_attribute(&self, _ctx: &RequestContext, _record: &Record, _attribute: &str) -> bool {
        true
    }

    /// Replace the rendered value of `attribute`
    fn render_attribute(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        _attribute: &str,
        value: Value,
    ) -> Value {
        value
    }
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ModelHooks for NoHooks {}

/// Lookup of the hooks registered for each model
pub trait HookCatalog {
    /// Hooks of `model`, [`NoHooks`] when none were registered
    fn hooks(&self, model: &str) -> &dyn ModelHooks;
}
