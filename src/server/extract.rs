//! Axum extractors for API requests
//!
//! - [`RequestContext`] checks the bearer token and describes the request
//!   to hooks.
//! - [`ApiQuery`] decodes the query string, keeping the raw form for
//!   pagination links.
//! - [`JsonObject`] reads a body that must be a JSON object.

use super::host::ApiHost;
use crate::core::auth::AuthContext;
use crate::core::error::ApiError;
use crate::core::hooks::RequestContext;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde_json::{Map, Value};
use std::sync::Arc;

impl FromRequestParts<Arc<ApiHost>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        host: &Arc<ApiHost>,
    ) -> Result<Self, Self::Rejection> {
        let auth = authenticate(parts, host).await?;
        Ok(RequestContext::new(
            auth,
            parts.method.clone(),
            parts.uri.path(),
        ))
    }
}

/// Resolve the `Authorization` header into an [`AuthContext`]
///
/// Requests without a bearer token are anonymous. A bearer token that fails
/// to decode, has expired or is refused by the authenticator is rejected.
async fn authenticate(parts: &Parts, host: &ApiHost) -> Result<AuthContext, ApiError> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(AuthContext::Anonymous);
    };
    let header = header.to_str().map_err(|_| ApiError::InvalidAuthToken)?;
    let Some(token) = header.strip_prefix("Bearer ") else {
        return Ok(AuthContext::Anonymous);
    };

    let claims = host.tokens.decode(token.trim()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        ApiError::InvalidAuthToken
    })?;
    let user_id = claims.user_id().ok_or(ApiError::InvalidAuthToken)?;

    if let Some(authenticator) = &host.authenticator
        && !authenticator.verify(&claims).await?
    {
        tracing::debug!(user_id, "revoked bearer token");
        return Err(ApiError::InvalidAuthToken);
    }

    Ok(AuthContext::User {
        user_id,
        counter: claims.counter,
    })
}

/// Decoded query string of a request
#[derive(Debug, Clone, Default)]
pub struct ApiQuery {
    /// Decoded pairs in request order
    pub pairs: Vec<(String, String)>,

    /// Undecoded query string, reused for pagination links
    pub raw: Option<String>,
}

impl<S> FromRequestParts<S> for ApiQuery
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|_| ApiError::bad_request("Invalid bytes in query string."))?;
        Ok(Self {
            pairs,
            raw: parts.uri.query().map(str::to_string),
        })
    }
}

/// Request body that must be a JSON object
#[derive(Debug, Clone)]
pub struct JsonObject(pub Map<String, Value>);

impl<S> FromRequest<S> for JsonObject
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(object)) => Ok(Self(object)),
            Ok(_) => Err(ApiError::not_an_object()),
            Err(_) => Err(ApiError::invalid_json()),
        }
    }
}
