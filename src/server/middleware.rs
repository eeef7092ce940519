//! Request sanity checks and CORS

use super::handlers::options;
use super::host::ApiHost;
use crate::config::ApiConfig;
use crate::core::error::ApiError;
use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCEPT, ACCEPT_LANGUAGE, ACCESS_CONTROL_REQUEST_METHOD, AUTHORIZATION, CONTENT_LENGTH,
    CONTENT_TYPE, DATE, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, ORIGIN,
};
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Reject requests the handlers can't make sense of
///
/// - the query string and path must percent-decode to UTF-8;
/// - a non-empty body of anything but GET and DELETE must be a JSON object
///   no larger than `max_body_bytes`.
pub async fn sanity(State(host): State<Arc<ApiHost>>, request: Request, next: Next) -> Response {
    match check(&host.config, request).await {
        Ok(request) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Answer OPTIONS requests that are not CORS preflights
///
/// The CORS layer answers every OPTIONS request on its own, so this one sits
/// in front of it to announce the allowed methods.
pub async fn plain_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS
        && !request.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    {
        return options().await.into_response();
    }
    next.run(request).await
}

async fn check(config: &ApiConfig, request: Request) -> Result<Request, ApiError> {
    if let Some(query) = request.uri().query()
        && !decodes_to_utf8(query)
    {
        return Err(ApiError::bad_request("Invalid bytes in query string."));
    }
    if !decodes_to_utf8(request.uri().path()) {
        return Err(ApiError::bad_request("Invalid bytes in URL."));
    }

    if request.method() == Method::GET || request.method() == Method::DELETE {
        return Ok(request);
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, config.max_body_bytes)
        .await
        .map_err(|_| ApiError::bad_request("Request body is too large."))?;
    if !bytes.is_empty() {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(_)) => {}
            Ok(_) => return Err(ApiError::not_an_object()),
            Err(_) => return Err(ApiError::invalid_json()),
        }
    }
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn decodes_to_utf8(input: &str) -> bool {
    percent_decode_str(input).decode_utf8().is_ok()
}

/// CORS layer for the API, `None` when disabled
///
/// Credentials are allowed. With an empty `allowed_origins` list the request
/// origin is mirrored.
pub fn cors_layer(config: &ApiConfig) -> Result<Option<CorsLayer>> {
    if config.disable_cors {
        return Ok(None);
    }

    let allow_origin = if config.allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid allowed origin `{}`", origin))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(origins)
    };

    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(allow_origin)
        .allow_methods([
            Method::OPTIONS,
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            ORIGIN,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
            ACCEPT_LANGUAGE,
            ACCEPT,
            AUTHORIZATION,
            IF_NONE_MATCH,
            IF_MODIFIED_SINCE,
        ])
        .expose_headers([
            CONTENT_TYPE,
            CONTENT_LENGTH,
            DATE,
            AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ]);

    Ok(Some(layer))
}
