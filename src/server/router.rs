//! Route table of the API

use super::handlers::{
    attribute_delete, attribute_get, attribute_post, attribute_put, create, delete, fetch, list,
    login, not_found, options, root, update,
};
use super::host::ApiHost;
use super::middleware::{cors_layer, plain_options, sanity};
use anyhow::Result;
use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the API router from a host
///
/// Routes, all under the `/{api_version}` prefix except the root document:
/// - `GET /`, `GET /{version}`, `GET /{version}/` - root document
/// - `POST /{version}/login` - token issuance (with an authenticator only)
/// - `GET|POST /{version}/{resource}` - list / create
/// - `GET|PUT|DELETE /{version}/{resource}/{id}` - fetch / update / delete
/// - `GET|POST|PUT|DELETE /{version}/{resource}/{id}/{attribute}` - attribute views
/// - `OPTIONS` on each of them
///
/// Anything else falls back to a JSON not-found error.
pub fn build_api_router(host: Arc<ApiHost>, custom_routes: Vec<Router>) -> Result<Router> {
    let prefix = host.config.prefix();

    let mut api = Router::new()
        .route("/", get(root).options(options))
        .route(&prefix, get(root).options(options))
        .route(&format!("{}/", prefix), get(root).options(options))
        .route(
            &format!("{}/{{resource}}", prefix),
            get(list).post(create).options(options),
        )
        .route(
            &format!("{}/{{resource}}/{{id}}", prefix),
            get(fetch).put(update).delete(delete).options(options),
        )
        .route(
            &format!("{}/{{resource}}/{{id}}/{{attribute}}", prefix),
            get(attribute_get)
                .post(attribute_post)
                .put(attribute_put)
                .delete(attribute_delete)
                .options(options),
        );

    if host.authenticator.is_some() {
        api = api.route(
            &format!("{}/login", prefix),
            post(login).options(options),
        );
    }

    let mut app = api.fallback(not_found).with_state(host.clone());
    for custom_router in custom_routes {
        app = app.merge(custom_router);
    }

    app = app.layer(from_fn_with_state(host.clone(), sanity));
    if let Some(cors) = cors_layer(&host.config)? {
        app = app.layer(cors).layer(from_fn(plain_options));
    }
    Ok(app.layer(TraceLayer::new_for_http()))
}
