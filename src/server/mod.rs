//! Server module for building HTTP servers with auto-registered routes
//!
//! [`ApiBuilder`] collects the configuration, the models and the store, and
//! produces an axum `Router` exposing every registered model under
//! `/{api_version}/{resource}`.

pub mod builder;
pub mod extract;
pub mod handlers;
pub mod host;
pub mod middleware;
pub mod model_registry;
pub mod router;

pub use builder::ApiBuilder;
pub use extract::{ApiQuery, JsonObject};
pub use host::ApiHost;
pub use model_registry::{ModelRegistry, RegisteredModel};
pub use router::build_api_router;
