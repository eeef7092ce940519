//! # modelrest
//!
//! A framework that turns model metadata into a JSON REST API.
//!
//! ## Features
//!
//! - **Metadata-driven**: columns, types, nullability, defaults and
//!   relationships are declared once, in Rust or YAML
//! - **Query language**: pagination, multi-key sorting over dotted paths,
//!   attribute selection, filters with negation, ranges, lists and wildcards
//! - **Depth-controlled rendering**: relationships as ids or nested objects,
//!   loaded in batches instead of one query per record
//! - **Lifecycle hooks**: per-model callbacks around reads and writes
//! - **JWT auth**: token issuance at `/login`, bearer checks, access policies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modelrest::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_tracing();
//!
//!     ApiBuilder::new(ApiConfig::default())
//!         .register_model(
//!             ModelSchema::new("User")
//!                 .column("email", Column::string())
//!                 .relationship("posts", Relationship::one_to_many("BlogPost", "author_id"))
//!                 .with_password(),
//!         )
//!         .register_model(
//!             ModelSchema::new("BlogPost")
//!                 .column("title", Column::string())
//!                 .column("author_id", Column::integer().nullable())
//!                 .relationship("author", Relationship::many_to_one("User", "author_id")),
//!         )
//!         .with_password_login("User", "email")
//!         .serve("127.0.0.1:3000")
//!         .await
//! }
//! ```
//!
//! ```text
//! GET /v1/blog_posts?author.email=ada@*&sort=title.desc&depth=2&limit=10
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod telemetry;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Configuration ===
    pub use crate::config::{ApiConfig, AuthConfig};

    // === Models ===
    pub use crate::core::schema::{
        Column, ColumnType, JsonOptions, ModelSchema, RelationKind, Relationship, WriteMode,
        WriteOptions,
    };
    pub use crate::core::record::Record;

    // === Errors ===
    pub use crate::core::error::{ApiError, ApiResult};

    // === Auth ===
    pub use crate::core::auth::{
        AuthContext, AuthPolicy, Authenticator, Claims, LoginGrant, TokenIssuer,
    };
    pub use crate::core::password::PasswordAuthenticator;

    // === Hooks ===
    pub use crate::core::hooks::{ModelHooks, NoHooks, RequestContext};

    // === Storage ===
    pub use crate::storage::{InMemoryStore, ModelStore, Page};

    // === Server ===
    pub use crate::server::{ApiBuilder, ApiHost};

    // === Logging ===
    pub use crate::telemetry::init_tracing;

    // === Re-exports from external crates ===
    pub use async_trait::async_trait;
    pub use serde_json::{Map, Value, json};
}
