//! Core module containing model metadata, query planning and rendering

pub mod auth;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod naming;
pub mod password;
pub mod query;
pub mod record;
pub mod render;
pub mod schema;
pub mod value;
pub mod write;

pub use auth::{AuthContext, AuthPolicy, Authenticator, Claims, LoginGrant, TokenIssuer};
pub use error::{ApiError, ApiResult};
pub use filter::{ListQuery, ResolvedFilter, ResolvedSort, Search};
pub use hooks::{HookCatalog, ModelHooks, NoHooks, RequestContext};
pub use password::PasswordAuthenticator;
pub use query::{PageLinks, QueryParams};
pub use record::Record;
pub use render::Renderer;
pub use schema::{
    Column, ColumnType, ModelSchema, RelationKind, Relationship, SchemaCatalog, SchemaError,
    WriteMode, WriteOptions,
};
pub use write::WritePlan;
