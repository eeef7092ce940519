//! ApiBuilder for fluent API to build HTTP servers

use super::host::ApiHost;
use super::model_registry::ModelRegistry;
use super::router::build_api_router;
use crate::config::ApiConfig;
use crate::core::auth::{AuthPolicy, Authenticator};
use crate::core::hooks::{ModelHooks, NoHooks};
use crate::core::password::PasswordAuthenticator;
use crate::core::schema::ModelSchema;
use crate::storage::{InMemoryStore, ModelStore};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for creating HTTP servers with auto-registered routes
///
/// # Example
///
/// ```ignore
/// let app = ApiBuilder::new(ApiConfig::default())
///     .with_store(InMemoryStore::new())
///     .register_model(
///         ModelSchema::new("BlogPost")
///             .column("title", Column::string())
///             .column("author_id", Column::integer().nullable())
///             .relationship("author", Relationship::many_to_one("User", "author_id")),
///     )
///     .register_model(ModelSchema::new("User").column("name", Column::string()))
///     .build()?;
/// ```
pub struct ApiBuilder {
    config: ApiConfig,
    store: Option<Arc<dyn ModelStore>>,
    models: Vec<(ModelSchema, Arc<dyn ModelHooks>)>,
    policies: Vec<(String, AuthPolicy, AuthPolicy)>,
    authenticator: Option<Arc<dyn Authenticator>>,
    password_login: Option<(String, String)>,
    custom_routes: Vec<Router>,
}

impl ApiBuilder {
    /// Create a builder; models listed in `config.models` are registered too
    pub fn new(config: ApiConfig) -> Self {
        Self {
            config,
            store: None,
            models: Vec::new(),
            policies: Vec::new(),
            authenticator: None,
            password_login: None,
            custom_routes: Vec::new(),
        }
    }

    /// Create a builder from a YAML config file
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self::new(ApiConfig::from_yaml_file(path)?))
    }

    /// Set the store (default: a fresh [`InMemoryStore`])
    pub fn with_store(self, store: impl ModelStore + 'static) -> Self {
        self.with_shared_store(Arc::new(store))
    }

    /// Set a store shared with other parts of the application
    pub fn with_shared_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a model without hooks
    pub fn register_model(self, schema: ModelSchema) -> Self {
        self.register_model_with_hooks(schema, NoHooks)
    }

    /// Register a model with its lifecycle hooks
    pub fn register_model_with_hooks(
        mut self,
        schema: ModelSchema,
        hooks: impl ModelHooks + 'static,
    ) -> Self {
        self.models.push((schema, Arc::new(hooks)));
        self
    }

    /// Override the read and write policies of a model
    ///
    /// Use this for policies that can't be expressed in configuration, such as
    /// [`AuthPolicy::Custom`].
    pub fn with_policies(
        mut self,
        model: impl Into<String>,
        read: AuthPolicy,
        write: AuthPolicy,
    ) -> Self {
        self.policies.push((model.into(), read, write));
        self
    }

    /// Check logins with a custom authenticator
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Check logins against a password model
    ///
    /// `model` must be declared with `password: true`; users log in with
    /// `{login_field: ..., "password": ...}`.
    pub fn with_password_login(
        mut self,
        model: impl Into<String>,
        login_field: impl Into<String>,
    ) -> Self {
        self.password_login = Some((model.into(), login_field.into()));
        self
    }

    /// Add custom routes to the server
    ///
    /// Custom routes get the same sanity, CORS and trace layers as the API
    /// routes.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let health = Router::new().route("/health", get(|| async { "ok" }));
    ///
    /// ApiBuilder::new(config)
    ///     .with_custom_routes(health)
    ///     .build()?;
    /// ```
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the shared host: validate config, register and check all models
    pub fn build_host(mut self) -> Result<ApiHost> {
        self.config.check()?;
        let store = self
            .store
            .take()
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));

        let mut registry = ModelRegistry::new();
        let configured = std::mem::take(&mut self.config.models);
        for schema in configured {
            registry.register(schema, Arc::new(NoHooks), &self.config.auth)?;
        }
        for (schema, hooks) in std::mem::take(&mut self.models) {
            registry.register(schema, hooks, &self.config.auth)?;
        }
        registry.validate()?;

        for (model, read, write) in std::mem::take(&mut self.policies) {
            registry.set_policies(&model, read, write)?;
        }

        let authenticator = match (self.authenticator.take(), self.password_login.take()) {
            (Some(authenticator), _) => Some(authenticator),
            (None, Some((model, login_field))) => {
                let schema = registry
                    .get(&model)
                    .map(|m| &m.schema)
                    .ok_or_else(|| {
                        anyhow::anyhow!("password login model `{}` is not registered", model)
                    })?;
                if !schema.password {
                    anyhow::bail!("password login model `{}` has no password", model);
                }
                if !schema.columns.contains_key(&login_field) {
                    anyhow::bail!(
                        "password login model `{}` has no column `{}`",
                        model,
                        login_field
                    );
                }
                let authenticator: Arc<dyn Authenticator> =
                    Arc::new(PasswordAuthenticator::new(store.clone(), model, login_field));
                Some(authenticator)
            }
            (None, None) => None,
        };

        tracing::info!(
            models = ?registry.model_names(),
            prefix = %self.config.prefix(),
            login = authenticator.is_some(),
            "API host built"
        );

        Ok(ApiHost::new(self.config, registry, store, authenticator))
    }

    /// Build the final router
    pub fn build(mut self) -> Result<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host()?);
        build_api_router(host, custom_routes)
    }

    /// Serve the application with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start serving requests
    /// - Handle SIGTERM and SIGINT (Ctrl+C) for graceful shutdown
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Serve on the configured `bind_address`
    pub async fn serve_configured(self) -> Result<()> {
        let addr = self.config.bind_address.clone();
        self.serve(&addr).await
    }
}

impl Default for ApiBuilder {
    fn default() -> Self {
        Self::new(ApiConfig::default())
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
