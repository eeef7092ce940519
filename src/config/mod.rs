//! Configuration loading and management
//!
//! The whole API can be described in one YAML file:
//!
//! ```yaml
//! api_version: v1
//! api_name: Blog API
//! default_limit: 50
//! max_depth: 2
//! auth:
//!   jwt_secret: change-me
//!   write_policy: authenticated
//! models:
//!   - name: User
//!     password: true
//!     columns:
//!       name: { type: string, max_length: 100 }
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use crate::core::schema::ModelSchema;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Settings of the whole API
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ApiConfig {
    /// URL prefix of every resource (`/v1/...`)
    #[validate(length(min = 1, message = "api_version must not be empty"))]
    pub api_version: String,

    /// Optional name returned by the root document
    pub api_name: Option<String>,

    /// Page size when the request has no `limit`
    #[validate(range(min = 1, message = "default_limit must be > 0"))]
    pub default_limit: usize,

    /// Upper bound for `limit`
    #[validate(range(min = 1, message = "max_limit must be > 0"))]
    pub max_limit: usize,

    /// Render depth when neither the request nor the model sets one
    pub default_depth: u32,

    /// Upper bound for `depth`
    pub max_depth: u32,

    /// Attributes writable on every model (empty: all)
    pub writable_attributes: Vec<String>,

    /// Attributes read-only on every model
    pub read_only_attributes: Vec<String>,

    /// Origins allowed by CORS (empty: mirror the request origin)
    pub allowed_origins: Vec<String>,

    pub disable_cors: bool,

    /// Base URL for pagination links (default: `http://{Host}`)
    pub public_url: Option<String>,

    /// Address used by `ApiBuilder::serve` when none is given
    pub bind_address: String,

    /// Largest accepted request body
    #[validate(range(min = 1))]
    pub max_body_bytes: usize,

    #[validate(nested)]
    pub auth: AuthConfig,

    /// Models declared in configuration
    pub models: Vec<ModelSchema>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            api_name: None,
            default_limit: 100,
            max_limit: 1000,
            default_depth: 0,
            max_depth: 3,
            writable_attributes: Vec::new(),
            read_only_attributes: Vec::new(),
            allowed_origins: Vec::new(),
            disable_cors: false,
            public_url: None,
            bind_address: "127.0.0.1:3000".to_string(),
            max_body_bytes: 1024 * 1024,
            auth: AuthConfig::default(),
            models: Vec::new(),
        }
    }
}

/// Token and access settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret (falls back to the `JWT_SECRET` environment variable)
    pub jwt_secret: Option<String>,

    #[validate(range(min = 1, message = "token_expiration_hours must be > 0"))]
    pub token_expiration_hours: i64,

    /// Policy applied to reads of models without their own
    pub read_policy: String,

    /// Policy applied to writes of models without their own
    pub write_policy: String,

    /// bcrypt work factor for password attributes
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expiration_hours: 24,
            read_policy: "public".to_string(),
            write_policy: "public".to_string(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl ApiConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    /// Validate value ranges and cross-field constraints
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.default_limit > self.max_limit {
            bail!(
                "default_limit ({}) must not exceed max_limit ({})",
                self.default_limit,
                self.max_limit
            );
        }
        if self.default_depth > self.max_depth {
            bail!(
                "default_depth ({}) must not exceed max_depth ({})",
                self.default_depth,
                self.max_depth
            );
        }
        Ok(())
    }

    /// Path prefix of every resource, e.g. `/v1`
    pub fn prefix(&self) -> String {
        format!("/{}", self.api_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.api_version, "v1");
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.max_limit, 1000);
        assert_eq!(config.prefix(), "/v1");
        assert_eq!(config.auth.token_expiration_hours, 24);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = ApiConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.default_limit, 100);
        assert_eq!(config.auth.read_policy, "public");
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_yaml_with_models() {
        let yaml = r#"
api_version: v3
api_name: Test API
default_limit: 10
auth:
  jwt_secret: s3cret
  write_policy: authenticated
models:
  - name: Country
    read_only: true
    columns:
      name: { type: string }
"#;
        let config = ApiConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.prefix(), "/v3");
        assert_eq!(config.api_name.as_deref(), Some("Test API"));
        assert_eq!(config.default_limit, 10);
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.auth.write_policy, "authenticated");
        assert_eq!(config.models.len(), 1);
        assert!(config.models[0].read_only);
    }

    #[test]
    fn test_default_limit_above_max_is_rejected() {
        let err = ApiConfig::from_yaml_str("default_limit: 50\nmax_limit: 10").unwrap_err();
        assert!(err.to_string().contains("must not exceed max_limit"));
    }

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(ApiConfig::from_yaml_str("default_limit: 0").is_err());
        assert!(ApiConfig::from_yaml_str("api_version: ''").is_err());
    }

    #[test]
    fn test_yaml_serialization() {
        let config = ApiConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();

        // Should be able to parse it back
        let parsed = ApiConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.api_version, config.api_version);
        assert_eq!(parsed.max_depth, config.max_depth);
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.yaml");
        std::fs::write(&path, "api_version: v2\nmax_limit: 20\n").unwrap();

        let config = ApiConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.api_version, "v2");
        assert_eq!(config.max_limit, 20);

        assert!(ApiConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }
}
