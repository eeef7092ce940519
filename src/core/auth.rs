//! Authentication and authorization
//!
//! - [`AuthContext`] is what a request carries after its bearer token is checked.
//! - [`AuthPolicy`] decides whether a context may read or write a model.
//! - [`TokenIssuer`] signs and verifies HS256 JWTs.
//! - [`Authenticator`] is implemented by applications to check login
//!   credentials (see [`PasswordAuthenticator`](crate::core::password::PasswordAuthenticator)
//!   for a ready-made one).

use crate::config::AuthConfig;
use crate::core::error::{ApiError, ApiResult};
use anyhow::Result;
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authorization context extracted from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// Caller presented a valid token
    User { user_id: i64, counter: Option<i64> },

    /// No authentication (public access)
    Anonymous,
}

impl AuthContext {
    /// Get user_id if available
    pub fn user_id(&self) -> Option<i64> {
        match self {
            AuthContext::User { user_id, .. } => Some(*user_id),
            AuthContext::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthContext::Anonymous)
    }
}

/// Authorization policy for an operation
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Public access (no auth required)
    Public,

    /// Any authenticated user
    Authenticated,

    /// Combination of policies (AND)
    And(Vec<AuthPolicy>),

    /// Combination of policies (OR)
    Or(Vec<AuthPolicy>),

    /// Custom policy function
    Custom(fn(&AuthContext) -> bool),
}

impl AuthPolicy {
    /// Check if auth context satisfies this policy
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,

            AuthPolicy::Authenticated => context.is_authenticated(),

            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),

            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),

            AuthPolicy::Custom(f) => f(context),
        }
    }

    /// Check and convert a denial into the matching error
    ///
    /// Anonymous callers get `Unauthorized`, authenticated ones `Forbidden`.
    pub fn enforce(&self, context: &AuthContext) -> ApiResult<()> {
        if self.check(context) {
            Ok(())
        } else if context.is_authenticated() {
            Err(ApiError::Forbidden)
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    /// Parse policy from string (for YAML config)
    pub fn parse_policy(s: &str) -> Self {
        match s {
            "public" => AuthPolicy::Public,
            "authenticated" => AuthPolicy::Authenticated,
            _ => AuthPolicy::Authenticated, // Default
        }
    }
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Password counter at issue time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<i64>,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Minimum recommended length for JWT secrets
const MIN_SECRET_LENGTH: usize = 32;

/// Signs and verifies HS256 tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiration_hours: i64,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("expiration_hours", &self.expiration_hours)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &str, expiration_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiration_hours,
        }
    }

    /// Build from config, falling back to `JWT_SECRET`, then to a per-process secret
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = config
            .jwt_secret
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty()));

        let secret = match secret {
            Some(secret) => {
                if secret.len() < MIN_SECRET_LENGTH {
                    tracing::warn!(
                        "JWT secret is shorter than {} characters. \
                         Consider using a longer secret for better security.",
                        MIN_SECRET_LENGTH
                    );
                }
                secret
            }
            None => {
                tracing::warn!(
                    "No JWT secret configured - using a random per-process secret. \
                     Tokens will not survive a restart."
                );
                format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
            }
        };

        Self::new(&secret, config.token_expiration_hours)
    }

    /// Issue a token for `user_id`
    ///
    /// `expiration_hours` overrides the configured lifetime.
    pub fn issue(
        &self,
        user_id: i64,
        expiration_hours: Option<i64>,
        counter: Option<i64>,
    ) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let hours = expiration_hours.unwrap_or(self.expiration_hours);
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + hours * 3600,
            iat: now,
            counter,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Decode and validate a token (signature and expiration)
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Successful login returned by an [`Authenticator`]
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub user_id: i64,
    /// Token lifetime in hours (default: configured lifetime)
    pub expiration_hours: Option<i64>,
    /// Password counter embedded in the token, checked by [`Authenticator::verify`]
    pub counter: Option<i64>,
    /// Returned as `user` in the login response
    pub user: Value,
}

/// Application hook checking login credentials
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return a grant for valid credentials, `None` to reject them
    async fn authenticate(&self, credentials: &Map<String, Value>) -> Result<Option<LoginGrant>>;

    /// Whether a validly signed token is still acceptable
    async fn verify(&self, _claims: &Claims) -> Result<bool> {
        Ok(true)
    }
}
