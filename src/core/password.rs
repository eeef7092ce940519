//! Password storage for models declared with `password: true`
//!
//! The clear-text `password` attribute is never stored. Writing it stores a
//! bcrypt hash in `_password` and bumps `_password_counter`, so tokens issued
//! before a password change can be rejected.

use crate::core::auth::{Authenticator, Claims, LoginGrant};
use crate::core::filter::{AttributePath, Condition, ListQuery, PathTarget, ResolvedFilter};
use crate::core::schema::{PASSWORD_COUNTER_COLUMN, PASSWORD_HASH_COLUMN};
use crate::storage::ModelStore;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Counter value after one more password change (wraps after 255)
pub fn next_counter(current: i64) -> i64 {
    if current >= 255 { 0 } else { current + 1 }
}

/// Hash `password` with the given bcrypt cost
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    Ok(bcrypt::hash(password, cost)?)
}

/// Check `password` against a stored hash; malformed hashes never verify
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Column values to store for a new password
pub fn password_columns(
    password: &str,
    current_counter: i64,
    cost: u32,
) -> Result<Map<String, Value>> {
    let mut values = Map::new();
    values.insert(
        PASSWORD_HASH_COLUMN.to_string(),
        Value::String(hash_password(password, cost)?),
    );
    values.insert(
        PASSWORD_COUNTER_COLUMN.to_string(),
        Value::from(next_counter(current_counter)),
    );
    Ok(values)
}

/// Authenticator checking a login column and a password against a model
///
/// Credentials are read from the login object as `{login_field: ..., "password": ...}`.
/// Issued tokens carry the password counter; tokens are rejected once the
/// password changes or the user is deleted.
pub struct PasswordAuthenticator {
    store: Arc<dyn ModelStore>,
    model: String,
    login_field: String,
    expiration_hours: Option<i64>,
}

impl PasswordAuthenticator {
    pub fn new(
        store: Arc<dyn ModelStore>,
        model: impl Into<String>,
        login_field: impl Into<String>,
    ) -> Self {
        Self {
            store,
            model: model.into(),
            login_field: login_field.into(),
            expiration_hours: None,
        }
    }

    /// Override the configured token lifetime
    pub fn expiration_hours(mut self, hours: i64) -> Self {
        self.expiration_hours = Some(hours);
        self
    }

    fn counter_of(values: &Map<String, Value>) -> i64 {
        values
            .get(PASSWORD_COUNTER_COLUMN)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    async fn authenticate(&self, credentials: &Map<String, Value>) -> Result<Option<LoginGrant>> {
        let (Some(login), Some(password)) = (
            credentials.get(&self.login_field).and_then(Value::as_str),
            credentials.get("password").and_then(Value::as_str),
        ) else {
            return Ok(None);
        };

        let filter = ResolvedFilter {
            path: AttributePath {
                hops: Vec::new(),
                target: PathTarget::Column {
                    name: self.login_field.clone(),
                    json_path: Vec::new(),
                },
            },
            condition: Condition::Eq(Value::String(login.to_string())),
        };
        let query = ListQuery {
            limit: Some(1),
            ..ListQuery::all().with_filter(filter)
        };

        let Some(user) = self.store.query(&self.model, &query).await?.records.pop() else {
            tracing::debug!(model = %self.model, "login for unknown user");
            return Ok(None);
        };

        let hash = user
            .get(PASSWORD_HASH_COLUMN)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !verify_password(password, hash) {
            tracing::debug!(model = %self.model, user_id = user.id, "login with wrong password");
            return Ok(None);
        }

        let visible: Map<String, Value> = user
            .values
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Some(LoginGrant {
            user_id: user.id,
            expiration_hours: self.expiration_hours,
            counter: Some(Self::counter_of(&user.values)),
            user: Value::Object(visible),
        }))
    }

    async fn verify(&self, claims: &Claims) -> Result<bool> {
        let Some(user_id) = claims.user_id() else {
            return Ok(false);
        };
        let Some(user) = self.store.get(&self.model, user_id).await? else {
            return Ok(false);
        };
        Ok(match claims.counter {
            Some(counter) => Self::counter_of(&user.values) == counter,
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use serde_json::json;

    // Lowest cost bcrypt accepts keeps the tests fast
    const COST: u32 = 4;

    #[test]
    fn test_counter_wraps() {
        assert_eq!(next_counter(0), 1);
        assert_eq!(next_counter(254), 255);
        assert_eq!(next_counter(255), 0);
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2", COST).unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    async fn store_with_user() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let mut values = json!({"email": "ada@example.com", "name": "Ada"})
            .as_object()
            .cloned()
            .unwrap();
        values.extend(password_columns("secret", 0, COST).unwrap());
        store.insert("User", values).await.unwrap();
        store
    }

    fn credentials(email: &str, password: &str) -> Map<String, Value> {
        json!({"email": email, "password": password})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate() {
        let store = store_with_user().await;
        let auth = PasswordAuthenticator::new(store, "User", "email");

        let grant = auth
            .authenticate(&credentials("ada@example.com", "secret"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.user_id, 1);
        assert_eq!(grant.counter, Some(1));
        assert_eq!(grant.user["name"], json!("Ada"));
        assert!(grant.user.get("_password").is_none());

        assert!(auth
            .authenticate(&credentials("ada@example.com", "wrong"))
            .await
            .unwrap()
            .is_none());
        assert!(auth
            .authenticate(&credentials("bob@example.com", "secret"))
            .await
            .unwrap()
            .is_none());
        assert!(auth.authenticate(&Map::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_rejects_changed_password() {
        let store = store_with_user().await;
        let auth = PasswordAuthenticator::new(store.clone(), "User", "email");

        let claims = Claims {
            sub: "1".into(),
            exp: 0,
            iat: 0,
            counter: Some(1),
        };
        assert!(auth.verify(&claims).await.unwrap());

        store
            .update("User", 1, password_columns("new", 1, COST).unwrap())
            .await
            .unwrap();
        assert!(!auth.verify(&claims).await.unwrap());

        let missing = Claims {
            sub: "7".into(),
            ..claims
        };
        assert!(!auth.verify(&missing).await.unwrap());
    }
}
