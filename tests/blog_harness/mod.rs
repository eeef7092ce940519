//! Shared blog fixture for the HTTP tests
//!
//! Models:
//! - `User` (password login on `email`, private `api_key`) with its `posts`
//! - `BlogPost` with an `author`, `tags` (n-m) and `comments` (1-n, not nullable)
//! - `Tag` and `Comment`
//!
//! # Usage
//!
//! ```rust,ignore
//! mod blog_harness;
//! use blog_harness::*;
//! ```

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum_test::TestServer;
use modelrest::core::filter::ListQuery;
use modelrest::core::password::password_columns;
use modelrest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const JWT_SECRET: &str = "blog-test-secret-that-is-long-enough-0123456789";
pub const PASSWORD: &str = "correct horse";

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

pub fn user_model() -> ModelSchema {
    ModelSchema::new("User")
        .column("name", Column::string().max_length(50))
        .column("email", Column::string())
        .column("age", Column::integer().nullable())
        .column("api_key", Column::string().nullable())
        .relationship("posts", Relationship::one_to_many("BlogPost", "author_id"))
        .private(["api_key"])
        .with_password()
}

pub fn blog_post_model() -> ModelSchema {
    ModelSchema::new("BlogPost")
        .column("title", Column::string().max_length(100))
        .column("body", Column::text().nullable())
        .column("views", Column::integer().default_value(0))
        .column("published", Column::boolean().default_value(false))
        .column("author_id", Column::integer().nullable())
        .column("meta", Column::json().nullable())
        .relationship("author", Relationship::many_to_one("User", "author_id"))
        .relationship("tags", Relationship::many_to_many("Tag", "blog_post_tags"))
        .relationship("comments", Relationship::one_to_many("Comment", "post_id"))
        .exclude(["body"])
}

pub fn tag_model() -> ModelSchema {
    ModelSchema::new("Tag")
        .column("name", Column::string())
        .relationship("posts", Relationship::many_to_many("BlogPost", "blog_post_tags"))
}

pub fn comment_model() -> ModelSchema {
    ModelSchema::new("Comment")
        .column("text", Column::string())
        .column("post_id", Column::integer())
        .relationship("post", Relationship::many_to_one("BlogPost", "post_id"))
}

pub fn test_config() -> ApiConfig {
    let mut config = ApiConfig {
        api_name: Some("Blog API".to_string()),
        public_url: Some("http://api.test".to_string()),
        default_limit: 20,
        max_limit: 50,
        ..ApiConfig::default()
    };
    config.auth.jwt_secret = Some(JWT_SECRET.to_string());
    config.auth.bcrypt_cost = 4;
    config
}

/// Builder with the four blog models, password login and `store`
pub fn blog_builder(config: ApiConfig, store: Arc<dyn ModelStore>) -> ApiBuilder {
    ApiBuilder::new(config)
        .with_shared_store(store)
        .register_model(user_model())
        .register_model(blog_post_model())
        .register_model(tag_model())
        .register_model(comment_model())
        .with_password_login("User", "email")
}

// ---------------------------------------------------------------------------
// Seed data
// ---------------------------------------------------------------------------

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// Insert the blog fixture
///
/// - users: 1 Ada (36, has a password), 2 Bob (no age), 3 Cy (25)
/// - posts: 1 "Hello world" (Ada, tags 1+2), 2 "Rust tips" (Ada, tag 2),
///   3 "Bob's post" (Bob), 4 "Orphan" (no author)
/// - tags: 1 intro, 2 rust
/// - comments: 1 and 2 on post 1, 3 on post 2
pub async fn seed(store: &dyn ModelStore) -> Result<()> {
    let mut ada = object(json!({
        "name": "Ada",
        "email": "ada@example.com",
        "age": 36,
        "api_key": "k-ada"
    }));
    ada.extend(password_columns(PASSWORD, 0, 4)?);
    store.insert("User", ada).await?;
    store
        .insert(
            "User",
            object(json!({
                "name": "Bob",
                "email": "bob@example.com",
                "age": null,
                "api_key": null
            })),
        )
        .await?;
    store
        .insert(
            "User",
            object(json!({"name": "Cy", "email": "cy@example.org", "age": 25, "api_key": null})),
        )
        .await?;

    let posts = [
        json!({
            "title": "Hello world",
            "body": "First!",
            "views": 10,
            "published": true,
            "author_id": 1,
            "meta": {"lang": "en"}
        }),
        json!({
            "title": "Rust tips",
            "body": "Borrow wisely",
            "views": 5,
            "published": false,
            "author_id": 1,
            "meta": {"lang": "de"}
        }),
        json!({
            "title": "Bob's post",
            "body": null,
            "views": 7,
            "published": true,
            "author_id": 2,
            "meta": null
        }),
        json!({
            "title": "Orphan",
            "body": null,
            "views": 0,
            "published": false,
            "author_id": null,
            "meta": null
        }),
    ];
    for post in posts {
        store.insert("BlogPost", object(post)).await?;
    }

    store.insert("Tag", object(json!({"name": "intro"}))).await?;
    store.insert("Tag", object(json!({"name": "rust"}))).await?;

    let tags = Relationship::many_to_many("Tag", "blog_post_tags");
    store.set_associations("BlogPost", 1, &tags, &[1, 2]).await?;
    store.set_associations("BlogPost", 2, &tags, &[2]).await?;

    for (text, post_id) in [("Nice", 1), ("Thanks", 1), ("Hm", 2)] {
        store
            .insert("Comment", object(json!({"text": text, "post_id": post_id})))
            .await?;
    }
    Ok(())
}

/// Seeded store and a test server over the blog models
pub async fn blog_server() -> (TestServer, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await.expect("Failed to seed store");
    let app = blog_builder(test_config(), store.clone())
        .build()
        .expect("Failed to build app");
    let server = TestServer::new(app).expect("Failed to create test server");
    (server, store)
}

/// Log in as Ada and return the token
pub async fn login_token(server: &TestServer) -> String {
    let response = server
        .post("/v1/login")
        .json(&json!({"email": "ada@example.com", "password": PASSWORD}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    body["auth_token"]
        .as_str()
        .expect("login response has a token")
        .to_string()
}

/// Ids of the records under `key` of a list envelope
pub fn ids(body: &Value, key: &str) -> Vec<i64> {
    body[key]
        .as_array()
        .unwrap_or_else(|| panic!("`{}` is not a list in {}", key, body))
        .iter()
        .map(|item| item["id"].as_i64().expect("record without id"))
        .collect()
}

// ---------------------------------------------------------------------------
// CountingStore - counts batch loads to catch per-record queries
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    load_related_calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn load_related_calls(&self) -> usize {
        self.load_related_calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.load_related_calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelStore for CountingStore {
    async fn query(&self, model: &str, query: &ListQuery) -> Result<Page> {
        self.inner.query(model, query).await
    }

    async fn get(&self, model: &str, id: i64) -> Result<Option<Record>> {
        self.inner.get(model, id).await
    }

    async fn insert(&self, model: &str, values: Map<String, Value>) -> Result<Record> {
        self.inner.insert(model, values).await
    }

    async fn update(
        &self,
        model: &str,
        id: i64,
        values: Map<String, Value>,
    ) -> Result<Option<Record>> {
        self.inner.update(model, id, values).await
    }

    async fn delete(&self, model: &str, id: i64) -> Result<Option<Record>> {
        self.inner.delete(model, id).await
    }

    async fn load_related(
        &self,
        model: &str,
        relationship: &Relationship,
        ids: &[i64],
    ) -> Result<HashMap<i64, Vec<Record>>> {
        self.load_related_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load_related(model, relationship, ids).await
    }

    async fn set_associations(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_ids: &[i64],
    ) -> Result<()> {
        self.inner
            .set_associations(model, id, relationship, target_ids)
            .await
    }

    async fn add_association(
        &self,
        model: &str,
        id: i64,
        relationship: &Relationship,
        target_id: i64,
    ) -> Result<()> {
        self.inner
            .add_association(model, id, relationship, target_id)
            .await
    }
}
