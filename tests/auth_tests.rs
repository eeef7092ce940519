//! Login, bearer tokens, access policies and lifecycle hooks

mod blog_harness;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use axum_test::TestServer;
use blog_harness::*;
use modelrest::prelude::*;
use std::sync::{Arc, Mutex};

fn errno(response: &axum_test::TestResponse) -> Value {
    response.json::<Value>()["errno"].clone()
}

/// Blog server where every write needs a token
async fn protected_server() -> TestServer {
    let mut config = test_config();
    config.auth.write_policy = "authenticated".to_string();

    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await.expect("Failed to seed store");
    let app = blog_builder(config, store)
        .with_policies("Tag", AuthPolicy::Public, AuthPolicy::Custom(|auth| {
            auth.user_id() == Some(99)
        }))
        .build()
        .expect("Failed to build app");
    TestServer::new(app).expect("Failed to create test server")
}

// ============================================================================
// Login
// ============================================================================

mod login_tests {
    use super::*;

    #[tokio::test]
    async fn test_login_success() {
        let (server, _) = blog_server().await;

        let response = server
            .post("/v1/login")
            .json(&json!({"email": "ada@example.com", "password": PASSWORD}))
            .await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["message"], json!("Login successful"));
        assert!(body["auth_token"].as_str().is_some_and(|t| !t.is_empty()));
        assert_eq!(body["user"]["id"], json!(1));
        assert_eq!(body["user"]["name"], json!("Ada"));
        assert!(body["user"].get("_password").is_none());
    }

    #[tokio::test]
    async fn test_login_failures() {
        let (server, _) = blog_server().await;

        let attempts = [
            json!({"email": "ada@example.com", "password": "wrong"}),
            json!({"email": "nobody@example.com", "password": PASSWORD}),
            json!({"email": "ada@example.com"}),
            // Bob has no password at all
            json!({"email": "bob@example.com", "password": ""}),
        ];
        for credentials in attempts {
            let response = server.post("/v1/login").json(&credentials).await;
            assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(errno(&response), json!(22));
        }
    }

    #[tokio::test]
    async fn test_login_needs_an_authenticator() {
        let app = ApiBuilder::new(test_config())
            .register_model(ModelSchema::new("Tag").column("name", Column::string()))
            .build()
            .expect("Failed to build app");
        let server = TestServer::new(app).expect("Failed to create test server");

        let response = server
            .post("/v1/login")
            .json(&json!({"email": "ada@example.com", "password": PASSWORD}))
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(errno(&response), json!(31));
    }
}

// ============================================================================
// Bearer tokens
// ============================================================================

mod token_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_tokens_are_rejected() {
        let (server, _) = blog_server().await;

        let response = server
            .get("/v1/blog_posts")
            .authorization_bearer("not-a-token")
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(errno(&response), json!(23));

        // Signed with another secret
        let forged = TokenIssuer::new("some-other-secret-of-sufficient-length!!", 1)
            .issue(1, None, Some(0))
            .expect("token");
        let response = server
            .get("/v1/blog_posts")
            .authorization_bearer(forged)
            .await;
        assert_eq!(errno(&response), json!(23));

        // Expired
        let expired = TokenIssuer::new(JWT_SECRET, 1)
            .issue(1, Some(-2), Some(0))
            .expect("token");
        let response = server
            .get("/v1/blog_posts")
            .authorization_bearer(expired)
            .await;
        assert_eq!(errno(&response), json!(23));
    }

    #[tokio::test]
    async fn test_other_schemes_are_anonymous() {
        let (server, _) = blog_server().await;

        let response = server
            .get("/v1/blog_posts")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Basic YWRhOnB3"))
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_password_change_revokes_tokens() {
        let (server, _) = blog_server().await;
        let token = login_token(&server).await;

        server
            .get("/v1/users/1")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        let response = server
            .put("/v1/users/1")
            .authorization_bearer(&token)
            .json(&json!({"password": "battery staple"}))
            .await;
        response.assert_status_ok();
        assert!(response.json::<Value>()["user"].get("password").is_none());

        let response = server
            .get("/v1/users/1")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(errno(&response), json!(23));

        let response = server
            .post("/v1/login")
            .json(&json!({"email": "ada@example.com", "password": PASSWORD}))
            .await;
        assert_eq!(errno(&response), json!(22));

        server
            .post("/v1/login")
            .json(&json!({"email": "ada@example.com", "password": "battery staple"}))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_deleted_user_token_is_rejected() {
        let (server, _) = blog_server().await;
        let token = login_token(&server).await;

        server.delete("/v1/users/1").await.assert_status_ok();

        let response = server
            .get("/v1/blog_posts")
            .authorization_bearer(&token)
            .await;
        assert_eq!(errno(&response), json!(23));
    }
}

// ============================================================================
// Access policies
// ============================================================================

mod policy_tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_writes_are_unauthorized() {
        let server = protected_server().await;

        server.get("/v1/blog_posts").await.assert_status_ok();

        let response = server
            .post("/v1/blog_posts")
            .json(&json!({"title": "Anonymous"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(errno(&response), json!(21));

        let response = server.delete("/v1/blog_posts/4").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_authenticated_writes() {
        let server = protected_server().await;
        let token = login_token(&server).await;

        let response = server
            .post("/v1/blog_posts")
            .authorization_bearer(&token)
            .json(&json!({"title": "Signed"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_custom_policy_forbids() {
        let server = protected_server().await;
        let token = login_token(&server).await;

        let response = server
            .post("/v1/tags")
            .authorization_bearer(&token)
            .json(&json!({"name": "new"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(errno(&response), json!(21));

        // Creating a tag through a post checks the tag policy too
        let response = server
            .post("/v1/blog_posts/1/tags")
            .authorization_bearer(&token)
            .json(&json!({"name": "new"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_model_access_from_schema() {
        let store = Arc::new(InMemoryStore::new());
        seed(store.as_ref()).await.expect("Failed to seed store");
        let app = ApiBuilder::new(test_config())
            .with_shared_store(store)
            .register_model(user_model().access("authenticated", "authenticated"))
            .register_model(blog_post_model())
            .register_model(tag_model())
            .register_model(comment_model())
            .with_password_login("User", "email")
            .build()
            .expect("Failed to build app");
        let server = TestServer::new(app).expect("Failed to create test server");

        let response = server.get("/v1/users").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        // Reading a relationship needs read access to its target
        let response = server.get("/v1/blog_posts/1/author").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let token = login_token(&server).await;
        server
            .get("/v1/users")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Posts of anonymous readers are limited to published ones
#[derive(Clone, Default)]
struct PostHooks {
    events: Arc<Mutex<Vec<String>>>,
}

impl PostHooks {
    fn log(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelHooks for PostHooks {
    async fn after_get(&self, _ctx: &RequestContext, record: &Record) -> ApiResult<()> {
        self.log(format!("get {}", record.id));
        Ok(())
    }

    async fn before_create(
        &self,
        ctx: &RequestContext,
        data: &Map<String, Value>,
    ) -> ApiResult<Option<Map<String, Value>>> {
        let mut data = data.clone();
        if let Some(user_id) = ctx.auth.user_id() {
            data.insert("author_id".into(), json!(user_id));
        }
        Ok(Some(data))
    }

    async fn after_create(&self, _ctx: &RequestContext, record: &Record) -> ApiResult<()> {
        self.log(format!("created {}", record.id));
        Ok(())
    }

    async fn before_delete(&self, _ctx: &RequestContext, record: &Record) -> ApiResult<()> {
        if record.get("published") == Some(&json!(true)) {
            return Err(ApiError::attribute_wrong(
                "published",
                "published posts can't be deleted",
            ));
        }
        Ok(())
    }

    async fn after_attribute_create(
        &self,
        _ctx: &RequestContext,
        record: &Record,
        attribute: &str,
        related: &Record,
    ) -> ApiResult<()> {
        self.log(format!("{} {} -> {}", attribute, record.id, related.id));
        Ok(())
    }

    fn read_filters(&self, ctx: &RequestContext) -> Vec<(String, String)> {
        if ctx.auth.is_authenticated() {
            Vec::new()
        } else {
            vec![("published".into(), "true".into())]
        }
    }

    fn show_attribute(&self, ctx: &RequestContext, _record: &Record, attribute: &str) -> bool {
        attribute != "views" || ctx.auth.is_authenticated()
    }

    fn render_attribute(
        &self,
        _ctx: &RequestContext,
        _record: &Record,
        attribute: &str,
        value: Value,
    ) -> Value {
        match (attribute, value) {
            ("title", Value::String(title)) => Value::String(title.to_uppercase()),
            (_, value) => value,
        }
    }
}

mod hook_tests {
    use super::*;

    async fn hooked_server(hooks: PostHooks) -> TestServer {
        let store = Arc::new(InMemoryStore::new());
        seed(store.as_ref()).await.expect("Failed to seed store");
        let app = ApiBuilder::new(test_config())
            .with_shared_store(store)
            .register_model(user_model())
            .register_model_with_hooks(blog_post_model(), hooks)
            .register_model(tag_model())
            .register_model(comment_model())
            .with_password_login("User", "email")
            .build()
            .expect("Failed to build app");
        TestServer::new(app).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn test_read_filters_apply_to_lists_and_records() {
        let server = hooked_server(PostHooks::default()).await;

        let body: Value = server.get("/v1/blog_posts").await.json();
        assert_eq!(ids(&body, "blog_posts"), vec![1, 3]);
        assert_eq!(body["count"], json!(2));

        let response = server.get("/v1/blog_posts/2").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(errno(&response), json!(32));

        let token = login_token(&server).await;
        let body: Value = server
            .get("/v1/blog_posts")
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(ids(&body, "blog_posts"), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_rendering_hooks() {
        let server = hooked_server(PostHooks::default()).await;

        let body: Value = server.get("/v1/blog_posts/1").await.json();
        assert_eq!(body["blog_post"]["title"], json!("HELLO WORLD"));
        assert!(body["blog_post"].get("views").is_none());

        let response = server.get("/v1/blog_posts/1/views").await;
        assert_eq!(errno(&response), json!(41));

        let body: Value = server.get("/v1/blog_posts/1/title").await.json();
        assert_eq!(body["title"], json!("HELLO WORLD"));

        // Nested posts go through the same hooks
        let body: Value = server.get("/v1/users/1?depth=2").await.json();
        assert_eq!(body["user"]["posts"][0]["title"], json!("HELLO WORLD"));
    }

    #[tokio::test]
    async fn test_write_hooks() {
        let hooks = PostHooks::default();
        let server = hooked_server(hooks.clone()).await;
        let token = login_token(&server).await;

        let response = server
            .post("/v1/blog_posts")
            .authorization_bearer(&token)
            .json(&json!({"title": "Mine"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["blog_post"]["author_id"], json!(1));

        server
            .get("/v1/blog_posts/5")
            .authorization_bearer(&token)
            .await
            .assert_status_ok();

        server
            .post("/v1/users/1/posts")
            .authorization_bearer(&token)
            .json(&json!({"title": "Through the user"}))
            .await
            .assert_status_ok();

        server
            .post("/v1/blog_posts/1/comments")
            .authorization_bearer(&token)
            .json(&json!({"text": "Me too"}))
            .await
            .assert_status_ok();

        assert_eq!(
            hooks.events(),
            vec!["created 5", "get 5", "created 6", "comments 1 -> 4"]
        );
    }

    #[tokio::test]
    async fn test_hook_errors_abort_the_request() {
        let server = hooked_server(PostHooks::default()).await;
        let token = login_token(&server).await;

        let response = server
            .delete("/v1/blog_posts/3")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<Value>()["error"],
            json!("Wrong attribute: published - published posts can't be deleted")
        );

        server
            .get("/v1/blog_posts/3")
            .await
            .assert_status_ok();
    }
}
