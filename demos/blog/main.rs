//! Blog API: users with password login, posts, tags and comments

use anyhow::Result;
use modelrest::core::password::password_columns;
use modelrest::prelude::*;
use std::sync::Arc;

/// Published posts only for anonymous readers; new posts belong to their author
struct BlogPostHooks;

#[async_trait]
impl ModelHooks for BlogPostHooks {
    async fn before_create(
        &self,
        ctx: &RequestContext,
        data: &Map<String, Value>,
    ) -> ApiResult<Option<Map<String, Value>>> {
        let Some(user_id) = ctx.auth.user_id() else {
            return Ok(None);
        };
        let mut data = data.clone();
        data.insert("author_id".into(), json!(user_id));
        Ok(Some(data))
    }

    fn read_filters(&self, ctx: &RequestContext) -> Vec<(String, String)> {
        if ctx.auth.is_authenticated() {
            Vec::new()
        } else {
            vec![("published".into(), "true".into())]
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn seed(store: &InMemoryStore) -> Result<()> {
    let mut alice = object(json!({"name": "Alice", "email": "alice@example.com"}));
    alice.extend(password_columns("wonderland", 0, bcrypt_cost())?);
    store.insert("User", alice).await?;

    store
        .insert(
            "BlogPost",
            object(json!({
                "title": "Hello world",
                "body": "The first post.",
                "published": true,
                "author_id": 1
            })),
        )
        .await?;
    store
        .insert(
            "BlogPost",
            object(json!({
                "title": "Draft",
                "body": "Not ready yet.",
                "published": false,
                "author_id": 1
            })),
        )
        .await?;
    store.insert("Tag", object(json!({"name": "intro"}))).await?;
    store
        .set_associations(
            "BlogPost",
            1,
            &Relationship::many_to_many("Tag", "blog_post_tags"),
            &[1],
        )
        .await?;
    Ok(())
}

fn bcrypt_cost() -> u32 {
    AuthConfig::default().bcrypt_cost
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let store = Arc::new(InMemoryStore::new());
    seed(&store).await?;

    let mut config = ApiConfig {
        api_name: Some("Blog".to_string()),
        default_depth: 1,
        ..ApiConfig::default()
    };
    config.auth.write_policy = "authenticated".to_string();

    println!("🚀 Blog API on http://{}/v1\n", config.bind_address);
    println!("📋 Try:");
    println!("   curl 'http://{}/v1/blog_posts?depth=2'", config.bind_address);
    println!("   curl 'http://{}/v1/blog_posts?title=Hello*&sort=title.desc'", config.bind_address);
    println!(
        "   curl -X POST http://{}/v1/login \\\n        -d '{}'",
        config.bind_address, r#"{"email": "alice@example.com", "password": "wonderland"}"#
    );
    println!();

    ApiBuilder::new(config)
        .with_shared_store(store)
        .register_model(
            ModelSchema::new("User")
                .column("name", Column::string().max_length(100))
                .column("email", Column::string())
                .relationship("posts", Relationship::one_to_many("BlogPost", "author_id"))
                .with_password(),
        )
        .register_model_with_hooks(
            ModelSchema::new("BlogPost")
                .column("title", Column::string().max_length(200))
                .column("body", Column::text().nullable())
                .column("published", Column::boolean().default_value(false))
                .column("author_id", Column::integer().nullable())
                .relationship("author", Relationship::many_to_one("User", "author_id"))
                .relationship("tags", Relationship::many_to_many("Tag", "blog_post_tags"))
                .relationship("comments", Relationship::one_to_many("Comment", "post_id"))
                .exclude(["body"])
                .searchable(["title", "body"]),
            BlogPostHooks,
        )
        .register_model(
            ModelSchema::new("Tag")
                .column("name", Column::string().max_length(50))
                .relationship("posts", Relationship::many_to_many("BlogPost", "blog_post_tags")),
        )
        .register_model(
            ModelSchema::new("Comment")
                .column("text", Column::text())
                .column("post_id", Column::integer())
                .relationship("post", Relationship::many_to_one("BlogPost", "post_id")),
        )
        .with_password_login("User", "email")
        .serve_configured()
        .await
}
