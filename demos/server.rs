//! Demo server: an in-memory `task` resource with a hook, a custom action and a nested
//! `comment` resource mounted through a router factory.
//!
//! `cargo run --example server`, then e.g. `curl -XPOST localhost:6606/api/task -d '{"task":{"title":"x"}}'`.

use async_trait::async_trait;
use axum::http::Method;
use resource_api::config::ColumnConfig;
use resource_api::hooks::BeforeResult;
use resource_api::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn column(name: &str, pg_type: Option<&str>, nullable: bool, has_default: bool) -> ColumnConfig {
    ColumnConfig {
        name: name.into(),
        pg_type: pg_type.map(str::to_string),
        nullable,
        has_default,
    }
}

fn task_config() -> ResourceConfig {
    let mut config = ResourceConfig::named("task");
    config.columns = vec![
        column("id", Some("bigint"), false, true),
        column("title", None, false, false),
        column("status", None, false, false),
        column("created_at", Some("timestamptz"), false, true),
        column("updated_at", Some("timestamptz"), false, true),
        column("deleted_at", Some("timestamptz"), true, false),
    ];
    config
}

fn comment_config() -> ResourceConfig {
    let mut config = ResourceConfig::named("comment");
    config.id_path = ":taskId/:id".into();
    config.excludes = vec!["softDelete".into(), "restore".into()];
    config
}

/// New tasks start open unless the client says otherwise.
struct TaskHooks;

#[async_trait]
impl ResourceHooks for TaskHooks {
    async fn before_create(&self, req: &RequestContext, _res: &ResponseContext) -> BeforeResult {
        let mut body = req.body.clone();
        if body["task"].is_object() && body["task"]["status"].is_null() {
            body["task"]["status"] = json!("open");
        }
        Ok(Some(BeforeOutcome::request(req.clone().with_body(body))))
    }
}

fn close_action() -> CustomAction {
    CustomAction::new("close", Method::POST, "/:id/close", |c: Arc<ResourceController>, req: RequestContext| async move {
        let id = req.params.get("id").cloned().unwrap_or_default();
        let patch = RequestContext::new(Method::PATCH, &format!("/task/{}", id))
            .with_param("id", &id)
            .with_identity(req.identity.clone())
            .with_body(json!({ "task": { "status": "closed" } }));
        c.dispatch(Action::Update, patch).await
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_api=debug".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let store = Arc::new(MemoryStore::new());

    let comments = Arc::new(ResourceController::new(resolve(&comment_config())?, store.clone()));
    let factory = RouterFactory::new()
        .simple(Method::GET, "/stats", vec![], || async {
            axum::Json::<Value>(json!({ "resources": ["task", "comment"] }))
        })?
        .mount_resource(None, vec![], comments)?;

    let tasks = ResourceController::new(resolve(&task_config())?, store)
        .with_hooks(TaskHooks)
        .with_custom_action(close_action())
        .with_router_factory(factory);

    let app = build_app(&settings, &[Arc::new(tasks)])?;
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
