//! Example consumer: serves every resource declared in `RESOURCE_CONFIG`.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Uses PostgreSQL when `DATABASE_URL` is set, the in-memory store otherwise.

use resource_api::{
    build_app, load_from_path, resolve_all, MemoryStore, PgStore, ResourceController, Settings, Store,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_api=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let path = settings
        .resource_config
        .clone()
        .unwrap_or_else(|| "resources.json".into());
    let config = load_from_path(&path).await?;
    let resources = resolve_all(&config)?;

    let store: Arc<dyn Store> = match settings.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::connect(url, &settings).await?),
        None => {
            tracing::warn!("DATABASE_URL not set, serving from memory");
            Arc::new(MemoryStore::new())
        }
    };

    let controllers: Vec<_> = resources
        .into_iter()
        .map(|r| Arc::new(ResourceController::new(r, store.clone())))
        .collect();
    let app = build_app(&settings, &controllers)?;

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
