//! Campus server: reads configuration from the environment, prepares the data store and serves the API.

use campus_portal::client::{DataClient, MemoryClient, PgClient, Schema};
use campus_portal::service::{LogSmsSender, MemoryCodeStore, SiteService};
use campus_portal::storage::{MemoryStorage, ObjectStorage, S3Storage};
use campus_portal::{app, apply_migrations, ensure_database_exists, AppConfig, AppState, StorageBackend};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("campus_portal=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let schema = Schema::campus();

    let client: Arc<dyn DataClient> = match config.database_url.as_deref() {
        Some(url) => {
            ensure_database_exists(url).await?;
            let pg = PgClient::connect(url, config.database_max_connections, schema.clone()).await?;
            apply_migrations(pg.pool(), &schema).await?;
            tracing::info!("using postgres data client");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; data is kept in memory");
            Arc::new(MemoryClient::new(schema))
        }
    };

    let storage: Arc<dyn ObjectStorage> = match &config.storage {
        StorageBackend::S3 { bucket, endpoint } => {
            tracing::info!(bucket = %bucket, "using s3 object storage");
            Arc::new(S3Storage::from_env(bucket.clone(), endpoint.clone()).await)
        }
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };

    let bind_addr = config.bind_addr.clone();
    let environment = config.environment;
    let state = AppState::new(config, client, Arc::new(MemoryCodeStore::new()), Arc::new(LogSmsSender), storage);
    SiteService::bootstrap(&state).await?;
    if state.config.admin_mobiles.is_empty() {
        tracing::warn!("ADMIN_MOBILES not set; no account can reach the admin routes");
    }

    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(env = ?environment, "listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
