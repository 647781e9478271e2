use carbon::domain::{BackendKind, CacheConfig};
use carbon::ports::StorageFactory;
use server_tcp::{ServedStore, serve};
use shared::config::Config;
use storage_engine::LocalStorageFactory;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables from .env file (if exists)
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    let backend: BackendKind = config.backend.parse()?;
    let cache_config = CacheConfig::new(
        "carbon",
        backend,
        config.max_entries,
        config.default_ttl_ms,
    );

    let store = LocalStorageFactory.create_from_config(&cache_config)?;
    let served = ServedStore::new(store).with_default_ttl(cache_config.default_ttl());

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!(
        backend = ?backend,
        "TCP Server listening on tcp://{}",
        config.bind_addr()
    );

    serve(listener, served).await?;
    Ok(())
}
