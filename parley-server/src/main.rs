use std::sync::Arc;

use parley_server::config::{AppConfig, StoreBackend};
use parley_server::store::{PgStore, Store};
use parley_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_shared::middleware::init_tracing("parley-server");

    let config = AppConfig::load()?;
    let port = config.port;

    let store = match config.store {
        StoreBackend::Postgres => {
            let pool = parley_shared::clients::db::create_pool(&config.database_url, config.pool_size)?;
            Store::Postgres(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Store::memory()
        }
    };

    let metrics_handle = match parley_shared::middleware::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed");
            None
        }
    };

    let state = Arc::new(AppState::new(config, store, metrics_handle));
    let app = parley_server::app(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "parley-server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
