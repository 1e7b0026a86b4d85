use std::net::SocketAddr;
use std::sync::Arc;

use stagecache::cache::CacheManager;
use stagecache::common::{AnyError, logger};
use stagecache::configs::Config;
use stagecache::server::AppState;
use stagecache::transport;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let config = Config::load()?;
    logger::init(&config);

    let cache = CacheManager::new(&config.cache)?;
    let address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let state = Arc::new(AppState { config, cache });
    let app = transport::http_server::router(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    info!("Stagecache listening on {}", address);

    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
