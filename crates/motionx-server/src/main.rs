use std::net::SocketAddr;

use tracing::info;

use motionx_db::Database;
use motionx_server::{ServerConfig, app, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motionx=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let db = Database::open(&config.db_path)?;
    let state = build_state(&config, db).await?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("MotionX server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
