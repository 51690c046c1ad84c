use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use motionx_api::state::{AppState, AppStateInner};
use motionx_api::storage::BlobStore;
use motionx_db::Database;
use motionx_realtime::{Hub, connection};
use motionx_sync::LocalBackend;

/// Secrets that ship in examples and must never reach a running server.
const PLACEHOLDER_SECRETS: &[&str] = &["dev-secret-change-me", "change-me", "changeme", "secret"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub blob_dir: PathBuf,
    pub public_url: String,
    pub blob_token: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("MOTIONX_JWT_SECRET").context("MOTIONX_JWT_SECRET must be set")?;
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MOTIONX_JWT_SECRET is a placeholder; set a real secret");
        }

        let port = match lookup("MOTIONX_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("MOTIONX_PORT is not a port: {}", raw))?,
            None => 3000,
        };

        Ok(Self {
            host: lookup("MOTIONX_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(lookup("MOTIONX_DB_PATH").unwrap_or_else(|| "motionx.db".into())),
            jwt_secret,
            blob_dir: PathBuf::from(lookup("MOTIONX_BLOB_DIR").unwrap_or_else(|| "./blobs".into())),
            public_url: lookup("MOTIONX_PUBLIC_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            blob_token: lookup("BLOB_READ_WRITE_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }
}

pub async fn build_state(config: &ServerConfig, db: Database) -> anyhow::Result<AppState> {
    let backend = Arc::new(LocalBackend::new(Arc::new(db), Hub::new()));
    let blobs = BlobStore::new(
        config.blob_dir.clone(),
        &config.public_url,
        config.blob_token.clone(),
    )
    .await?;
    Ok(Arc::new(AppStateInner::new(
        backend,
        blobs,
        config.jwt_secret.clone(),
    )))
}

/// Full HTTP surface: upload relay, session, realtime socket and blob files.
pub fn app(state: AppState) -> Router {
    let blobs = ServeDir::new(state.blobs.dir());

    let ws_route = Router::new()
        .route("/realtime", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(motionx_api::routes(state))
        .merge(ws_route)
        .nest_service("/blobs", blobs)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let hub = state.backend.hub().clone();
    let secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, hub, secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup(&[("MOTIONX_JWT_SECRET", "dev-secret-change-me")]))
                .is_err()
        );
    }

    #[test]
    fn defaults_fill_the_rest() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("MOTIONX_JWT_SECRET", "a-long-random-secret"),
            ("BLOB_READ_WRITE_TOKEN", "  "),
        ]))
        .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_path, PathBuf::from("motionx.db"));
        assert!(config.blob_token.is_none());
    }
}
