pub mod appresult;
pub mod auth;
pub mod config;
pub mod error;
pub mod relay;
pub mod rooms;
pub mod store;
pub mod uploads;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRef, State},
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use auth::{IdentityProvider, JwtIdentityProvider};
use config::Config;
use relay::Relay;
use store::SqliteMessageStore;
use uploads::{LocalObjectStore, ObjectStore};

pub use appresult::{AppError, AppResult};

// room for the multipart envelope around a maximum-size image
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub identity: Arc<dyn IdentityProvider>,
    pub objects: Arc<dyn ObjectStore>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the sqlite message store, JWT verification and local uploads.
    pub async fn from_config(config: Config) -> anyhow::Result<AppState> {
        let store =
            SqliteMessageStore::connect(&config.database_url, config.database_max_connections)
                .await
            .with_context(|| format!("opening message store at {}", config.database_url))?;

        Ok(AppState {
            relay: Arc::new(Relay::new(Arc::new(store), config.history_limit)),
            identity: Arc::new(JwtIdentityProvider::new(config.jwt_secret.as_bytes())),
            objects: Arc::new(LocalObjectStore::new(
                &config.upload_dir,
                &config.public_base_url,
                config.max_upload_bytes,
            )),
            config: Arc::new(config),
        })
    }
}

pub fn app(state: AppState) -> Router {
    let config = state.config.clone();

    let origin = if config.cors_origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(&config.cors_origin) {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(_) => {
                tracing::warn!(origin = %config.cors_origin, "unusable CORS origin, allowing none");
                AllowOrigin::list([])
            }
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .merge(rooms::router())
        .nest("/api/upload", uploads::router())
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes + MULTIPART_OVERHEAD))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(relay): State<Arc<Relay>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "online": relay.presence().online_snapshot().len(),
    }))
}

/// Installs the fmt subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pairline=info,tower_http=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
