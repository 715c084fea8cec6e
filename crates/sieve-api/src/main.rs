//! Sieve API Server

mod auth;
mod error;
mod models;
mod routes;

use auth::TokenVerifier;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use sieve_core::{
    ChatCompletionClient, CoreResult, GatewayConfig, PgResultStore, Recommender, ScanOrchestrator,
    SummarizerConfig, VirusTotalGateway,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: ScanOrchestrator,
    pub recommender: Recommender,
    pub verifier: TokenVerifier,
    pub config: AppConfig,
}

/// Application configuration
#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub auth_disabled: bool,
    pub max_upload_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/sieve".to_string()),
            bind_addr: std::env::var("SIEVE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            jwt_audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string()),
            auth_disabled: std::env::var("SIEVE_AUTH_DISABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            max_upload_size: std::env::var("SIEVE_MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(650 * 1024 * 1024), // 650MB, the provider's large-file ceiling
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload_size = state.config.max_upload_size;

    Router::new()
        // Health check
        .route("/health", get(routes::health_check))

        // Files
        .route("/api/files/upload", post(routes::files::upload_file))
        .route("/api/files/analyses/:id", get(routes::files::get_analysis))
        .route("/api/files/report/:hash", get(routes::files::get_report))

        // Recommendations
        .route("/api/recommend", post(routes::recommend::recommend))
        .route("/api/recommend/:hash", get(routes::recommend::recommend_for_hash))

        .layer(DefaultBodyLimit::max(max_upload_size))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn build_state(config: AppConfig) -> CoreResult<AppState> {
    let store = PgResultStore::connect(&config.database_url, 10).await?;
    info!("Connected to database");

    store.migrate().await?;
    info!("Database migrations complete");

    let gateway = VirusTotalGateway::new(GatewayConfig::default())?;
    let summarizer = ChatCompletionClient::new(SummarizerConfig::default())?;

    if config.auth_disabled {
        info!("Authentication disabled");
    }
    let verifier = TokenVerifier::new(&config.jwt_secret, &config.jwt_audience, config.auth_disabled);

    Ok(AppState {
        orchestrator: ScanOrchestrator::new(Arc::new(store), Arc::new(gateway)),
        recommender: Recommender::new(Arc::new(summarizer)),
        verifier,
        config,
    })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sieve_api=debug,sieve_core=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sieve API Server");

    let config = AppConfig::default();
    let bind_addr = config.bind_addr.clone();

    let state = match build_state(config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
