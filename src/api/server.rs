use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::routes::{AppState, api_router};
use crate::config::Config;
use crate::feedback::FeedbackLog;
use crate::llm::ClientRegistry;
use crate::orchestrator::RefinementOrchestrator;
use crate::store::{FileStore, InMemoryStore, SessionStore};

/// Listener settings for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8788,
            permissive_cors: false,
        }
    }
}

/// Build the application router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    api_router().with_state(state)
}

/// Pick the session store backend named in config.
pub fn build_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    match config.session_storage.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "file" => {
            let store = FileStore::new(config.sessions_dir())
                .context("Failed to initialize file session store")?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!(
            "Unknown SESSION_STORAGE_TYPE '{}' (expected memory or file)",
            other
        ),
    }
}

/// Wire up state and serve until Ctrl+C.
pub async fn start_server(config: Config, server: ServerConfig) -> Result<()> {
    config.check_configuration()?;
    let store = build_store(&config)?;
    let feedback = FeedbackLog::new(config.feedback_file.clone());
    let orchestrator =
        RefinementOrchestrator::new(config, store, ClientRegistry::with_builtin_providers());

    let state = Arc::new(AppState {
        orchestrator,
        feedback,
    });

    let mut app = build_router(state);
    if server.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", server.host, server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %listener.local_addr()?, "metaprompt server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    // Failing to install the handler leaves no way to stop cleanly
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install Ctrl+C handler");
    }
}
