//! HTTP surface over the orchestrator.

mod routes;
mod server;

pub use routes::{ApiError, AppState, SharedState, api_router};
pub use server::{ServerConfig, build_router, build_store, start_server};
