pub mod api;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod templates;
