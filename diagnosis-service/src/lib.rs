pub mod backend;
pub mod config;
pub mod llm;
pub mod models;
pub mod service;
pub mod workflow;

pub use backend::HttpGateway;
pub use config::ServiceConfig;
pub use llm::OpenRouterClassifier;
pub use models::*;
pub use service::{AppState, build_router, create_app};
pub use workflow::{build_gateway, create_flow_runner, create_session_storage};
