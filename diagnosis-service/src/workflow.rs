use diagnosis_flow::{
    DiagnosisWorkflow, FlowRunner, InMemorySessionStorage, PostgresSessionStorage,
    RemoteDataGateway, SessionStorage,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::backend::HttpGateway;
use crate::config::ServiceConfig;
use crate::llm::OpenRouterClassifier;

pub fn build_gateway(config: &ServiceConfig) -> Arc<dyn RemoteDataGateway> {
    let gateway = HttpGateway::new(&config.backend_base_url, config.backend_api_key.clone());
    match &config.openrouter_api_key {
        Some(api_key) => {
            info!(model = %config.openrouter_model, "General model runs through OpenRouter");
            Arc::new(gateway.with_classifier(OpenRouterClassifier::new(
                api_key.clone(),
                config.openrouter_model.clone(),
            )))
        }
        None => {
            info!("General model runs through the backend LLM integration");
            Arc::new(gateway)
        }
    }
}

/// Postgres when `DATABASE_URL` is set and reachable, otherwise in-memory.
pub async fn create_session_storage(config: &ServiceConfig) -> Arc<dyn SessionStorage> {
    let Some(database_url) = &config.database_url else {
        info!("Using in-memory session storage");
        return Arc::new(InMemorySessionStorage::new());
    };

    info!("Using PostgreSQL session storage");
    match PostgresSessionStorage::connect(database_url).await {
        Ok(storage) => Arc::new(storage),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            );
            Arc::new(InMemorySessionStorage::new())
        }
    }
}

pub fn create_flow_runner(
    gateway: Arc<dyn RemoteDataGateway>,
    config: &ServiceConfig,
    session_storage: Arc<dyn SessionStorage>,
) -> FlowRunner {
    let workflow =
        DiagnosisWorkflow::new(gateway).with_policy(config.severity_policy.clone());
    FlowRunner::new(Arc::new(workflow), session_storage)
}
