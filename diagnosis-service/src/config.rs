use anyhow::{Context as _, anyhow};
use diagnosis_flow::SeverityPolicy;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";

/// Service settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub backend_base_url: String,
    pub backend_api_key: Option<String>,
    /// When set, the general model runs through OpenRouter instead of the
    /// backend's LLM integration.
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub database_url: Option<String>,
    pub severity_policy: SeverityPolicy,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {raw:?}"))?,
            None => DEFAULT_PORT,
        };

        let backend_base_url = var("BACKEND_BASE_URL")
            .ok_or_else(|| anyhow!("BACKEND_BASE_URL environment variable is required"))?
            .trim()
            .trim_end_matches('/')
            .to_string();

        let mut severity_policy = SeverityPolicy::default();
        if let Some(normal) = var("NORMAL_CONDITION") {
            severity_policy.normal_condition = normal.trim().to_string();
        }
        if let Some(fatal) = var("FATAL_CONDITIONS") {
            severity_policy.fatal_conditions = fatal
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(raw) = var("CONFIDENCE_FLOOR") {
            let floor = raw
                .trim()
                .parse::<f64>()
                .with_context(|| format!("CONFIDENCE_FLOOR must be a number, got {raw:?}"))?;
            if !(0.0..=100.0).contains(&floor) {
                return Err(anyhow!("CONFIDENCE_FLOOR must be between 0 and 100, got {floor}"));
            }
            severity_policy.confidence_floor = floor;
        }

        Ok(Self {
            port,
            backend_base_url,
            backend_api_key: var("BACKEND_API_KEY"),
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            openrouter_model: var("OPENROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            database_url: var("DATABASE_URL"),
            severity_policy,
        })
    }
}
