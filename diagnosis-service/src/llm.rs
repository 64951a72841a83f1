//! General-model classification through OpenRouter.
//!
//! Fundus photographs go through a raw chat-completions call so the image can
//! be attached as a content part; ERG reports are text only and go through a
//! rig agent.

use anyhow::anyhow;
use diagnosis_flow::{
    GatewayError, GatewayResult, GeneralModelRequest, GeneralModelResponse, Modality,
};
use reqwest::Client;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};
use serde_json::{Value, json};
use tracing::{info, warn};

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const MAX_TOKENS: u32 = 1500;
const PREAMBLE: &str = "You are an expert ophthalmologist AI. You classify retinal examinations \
into a fixed list of categories and answer with JSON only.";

pub struct OpenRouterClassifier {
    http: Client,
    api_key: String,
    model: String,
}

impl OpenRouterClassifier {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub async fn classify(&self, request: &GeneralModelRequest) -> GatewayResult<GeneralModelResponse> {
        info!(modality = %request.modality, model = %self.model, "Classifying with OpenRouter");
        let raw = match request.modality {
            Modality::Fundus => self.classify_image(request).await,
            Modality::Erg => self.classify_report(request).await,
        }
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
        parse_classification(&raw)
    }

    fn agent(&self) -> anyhow::Result<Agent<openrouter::CompletionModel>> {
        let client = openrouter::Client::new(&self.api_key);
        Ok(client.agent(&self.model).preamble(PREAMBLE).build())
    }

    async fn classify_report(&self, request: &GeneralModelRequest) -> anyhow::Result<String> {
        let prompt = format!(
            "{}\n\nThe ERG report is available at: {}\n\n{}",
            request.prompt,
            request.file_urls.join(", "),
            answer_format(&request.response_json_schema)
        );
        let agent = self.agent()?;
        let response = agent.prompt(&prompt).await?;
        Ok(response)
    }

    async fn classify_image(&self, request: &GeneralModelRequest) -> anyhow::Result<String> {
        let mut content = vec![json!({
            "type": "text",
            "text": format!("{}\n\n{}", request.prompt, answer_format(&request.response_json_schema)),
        })];
        content.extend(request.file_urls.iter().map(|url| {
            json!({
                "type": "image_url",
                "image_url": { "url": url }
            })
        }));

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": PREAMBLE },
                { "role": "user", "content": content }
            ],
            "max_tokens": MAX_TOKENS
        });

        let response = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM API request failed: {}", response.status()));
        }

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Invalid response format from LLM"))
    }
}

fn answer_format(schema: &Value) -> String {
    format!("Respond **only** with a JSON object matching this schema:\n{schema}")
}

/// Parses the model's JSON answer, tolerating a surrounding code fence.
pub fn parse_classification(raw: &str) -> GatewayResult<GeneralModelResponse> {
    let trimmed = raw.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    serde_json::from_str(cleaned).map_err(|e| {
        warn!(raw = %raw, "Could not parse classification");
        GatewayError::Decode(format!("{e}. Raw response: {raw}"))
    })
}
