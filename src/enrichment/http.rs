//! HTTP enricher for OpenAI-compatible chat endpoints (Ollama, vLLM, OpenAI)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{EnrichmentContext, EnrichmentError, Enricher};
use crate::config::EnrichmentConfig;

const SYSTEM_PROMPT: &str = "You are a diesel generator powertrain analyst. \
    Be concise and concrete. Reference load bands and readings by name.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct HttpEnricher {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEnricher {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichmentError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Build from `[enrichment]`. The API key is read from the environment
    /// variable the config names; a missing variable means no auth header.
    pub fn from_config(config: &EnrichmentConfig, timeout: Duration) -> Result<Self, EnrichmentError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| EnrichmentError::Unavailable("no endpoint configured".to_string()))?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::new(endpoint, &config.model, api_key, timeout)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }
}

fn narrative_from(response: ChatResponse) -> Result<String, EnrichmentError> {
    response
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| EnrichmentError::Unavailable("empty completion".to_string()))
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, context: &EnrichmentContext) -> Result<String, EnrichmentError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": context.prompt() },
            ],
        });

        let resp = self
            .authorized(self.http.post(format!("{}/chat/completions", self.endpoint)))
            .json(&body)
            .send()
            .await?;

        match resp.status() {
            reqwest::StatusCode::OK => {
                let parsed: ChatResponse = resp.json().await?;
                let narrative = narrative_from(parsed)?;
                debug!(chars = narrative.len(), model = %self.model, "Enrichment narrative received");
                Ok(narrative)
            }
            status => Err(EnrichmentError::Unavailable(format!(
                "endpoint returned status {status}"
            ))),
        }
    }

    async fn ping(&self) -> Result<(), EnrichmentError> {
        let resp = self
            .authorized(self.http.get(format!("{}/models", self.endpoint)))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EnrichmentError::Unavailable(format!(
                "endpoint returned status {}",
                resp.status()
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "openai-compatible"
    }
}
