use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{REQUEST_TIMEOUT_SECS, TextGenerationClient};
use crate::config::Config;
use crate::errors::LlmError;
use crate::session::ConversationTurn;

/// Local Ollama backend over its `/api/generate` endpoint.
///
/// The generate endpoint is single-turn, so prior history is folded into the
/// prompt as a transcript.
#[derive(Debug)]
pub struct OllamaClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new_from_config(config: &Config, model_override: Option<&str>) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Misconfiguration(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.ollama_api_url.trim_end_matches('/').to_string(),
            model: model_override
                .map(str::to_string)
                .unwrap_or_else(|| config.ollama_model.clone()),
        })
    }

    fn request_body(&self, prompt: &str, history: &[ConversationTurn]) -> serde_json::Value {
        json!({
            "model": self.model,
            "prompt": build_prompt(prompt, history),
            "temperature": 0.7,
            "stream": false,
        })
    }
}

/// Prepend history as a plain transcript; the last user prompt goes last.
fn build_prompt(prompt: &str, history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return prompt.to_string();
    }
    let mut out = String::new();
    for turn in history {
        out.push_str(&format!("[{:?}] {}\n\n", turn.role, turn.content));
    }
    out.push_str(prompt);
    out
}

#[async_trait]
impl TextGenerationClient for OllamaClient {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.api_url);
        let response = self
            .http
            .post(&url)
            .json(&self.request_body(prompt, history))
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: "ollama".into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "ollama".into(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| LlmError::MalformedResponse {
                provider: "ollama".into(),
                message: e.to_string(),
            })?;

        payload
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "ollama".into(),
                message: "missing 'response' field".into(),
            })
    }
}
