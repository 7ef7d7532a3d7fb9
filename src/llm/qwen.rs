use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{REQUEST_TIMEOUT_SECS, TextGenerationClient};
use crate::config::Config;
use crate::errors::LlmError;
use crate::session::ConversationTurn;

/// Qwen backend over the DashScope text-generation endpoint.
#[derive(Debug)]
pub struct QwenClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl QwenClient {
    pub fn new_from_config(config: &Config, model_override: Option<&str>) -> Result<Self, LlmError> {
        let api_key = config.qwen_api_key.clone().ok_or_else(|| {
            LlmError::Misconfiguration(
                "Qwen API key not set (DASHSCOPE_API_KEY or QWEN_API_KEY)".into(),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Misconfiguration(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.qwen_api_url.clone(),
            api_key,
            model: model_override
                .map(str::to_string)
                .unwrap_or_else(|| config.qwen_model.clone()),
        })
    }

    fn request_body(&self, prompt: &str, history: &[ConversationTurn]) -> serde_json::Value {
        // DashScope's prompt-style input is single-turn; carry history as
        // messages when present.
        let input = if history.is_empty() {
            json!({ "prompt": prompt })
        } else {
            let mut messages: Vec<serde_json::Value> = history
                .iter()
                .map(|t| json!({ "role": role_name(t), "content": t.content }))
                .collect();
            messages.push(json!({ "role": "user", "content": prompt }));
            json!({ "messages": messages })
        };
        json!({
            "model": self.model,
            "input": input,
            "parameters": {
                "temperature": 0.7,
                "max_tokens": 1024,
                "top_p": 0.8,
                "result_format": "text",
                // Must be false for non-streaming calls
                "enable_thinking": false,
            }
        })
    }
}

fn role_name(turn: &ConversationTurn) -> &'static str {
    match turn.role {
        crate::session::Role::User => "user",
        crate::session::Role::Assistant => "assistant",
        crate::session::Role::System => "system",
    }
}

#[async_trait]
impl TextGenerationClient for QwenClient {
    fn provider(&self) -> &str {
        "qwen"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, LlmError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, history))
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: "qwen".into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "qwen".into(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| LlmError::MalformedResponse {
                provider: "qwen".into(),
                message: e.to_string(),
            })?;

        payload
            .pointer("/output/text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "qwen".into(),
                message: "missing 'output.text' field".into(),
            })
    }
}
