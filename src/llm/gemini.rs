use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{REQUEST_TIMEOUT_SECS, TextGenerationClient};
use crate::config::Config;
use crate::errors::LlmError;
use crate::session::{ConversationTurn, Role};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini backend over the generateContent REST endpoint.
#[derive(Debug)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new_from_config(config: &Config, model_override: Option<&str>) -> Result<Self, LlmError> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or_else(|| LlmError::Misconfiguration("GEMINI_API_KEY not set".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::Misconfiguration(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model: model_override
                .map(str::to_string)
                .unwrap_or_else(|| config.gemini_model.clone()),
        })
    }

    fn request_body(&self, prompt: &str, history: &[ConversationTurn]) -> serde_json::Value {
        // Gemini's role vocabulary is user/model; system notes are carried as
        // user turns.
        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::Assistant => "model",
                    Role::User | Role::System => "user",
                };
                json!({ "role": role, "parts": [{ "text": turn.content }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));
        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": 1024,
                "topP": 0.95,
            }
        })
    }
}

#[async_trait]
impl TextGenerationClient for GeminiClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, LlmError> {
        let url = format!("{}/{}:generateContent", API_BASE, self.model);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(prompt, history))
            .send()
            .await
            .map_err(|e| LlmError::Request {
                provider: "gemini".into(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "gemini".into(),
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value =
            response.json().await.map_err(|e| LlmError::MalformedResponse {
                provider: "gemini".into(),
                message: e.to_string(),
            })?;

        payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse {
                provider: "gemini".into(),
                message: "missing candidate text".into(),
            })
    }
}
