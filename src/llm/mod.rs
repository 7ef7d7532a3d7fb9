//! Text-generation backend abstraction.
//!
//! Every provider implements [`TextGenerationClient`]; the orchestrator works
//! against the trait and never inspects provider-specific response shapes.
//! Providers register in a [`ClientRegistry`] under a name; session
//! `provider_override`/`model_override` are resolved through the registry at
//! call time, so adding a provider means registering it, not editing a
//! dispatch function.

mod gemini;
mod ollama;
mod qwen;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::errors::LlmError;
use crate::session::ConversationTurn;

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use qwen::QwenClient;

/// Default request timeout for provider HTTP calls.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// An opaque text-generation capability.
///
/// `history` carries prior turns for conversational continuity; providers
/// whose wire format has no turn concept may fold it into the prompt or
/// ignore it.
#[async_trait]
pub trait TextGenerationClient: std::fmt::Debug + Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<String, LlmError>;
}

/// Constructs a client for a provider, honoring an optional model override.
pub type ClientFactory =
    Box<dyn Fn(&Config, Option<&str>) -> Result<Box<dyn TextGenerationClient>, LlmError> + Send + Sync>;

/// Provider name → client factory.
pub struct ClientRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl ClientRegistry {
    /// An empty registry. Useful for tests that register a mock.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in providers: ollama, qwen, gemini.
    pub fn with_builtin_providers() -> Self {
        let mut registry = Self::new();
        registry.register("ollama", |config, model| {
            Ok(Box::new(OllamaClient::new_from_config(config, model)?))
        });
        registry.register("qwen", |config, model| {
            Ok(Box::new(QwenClient::new_from_config(config, model)?))
        });
        registry.register("gemini", |config, model| {
            Ok(Box::new(GeminiClient::new_from_config(config, model)?))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Config, Option<&str>) -> Result<Box<dyn TextGenerationClient>, LlmError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a client for `provider_override`, falling back to the config's
    /// active provider.
    pub fn resolve(
        &self,
        config: &Config,
        provider_override: Option<&str>,
        model_override: Option<&str>,
    ) -> Result<Box<dyn TextGenerationClient>, LlmError> {
        let provider = provider_override
            .unwrap_or(&config.active_provider)
            .to_lowercase();
        let factory = self.factories.get(&provider).ok_or_else(|| {
            LlmError::UnknownProvider(format!(
                "{} (registered: {})",
                provider,
                self.providers().join(", ")
            ))
        })?;
        let client = factory(config, model_override)?;
        debug!(provider = %client.provider(), model = %client.model(), "Resolved backend client");
        Ok(client)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_builtin_providers()
    }
}

/// Strip reasoning markers from backend output.
///
/// Models wrapped with a thinking mode emit `<<think>> ... <</think>>` before
/// the answer; everything up to the last closing marker is dropped. An
/// opening marker without a close means truncated output, returned as-is so
/// nothing is lost.
pub fn clean_output(text: &str) -> String {
    const CLOSING: &str = "<</think>>";
    const OPENING: &str = "<<think>>";

    if let Some(idx) = text.rfind(CLOSING) {
        text[idx + CLOSING.len()..].trim().to_string()
    } else if text.contains(OPENING) {
        text.to_string()
    } else {
        text.trim().to_string()
    }
}
