use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

/// Runtime configuration for metaprompt.
///
/// Values come from the environment (a `.env` file is honored via dotenvy in
/// `main`), with the same defaults the original deployment used. Tests build
/// a `Config` directly instead of going through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider used when a session carries no `provider_override`.
    pub active_provider: String,

    // Ollama
    pub ollama_api_url: String,
    pub ollama_model: String,

    // Gemini
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    // Qwen (DashScope)
    pub qwen_api_key: Option<String>,
    pub qwen_api_url: String,
    pub qwen_model: String,

    /// Session store backend: "memory" or "file".
    pub session_storage: String,
    /// Directory for the file store and the feedback file.
    pub data_dir: PathBuf,
    /// Idle sessions older than this are reaped by the expiry sweep.
    pub session_ttl: Duration,
    /// Default recursion ceiling for new sessions.
    pub default_max_depth: u32,

    pub feedback_file: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var("METAPROMPT_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .map(|d| d.join("metaprompt"))
                .unwrap_or_else(|| PathBuf::from("data")),
        };

        let session_ttl = env_or("SESSION_EXPIRY_SECONDS", "3600")
            .parse::<u64>()
            .map(Duration::from_secs)
            .context("SESSION_EXPIRY_SECONDS must be an integer number of seconds")?;

        let default_max_depth = env_or("MAX_RECURSION_DEPTH", "3")
            .parse::<u32>()
            .context("MAX_RECURSION_DEPTH must be an integer")?;

        Ok(Self {
            active_provider: env_or("ACTIVE_LLM_PROVIDER", "ollama").to_lowercase(),
            ollama_api_url: env_or("OLLAMA_API_URL", "http://localhost:11434"),
            ollama_model: env_or("OLLAMA_MODEL", "qwen3:4b"),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gemini_model: env_or("GEMINI_MODEL_NAME", "gemini-1.5-flash-latest"),
            // DashScope's SDK convention: DASHSCOPE_API_KEY preferred,
            // QWEN_API_KEY accepted
            qwen_api_key: std::env::var("DASHSCOPE_API_KEY")
                .or_else(|_| std::env::var("QWEN_API_KEY"))
                .ok(),
            qwen_api_url: env_or(
                "QWEN_API_URL",
                "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation",
            ),
            qwen_model: env_or("QWEN_MODEL_NAME", "qwen-plus"),
            session_storage: env_or("SESSION_STORAGE_TYPE", "memory").to_lowercase(),
            feedback_file: data_dir.join("user_feedback.json"),
            data_dir,
            session_ttl,
            default_max_depth,
        })
    }

    /// A config with defaults and no credentials, for tests.
    pub fn for_testing(data_dir: PathBuf) -> Self {
        Self {
            active_provider: "ollama".into(),
            ollama_api_url: "http://localhost:11434".into(),
            ollama_model: "qwen3:4b".into(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash-latest".into(),
            qwen_api_key: None,
            qwen_api_url:
                "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation"
                    .into(),
            qwen_model: "qwen-plus".into(),
            session_storage: "memory".into(),
            feedback_file: data_dir.join("user_feedback.json"),
            data_dir,
            session_ttl: Duration::from_secs(3600),
            default_max_depth: 3,
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Fail fast if the active provider is missing its credentials. Ollama
    /// is local and needs none.
    pub fn check_configuration(&self) -> Result<()> {
        match self.active_provider.as_str() {
            "ollama" => Ok(()),
            "gemini" => {
                if self.gemini_api_key.is_none() {
                    Err(anyhow!(
                        "ACTIVE_LLM_PROVIDER is 'gemini' but GEMINI_API_KEY is not set"
                    ))
                } else {
                    Ok(())
                }
            }
            "qwen" => {
                if self.qwen_api_key.is_none() {
                    Err(anyhow!(
                        "ACTIVE_LLM_PROVIDER is 'qwen' but DASHSCOPE_API_KEY (or QWEN_API_KEY) is not set"
                    ))
                } else {
                    Ok(())
                }
            }
            other => Err(anyhow!("Unknown ACTIVE_LLM_PROVIDER '{}'", other)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
