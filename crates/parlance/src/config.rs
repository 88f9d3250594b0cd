//! Runtime configuration with sensible defaults.
//!
//! [`Config`] is read once from a JSON file (default `config.json`) and then
//! threaded explicitly into the components that need it. Every section, and
//! every field within a section, is optional:
//!
//! ```json
//! {
//!   "app": { "path": { "local": ".parlance" }, "log_file": null },
//!   "model": { "provider": "llama_cpp", "model": "mistral-7b-instruct" },
//!   "system_prompt": { "role": "system", "content": "You are a helpful assistant." },
//!   "context": { "max_messages": 32, "max_tokens": 4096 },
//!   "function": { "templates": [{ "name": "get_current_weather", "prompt": "..." }] },
//!   "recall": { "enabled": true, "collection": "parlance", "n_results": 3 },
//!   "retry": { "max_retries": 2 },
//!   "chat": { "max_consecutive_failures": 3 }
//! }
//! ```

use crate::api::RetryConfig;
use crate::error::ConfigError;
use crate::functions::PromptTemplate;
use crate::memory::budget::MIN_MAX_MESSAGES;
use crate::memory::{LedgerStore, WindowBudget};
use crate::{Message, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub model: ModelConfig,
    pub system_prompt: SystemPromptConfig,
    pub context: WindowBudget,
    pub function: FunctionConfig,
    pub recall: RecallConfig,
    pub retry: RetryConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub path: PathConfig,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root for session ledgers and the local vector store.
    pub local: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            local: PathBuf::from(".parlance"),
        }
    }
}

/// Which kind of server the model is served from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    OpenAi,
    LlamaCpp,
}

impl Provider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => crate::api::client::DEFAULT_BASE_URL,
            Provider::LlamaCpp => "http://127.0.0.1:8080/v1",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::OpenAi => "openai",
            Provider::LlamaCpp => "llama_cpp",
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "llama_cpp" => Ok(Provider::LlamaCpp),
            other => Err(format!("unknown provider '{other}' (expected openai or llama_cpp)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: Provider,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub model: String,
    /// Embedding model; defaults to `model`.
    pub embedding_model: Option<String>,
    /// Response token limit; 0 leaves it to the server.
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            base_url: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            model: "gpt-3.5-turbo".to_string(),
            embedding_model: Some("text-embedding-ada-002".to_string()),
            max_tokens: 1024,
            temperature: Some(0.7),
        }
    }
}

impl ModelConfig {
    /// Endpoint to send requests to.
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemPromptConfig {
    pub role: Role,
    pub content: String,
}

impl Default for SystemPromptConfig {
    fn default() -> Self {
        Self {
            role: Role::System,
            content: "You are a helpful assistant.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionConfig {
    /// Offer the built-in functions to the model.
    pub enabled: bool,
    /// Follow-up prompts, looked up by function name.
    pub templates: Vec<PromptTemplate>,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            templates: vec![PromptTemplate::new(
                crate::functions::weather::FUNCTION_NAME,
                "Using the weather report above, briefly tell me the current weather.",
            )],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// Archive evicted messages and allow `/recall`.
    pub enabled: bool,
    pub collection: String,
    /// Vector store directory; defaults to `<app.path.local>/vectors`.
    pub path: Option<PathBuf>,
    pub n_results: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            collection: "parlance".to_string(),
            path: None,
            n_results: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Give up after this many failed turns in a row.
    pub max_consecutive_failures: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
        }
    }
}

// ── Loading ────────────────────────────────────────────────────────

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Read and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("failed to read {}: {e}", path.display())))?;
        json.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.system_prompt.role != Role::System {
            return invalid(format!(
                "system_prompt.role must be system, got {}",
                self.system_prompt.role
            ));
        }
        if self.model.model.trim().is_empty() {
            return invalid("model.model must not be empty".into());
        }
        if let Some(t) = self.model.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return invalid(format!("model.temperature must be in 0.0..=2.0, got {t}"));
        }
        if self.context.chars_per_token <= 0.0 {
            return invalid("context.chars_per_token must be positive".into());
        }
        if self.context.max_tokens == Some(0) {
            return invalid("context.max_tokens must be positive".into());
        }
        if self.function.templates.iter().any(|t| t.name.trim().is_empty()) {
            return invalid("function.templates entries need a name".into());
        }
        if self.recall.n_results == 0 {
            return invalid("recall.n_results must be positive".into());
        }
        if self.recall.collection.trim().is_empty() {
            return invalid("recall.collection must not be empty".into());
        }
        Ok(())
    }

    // ── Derived values ─────────────────────────────────────────────

    pub fn system_prompt(&self) -> Message {
        Message {
            role: self.system_prompt.role,
            content: Some(self.system_prompt.content.clone()),
            function_call_name: None,
            function_call_arguments: None,
        }
    }

    /// Window budget with the message bound raised to its floor.
    pub fn window_budget(&self) -> WindowBudget {
        WindowBudget {
            max_messages: self
                .context
                .max_messages
                .map(|m| m.max(MIN_MAX_MESSAGES)),
            ..self.context.clone()
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry.clone()
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.app.path.local.join("sessions")
    }

    pub fn ledger_store(&self) -> LedgerStore {
        LedgerStore::new(self.ledger_dir())
    }

    pub fn recall_dir(&self) -> PathBuf {
        self.recall
            .path
            .clone()
            .unwrap_or_else(|| self.app.path.local.join("vectors"))
    }

    pub fn templates(&self) -> &[PromptTemplate] {
        &self.function.templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config: Config = "{}".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.system_prompt(), Message::system("You are a helpful assistant."));
        assert_eq!(config.model.endpoint(), crate::api::client::DEFAULT_BASE_URL);
    }

    #[test]
    fn partial_sections_fill_in() {
        let config: Config = r#"{
            "model": {"provider": "llama_cpp", "model": "mistral"},
            "context": {"max_messages": 1},
            "function": {"templates": [{"name": "f", "prompt": "p"}]}
        }"#
        .parse()
        .unwrap();
        assert_eq!(config.model.endpoint(), "http://127.0.0.1:8080/v1");
        assert_eq!(config.model.max_tokens, 1024);
        assert_eq!(config.window_budget().max_messages, Some(MIN_MAX_MESSAGES));
        assert_eq!(config.templates(), [PromptTemplate::new("f", "p")]);
    }

    #[test]
    fn explicit_base_url_wins() {
        let config: Config =
            r#"{"model": {"provider": "llama_cpp", "base_url": "http://gpu:9000/v1"}}"#
                .parse()
                .unwrap();
        assert_eq!(config.model.endpoint(), "http://gpu:9000/v1");
    }

    #[test]
    fn system_prompt_must_be_system() {
        let err = r#"{"system_prompt": {"role": "user", "content": "x"}}"#
            .parse::<Config>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_bad_values() {
        for json in [
            r#"{"model": {"temperature": 3.5}}"#,
            r#"{"context": {"chars_per_token": 0}}"#,
            r#"{"context": {"max_tokens": 0}}"#,
            r#"{"recall": {"n_results": 0}}"#,
            r#"{"function": {"templates": [{"name": " ", "prompt": "p"}]}}"#,
        ] {
            assert!(
                matches!(json.parse::<Config>(), Err(ConfigError::Validation(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!("{".parse::<Config>(), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(matches!(Config::load(&path), Err(ConfigError::FileNotFound(_))));

        std::fs::write(&path, r#"{"app": {"path": {"local": "/srv/p"}}}"#).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ledger_dir(), PathBuf::from("/srv/p/sessions"));
        assert_eq!(config.recall_dir(), PathBuf::from("/srv/p/vectors"));
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!("anthropic".parse::<Provider>().is_err());
        assert_eq!("llama_cpp".parse::<Provider>().unwrap(), Provider::LlamaCpp);
    }
}
