//! OpenAI-compatible HTTP client.
//!
//! Speaks the `/chat/completions` and `/embeddings` endpoints using the
//! legacy `functions` / `function_call` fields, which both the OpenAI API and
//! llama.cpp's server understand. Responses that use the newer `tool_calls`
//! shape are folded back into a single function call.

use crate::api::{ChatModel, EmbeddingData, ModelFuture};
use crate::config::ModelConfig;
use crate::error::BackendError;
use crate::functions::core::FunctionDef;
use crate::{Message, Role};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Optional fields are omitted when unset.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<FunctionDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<String>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// A message as it travels over the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WireMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallData>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let (name, function_call) = match (msg.role, &msg.function_call_name) {
            (Role::Function, name) => (name.clone(), None),
            (_, Some(name)) => (
                None,
                Some(FunctionCallData {
                    name: name.clone(),
                    arguments: msg
                        .function_call_arguments
                        .clone()
                        .unwrap_or_else(|| "{}".into()),
                }),
            ),
            (_, None) => (None, None),
        };
        Self {
            role: msg.role,
            content: msg.content.clone(),
            name,
            function_call,
        }
    }
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    function_call: Option<FunctionCallData>,
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Deserialize, Debug)]
struct RawToolCall {
    function: FunctionCallData,
}

#[derive(Deserialize, Debug)]
struct RawEmbeddingResponse {
    data: Option<Vec<EmbeddingData>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics reported by the backend.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl RawResponseMessage {
    fn into_message(self) -> Message {
        let call = self
            .function_call
            .or_else(|| self.tool_calls.and_then(|c| c.into_iter().next().map(|t| t.function)));
        match call {
            Some(call) => Message {
                role: Role::Assistant,
                content: self.content,
                function_call_name: Some(call.name),
                function_call_arguments: Some(call.arguments),
            },
            None => Message {
                role: Role::Assistant,
                content: self.content,
                function_call_name: None,
                function_call_arguments: None,
            },
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for OpenAI-compatible chat and embedding endpoints.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    functions: Vec<FunctionDef>,
}

impl OpenAiClient {
    /// Create a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parlance/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BackendError::Request(format!("failed to build HTTP client: {e}")))?;
        let model = model.into();
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            embedding_model: model.clone(),
            model,
            max_tokens: 0,
            temperature: None,
            functions: Vec::new(),
        })
    }

    /// Build a client from the `model` section of the configuration. The API
    /// key is read from the environment variable the config names, if any.
    pub fn from_config(config: &ModelConfig) -> Result<Self, BackendError> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        let mut client = Self::new(config.endpoint(), api_key, &config.model)?
            .with_max_tokens(config.max_tokens)
            .with_temperature(config.temperature);
        if let Some(ref embedding_model) = config.embedding_model {
            client = client.with_embedding_model(embedding_model);
        }
        Ok(client)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Offer these functions to the model on every completion request.
    pub fn with_functions(mut self, functions: Vec<FunctionDef>) -> Self {
        self.functions = functions;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request body for a message sequence.
    pub fn build_request(&self, messages: &[Message]) -> ChatRequest {
        let (functions, function_call) = if self.functions.is_empty() {
            (None, None)
        } else {
            (Some(self.functions.clone()), Some("auto".to_string()))
        };
        ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            functions,
            function_call,
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, BackendError> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let start = Instant::now();
        let resp = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Request(format!("failed to read response: {e}")))?;
        debug!(
            "POST {path}: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    /// Send a chat completion request and return the first choice.
    pub async fn chat(&self, body: &ChatRequest) -> Result<Message, BackendError> {
        debug!(
            "LLM request: model={}, messages={}, functions={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.functions.as_ref().map_or(0, |f| f.len()),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let text = self.post_json("chat/completions", body).await?;
        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(BackendError::Api(err.message));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        let message = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| c.message.into_message())
            .ok_or(BackendError::EmptyResponse)?;

        debug!(
            "LLM output: {} chars text, function_call={}",
            message.content.as_ref().map_or(0, |s| s.len()),
            message.function_call_name.as_deref().unwrap_or("none"),
        );
        Ok(message)
    }

    /// Request embeddings for `input` from the configured embedding model.
    pub async fn embeddings(&self, input: &[String]) -> Result<Vec<EmbeddingData>, BackendError> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input,
        };
        let text = self.post_json("embeddings", &body).await?;
        let parsed: RawEmbeddingResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Parse(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(BackendError::Api(err.message));
        }
        parsed.data.ok_or(BackendError::EmptyResponse)
    }
}

impl ChatModel for OpenAiClient {
    fn get_chat_completions<'a>(&'a self, messages: &'a [Message]) -> ModelFuture<'a, Message> {
        Box::pin(async move {
            let body = self.build_request(messages);
            self.chat(&body).await
        })
    }

    fn get_embeddings<'a>(&'a self, input: &'a [String]) -> ModelFuture<'a, Vec<EmbeddingData>> {
        Box::pin(self.embeddings(input))
    }
}
