//! Conversation memory runtime for chat-completion agents.
//!
//! `parlance` keeps two ledgers per conversation session: a bounded
//! [`ContextWindow`](memory::window::ContextWindow) holding the messages that
//! are actually sent to the backend, and an unbounded
//! [`Transcript`](memory::transcript::Transcript) holding everything ever said.
//! The [`SessionManager`](memory::session::SessionManager) keeps the two in
//! lockstep, persists and restores them, and optionally archives messages
//! evicted from the window into a vector store for later recall.
//!
//! Function calls requested by the model are resolved and executed by the
//! [`FunctionDispatcher`](functions::dispatch::FunctionDispatcher), which
//! re-queries the backend on a shadow copy of the conversation so the
//! authoritative ledgers only ever see complete messages.
//!
//! # Getting started
//!
//! ```ignore
//! use parlance::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.json")?;
//!     let client = Arc::new(OpenAiClient::from_config(&config.model)?);
//!
//!     let mut session = SessionManager::new(
//!         "demo",
//!         config.ledger_store(),
//!         config.window_budget(),
//!         client.clone(),
//!     )?;
//!     session.load(config.system_prompt()).await?;
//!
//!     session.enqueue(Message::user("Hello!")).await?;
//!     let reply = client.get_chat_completions(&session.output(None)).await?;
//!     session.enqueue(reply).await?;
//!     session.save();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`memory`] | Context window and transcript ledgers, session manager, ledger storage |
//! | [`functions`] | [`Function`](functions::core::Function) trait, registry, dispatcher, built-ins |
//! | [`recall`] | Vector store and embedding contracts, local store, eviction archiver |
//! | [`api`] | [`ChatModel`](api::ChatModel) backend contract, OpenAI-compatible client, retry |
//! | [`chat`] | Turn orchestration used by the CLI |

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod functions;
pub mod logging;
pub mod memory;
pub mod prelude;
pub mod recall;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema value from a type that implements
/// `schemars::JsonSchema`, for use as a function's `parameters`.
///
/// # Example
///
/// ```
/// use parlance::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs {
///     key: String,
/// }
///
/// let schema = json_schema_for::<LookupArgs>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    /// Every role, in conversational order.
    pub const ALL: [Role; 4] = [Role::System, Role::User, Role::Assistant, Role::Function];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "function" => Ok(Role::Function),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A single conversation message.
///
/// `function_call_arguments` is kept as the raw text the model produced;
/// it is only parsed when the call is dispatched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call_arguments: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            function_call_name: None,
            function_call_arguments: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// An assistant message asking for `name` to be invoked with `arguments`.
    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            function_call_name: Some(name.into()),
            function_call_arguments: Some(arguments.into()),
        }
    }

    /// A `function`-role message carrying the output of `name`.
    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            function_call_name: Some(name.into()),
            function_call_arguments: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Whether the model asked for a function to be run.
    pub fn requests_function_call(&self) -> bool {
        self.role == Role::Assistant && self.function_call_name.is_some()
    }

    /// Characters counted against a token budget: content plus any
    /// function name and raw arguments.
    pub fn char_count(&self) -> usize {
        [
            self.content.as_deref(),
            self.function_call_name.as_deref(),
            self.function_call_arguments.as_deref(),
        ]
        .iter()
        .flatten()
        .map(|s| s.chars().count())
        .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, Role::System);
        assert!(sys.is_system());
        assert_eq!(sys.content.as_deref(), Some("hello"));

        let call = Message::function_call("get_current_weather", r#"{"location":"Paris"}"#);
        assert_eq!(call.role, Role::Assistant);
        assert!(call.requests_function_call());
        assert!(call.content.is_none());

        let result = Message::function("get_current_weather", "sunny");
        assert_eq!(result.role, Role::Function);
        assert!(!result.requests_function_call());
    }

    #[test]
    fn serde_skips_absent_function_fields_but_keeps_null_content() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("function_call_name").is_none());

        let call = serde_json::to_value(Message::function_call("f", "{}")).unwrap();
        assert!(call["content"].is_null());
        assert_eq!(call["function_call_name"], "f");
    }

    #[test]
    fn deserializes_minimal_message() {
        let msg: Message = serde_json::from_str(r#"{"role":"assistant"}"#).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_none());
    }

    #[test]
    fn role_parses_and_displays() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn char_count_covers_function_fields() {
        let call = Message::function_call("abc", "{}");
        assert_eq!(call.char_count(), 5);
        assert_eq!(Message::user("héllo").char_count(), 5);
    }
}
