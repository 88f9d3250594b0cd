//! Function-call dispatch.
//!
//! When the model answers with a function call, the dispatcher resolves the
//! function by name, parses and validates the arguments, runs it, and then
//! asks the model to interpret the result. That follow-up query runs on a
//! shadow copy of the conversation: the result message and a templated user
//! prompt are appended to the copy only, so the caller decides what enters
//! the real ledgers.
//!
//! ```text
//! Idle ─▶ Resolving ─┬─▶ Executing ─┬─▶ Completed
//!                    │              └─▶ Failed
//!                    └─▶ Rejected
//! ```

use super::core::{Function, FunctionArgs, FunctionDef, FunctionRegistry, validate_arguments};
use crate::Message;
use crate::api::ChatModel;
use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info};

/// Follow-up prompt sent after the function with the same name has run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: String,
    pub prompt: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

/// Progress of a single function call, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    Resolving,
    Executing,
    Rejected,
    Completed,
    Failed,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchPhase::Idle => "idle",
            DispatchPhase::Resolving => "resolving",
            DispatchPhase::Executing => "executing",
            DispatchPhase::Rejected => "rejected",
            DispatchPhase::Completed => "completed",
            DispatchPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Output of a function that ran successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    /// Name the function was dispatched under.
    pub name: String,
    /// `assistant` message carrying the function's return value.
    pub message: Message,
}

pub struct FunctionDispatcher {
    registry: FunctionRegistry,
    templates: Vec<PromptTemplate>,
    validate_args: bool,
}

impl FunctionDispatcher {
    pub fn new(templates: Vec<PromptTemplate>) -> Self {
        Self {
            registry: FunctionRegistry::new(),
            templates,
            validate_args: true,
        }
    }

    /// Register a function (builder pattern).
    pub fn with_function(mut self, name: impl Into<String>, function: impl Function + 'static) -> Self {
        self.register_function(name, function);
        self
    }

    /// Check arguments against each function's JSON Schema before running
    /// it. On by default.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn register_function(&mut self, name: impl Into<String>, function: impl Function + 'static) {
        self.registry.register(name, function);
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Definitions of all registered functions, for the backend request.
    pub fn definitions(&self) -> Vec<FunctionDef> {
        self.registry.definitions()
    }

    /// Template registered for `name`. When several match, the last wins.
    pub fn template_for(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.iter().rev().find(|t| t.name == name)
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// The function `message` asks for, if it is registered.
    pub fn get_function(&self, message: &Message) -> Option<&dyn Function> {
        let name = message.function_call_name.as_deref()?;
        let function = self.registry.get(name);
        if function.is_none() {
            error!("Function {name} not found");
        }
        function
    }

    /// Parse the raw arguments of `message` into a keyword map.
    ///
    /// Missing arguments, malformed JSON and non-object values are all
    /// [`DispatchError::InvalidArguments`]. An empty object is valid.
    pub fn parse_function_args(&self, message: &Message) -> Result<FunctionArgs, DispatchError> {
        let name = message.function_call_name.clone().unwrap_or_default();
        let invalid = |reason: String| DispatchError::InvalidArguments {
            name: name.clone(),
            reason,
        };

        let raw = message
            .function_call_arguments
            .as_deref()
            .ok_or_else(|| invalid("no arguments given".into()))?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(invalid(format!("expected a JSON object, got {other}"))),
            Err(e) => Err(invalid(format!("malformed JSON: {e}"))),
        }
    }

    /// Like [`parse_function_args`](Self::parse_function_args), but logs the
    /// failure and yields an empty map.
    pub fn get_function_args(&self, message: &Message) -> FunctionArgs {
        self.parse_function_args(message).unwrap_or_else(|e| {
            error!("{e}");
            FunctionArgs::new()
        })
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Run the function `message` asks for.
    pub async fn execute_function(&self, message: &Message) -> Result<FunctionResult, DispatchError> {
        let name = message.function_call_name.clone().unwrap_or_default();
        trace_phase(&name, DispatchPhase::Idle);
        trace_phase(&name, DispatchPhase::Resolving);

        let Some(function) = self.get_function(message) else {
            trace_phase(&name, DispatchPhase::Rejected);
            return Err(DispatchError::FunctionNotFound(name));
        };

        let args = self.parse_function_args(message).inspect_err(|e| {
            error!("{e}");
            trace_phase(&name, DispatchPhase::Rejected);
        })?;

        if self.validate_args
            && let Err(reason) = validate_arguments(function, &args)
        {
            let e = DispatchError::InvalidArguments {
                name: name.clone(),
                reason,
            };
            error!("{e}");
            trace_phase(&name, DispatchPhase::Rejected);
            return Err(e);
        }

        trace_phase(&name, DispatchPhase::Executing);
        let shown = Value::Object(args.clone());
        info!("[function] {name}({shown})");
        match function.call(args).await {
            Ok(output) => {
                trace_phase(&name, DispatchPhase::Completed);
                Ok(FunctionResult {
                    message: Message::assistant(output),
                    name,
                })
            }
            Err(reason) => {
                trace_phase(&name, DispatchPhase::Failed);
                let e = DispatchError::FunctionExecutionError { name, reason };
                error!("{e}");
                Err(e)
            }
        }
    }

    /// Ask the model to interpret `result`.
    ///
    /// `messages` is copied, the result and the function's prompt template
    /// are appended to the copy, and the copy is sent in exactly one backend
    /// call. `messages` itself is never modified.
    pub async fn query_function(
        &self,
        model: &dyn ChatModel,
        result: &FunctionResult,
        messages: &[Message],
    ) -> Result<Message, DispatchError> {
        let Some(template) = self.template_for(&result.name) else {
            let e = DispatchError::TemplateNotFound(result.name.clone());
            error!("{e}");
            return Err(e);
        };

        let mut shadow = messages.to_vec();
        shadow.push(result.message.clone());
        shadow.push(Message::user(template.prompt.clone()));
        debug!(
            "[function] querying model about {} with {} message(s)",
            result.name,
            shadow.len()
        );

        model.get_chat_completions(&shadow).await.map_err(|e| {
            error!("Follow-up query for {} failed: {e}", result.name);
            DispatchError::BackendFailure(e)
        })
    }
}

fn trace_phase(name: &str, phase: DispatchPhase) {
    debug!("[function] {name}: {phase}");
}
