//! Function abstraction for model-requested function calls.
//!
//! The [`Function`] trait defines what every callable must provide: a static
//! definition (name, description, JSON Schema) and an async `call` method
//! taking the keyword arguments as a JSON object. Functions are collected in
//! a [`FunctionRegistry`], which the dispatcher looks them up in by name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Keyword arguments of a function call.
pub type FunctionArgs = serde_json::Map<String, Value>;

/// Boxed future returned by [`Function::call`].
///
/// `Err` carries a human-readable reason; the dispatcher wraps it in
/// [`DispatchError::FunctionExecutionError`](crate::error::DispatchError).
pub type FunctionFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Function definition offered to the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ── Function trait ─────────────────────────────────────────────────

/// A function the model can ask to have invoked.
///
/// # Example
///
/// ```ignore
/// struct Clock;
///
/// impl Function for Clock {
///     fn definition(&self) -> FunctionDef {
///         FunctionDef::new("now", "Current UTC time", serde_json::json!({"type": "object"}))
///     }
///
///     fn call(&self, _args: FunctionArgs) -> FunctionFuture<'_> {
///         Box::pin(async { Ok(chrono::Utc::now().to_rfc3339()) })
///     }
/// }
/// ```
pub trait Function: Send + Sync {
    fn definition(&self) -> FunctionDef;

    /// Run the function. Uses a boxed future so the trait stays
    /// dyn-compatible.
    fn call(&self, args: FunctionArgs) -> FunctionFuture<'_>;

    fn name(&self) -> String {
        self.definition().name
    }
}

// ── FnFunction ─────────────────────────────────────────────────────

/// Type-erased async handler for [`FnFunction`].
type ErasedHandler =
    Box<dyn Fn(FunctionArgs) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send + Sync>;

/// A closure-based function whose arguments are deserialized into a typed
/// struct before the handler runs.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct AddArgs { a: i64, b: i64 }
///
/// let add = FnFunction::new(
///     FunctionDef::new("add", "Add two integers", json_schema_for::<AddArgs>()),
///     |args: AddArgs| async move { Ok((args.a + args.b).to_string()) },
/// );
/// ```
pub struct FnFunction {
    def: FunctionDef,
    handler: ErasedHandler,
}

impl FnFunction {
    pub fn new<A, F, Fut>(def: FunctionDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let erased = move |raw: FunctionArgs| -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> {
            match serde_json::from_value::<A>(Value::Object(raw)) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(format!("invalid arguments: {e}")) }),
            }
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Function for FnFunction {
    fn definition(&self) -> FunctionDef {
        self.def.clone()
    }

    fn call(&self, args: FunctionArgs) -> FunctionFuture<'_> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── FunctionRegistry ───────────────────────────────────────────────

/// Functions addressable by name.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Box<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the function's own definition name (builder pattern).
    pub fn with(mut self, function: impl Function + 'static) -> Self {
        let name = function.name();
        self.register(name, function);
        self
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, function: impl Function + 'static) {
        let name = name.into();
        debug!("Registered function {name}");
        if self.functions.insert(name.clone(), Box::new(function)).is_some() {
            debug!("Function {name} replaced an earlier registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Function> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for every registered function, sorted by registered name.
    /// The definition's name is replaced by the registered name so the
    /// backend asks for functions by the key they are looked up with.
    pub fn definitions(&self) -> Vec<FunctionDef> {
        self.names()
            .into_iter()
            .filter_map(|name| {
                let mut def = self.functions.get(&name)?.definition();
                def.name = name;
                Some(def)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate `args` against the function's declared JSON Schema.
///
/// On failure returns the violations joined by `; `. A schema that itself fails
/// to compile is not enforced.
pub fn validate_arguments(function: &dyn Function, args: &FunctionArgs) -> Result<(), String> {
    let schema = function.definition().parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping validation for {}: invalid schema: {e}", function.name());
            return Ok(());
        }
    };

    let instance = Value::Object(args.clone());
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_schema_for;
    use schemars::JsonSchema;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn add() -> FnFunction {
        FnFunction::new(
            FunctionDef::new("add", "Add two integers", json_schema_for::<AddArgs>()),
            |args: AddArgs| async move { Ok((args.a + args.b).to_string()) },
        )
    }

    fn args(value: Value) -> FunctionArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn fn_function_parses_typed_args() {
        let out = add().call(args(json!({"a": 2, "b": 3}))).await;
        assert_eq!(out, Ok("5".to_string()));
    }

    #[tokio::test]
    async fn fn_function_reports_bad_args() {
        let out = add().call(args(json!({"a": "two"}))).await;
        assert!(out.unwrap_err().starts_with("invalid arguments"));
    }

    #[test]
    fn registry_lookup_and_definitions() {
        let mut registry = FunctionRegistry::new().with(add());
        registry.register("sum", add());

        assert_eq!(registry.len(), 2);
        assert!(registry.get("add").is_some());
        assert!(registry.get("missing").is_none());

        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["add", "sum"]);
    }

    #[test]
    fn schema_validation() {
        let f = add();
        assert!(validate_arguments(&f, &args(json!({"a": 1, "b": 2}))).is_ok());

        let err = validate_arguments(&f, &args(json!({"a": 1}))).unwrap_err();
        assert!(err.contains("b"), "{err}");

        let err = validate_arguments(&f, &args(json!({"a": 1, "b": "x"}))).unwrap_err();
        assert!(err.contains("/b"), "{err}");
    }

    #[test]
    fn invalid_schema_is_not_enforced() {
        let f = FnFunction::new(
            FunctionDef::new("odd", "bad schema", json!({"type": 12})),
            |_: Value| async { Ok(String::new()) },
        );
        assert!(validate_arguments(&f, &FunctionArgs::new()).is_ok());
    }
}
