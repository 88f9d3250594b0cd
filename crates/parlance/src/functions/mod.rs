//! Functions the model can call, and the dispatcher that runs them.
//!
//! - [`core`]: the [`Function`] trait, [`FnFunction`] closure wrapper,
//!   [`FunctionRegistry`], and schema validation.
//! - [`dispatch`]: [`FunctionDispatcher`], which resolves, executes, and
//!   follows up a model-requested call.
//! - [`weather`]: the built-in `get_current_weather` function.

pub mod core;
pub mod dispatch;
pub mod weather;

pub use self::core::{FnFunction, Function, FunctionArgs, FunctionDef, FunctionFuture, FunctionRegistry};
pub use dispatch::{DispatchPhase, FunctionDispatcher, FunctionResult, PromptTemplate};
pub use weather::CurrentWeather;
