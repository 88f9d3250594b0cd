//! Turn orchestration: one user input in, one visible reply out.
//!
//! A turn appends the user message, asks the backend for a completion over
//! the current window, and appends the response. When the response requests
//! a function call the function is executed and the model is asked to
//! interpret the result; the request, the result and the interpretation are
//! then appended in that order. Nothing reaches the ledgers until the
//! message it concerns is complete.

use crate::Message;
use crate::api::{RetryConfig, complete_with_retry};
use crate::error::TurnError;
use crate::functions::FunctionDispatcher;
use crate::memory::SessionManager;
use tracing::{debug, warn};

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Turn {
    /// Message to show the user, if any.
    pub reply: Option<Message>,
    /// Something went wrong that the user should know about.
    pub notice: Option<String>,
}

pub struct Conversation {
    session: SessionManager,
    dispatcher: FunctionDispatcher,
    retry: RetryConfig,
}

impl Conversation {
    pub fn new(session: SessionManager, dispatcher: FunctionDispatcher, retry: RetryConfig) -> Self {
        Self {
            session,
            dispatcher,
            retry,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    pub fn dispatcher(&self) -> &FunctionDispatcher {
        &self.dispatcher
    }

    /// Run one turn for `input`.
    ///
    /// Backend and ledger failures are errors; function-call failures are
    /// reported as a [`Turn::notice`] and leave the conversation usable.
    pub async fn respond(&mut self, input: impl Into<String>) -> Result<Turn, TurnError> {
        self.session.enqueue(Message::user(input)).await?;

        let model = self.session.model().clone();
        let response = complete_with_retry(model.as_ref(), &self.session.output(None), &self.retry).await?;

        if !response.requests_function_call() {
            self.session.enqueue(response.clone()).await?;
            return Ok(Turn {
                reply: Some(response),
                notice: None,
            });
        }

        let result = match self.dispatcher.execute_function(&response).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Function call dropped: {e}");
                return Ok(Turn {
                    reply: None,
                    notice: Some(format!("Function call failed: {e}")),
                });
            }
        };

        let mut context = self.session.output(None);
        context.push(response.clone());
        let follow_up = self
            .dispatcher
            .query_function(model.as_ref(), &result, &context)
            .await;

        self.session.enqueue(response).await?;
        self.session.enqueue(result.message.clone()).await?;

        match follow_up {
            Ok(reply) => {
                self.session.enqueue(reply.clone()).await?;
                debug!("Turn completed with function {}", result.name);
                Ok(Turn {
                    reply: Some(reply),
                    notice: None,
                })
            }
            Err(e) => Ok(Turn {
                reply: Some(result.message),
                notice: Some(format!("Function {} ran, but the follow-up failed: {e}", result.name)),
            }),
        }
    }

    pub fn save(&mut self) -> bool {
        self.session.save()
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}
