//! Automatic retry with exponential backoff and jitter.
//!
//! Only transient backend failures (429, 5xx, network errors) are retried;
//! see [`BackendError::is_transient`].

use crate::Message;
use crate::api::ChatModel;
use crate::error::BackendError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = fail on the first error).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Scale delays down by a per-attempt factor.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// No retries and no delay.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        // Deterministic jitter keeps tests stable and avoids a rand dependency.
        let factor = if self.jitter {
            match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            }
        } else {
            1.0
        };
        Duration::from_millis((capped * factor) as u64)
    }
}

/// Ask `model` for a completion, retrying transient failures per `retry`.
pub async fn complete_with_retry(
    model: &dyn ChatModel,
    messages: &[Message],
    retry: &RetryConfig,
) -> Result<Message, BackendError> {
    let mut attempt = 0;
    loop {
        match model.get_chat_completions(messages).await {
            Ok(message) => return Ok(message),
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    "Backend call failed ({e}); retry {}/{} in {}ms",
                    attempt + 1,
                    retry.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ModelFuture;
    use std::sync::Mutex;

    /// Fails with the queued errors, then answers.
    struct Flaky {
        failures: Mutex<Vec<BackendError>>,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(failures: Vec<BackendError>) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            }
        }
    }

    impl ChatModel for Flaky {
        fn get_chat_completions<'a>(&'a self, _messages: &'a [Message]) -> ModelFuture<'a, Message> {
            *self.calls.lock().unwrap() += 1;
            let next = self.failures.lock().unwrap().pop();
            Box::pin(async move {
                match next {
                    Some(e) => Err(e),
                    None => Ok(Message::assistant("ok")),
                }
            })
        }
    }

    fn http(status: u16) -> BackendError {
        BackendError::Http {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);
        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay_ms: 2_000,
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_reduces_delay() {
        let jittered = RetryConfig::with_retries(3);
        let plain = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(3)
        };
        assert!(jittered.delay_for_attempt(2) <= plain.delay_for_attempt(2));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let model = Flaky::new(vec![http(503), http(429)]);
        let retry = RetryConfig {
            initial_delay_ms: 1,
            ..RetryConfig::with_retries(3)
        };
        let reply = complete_with_retry(&model, &[], &retry).await.unwrap();
        assert_eq!(reply.content.as_deref(), Some("ok"));
        assert_eq!(*model.calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let model = Flaky::new(vec![http(401)]);
        let retry = RetryConfig {
            initial_delay_ms: 1,
            ..RetryConfig::with_retries(3)
        };
        let err = complete_with_retry(&model, &[], &retry).await.unwrap_err();
        assert!(matches!(err, BackendError::Http { status: 401, .. }));
        assert_eq!(*model.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let model = Flaky::new(vec![http(500), http(500), http(500)]);
        let err = complete_with_retry(&model, &[], &RetryConfig::none())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(*model.calls.lock().unwrap(), 1);
    }
}
