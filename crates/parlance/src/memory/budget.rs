//! Context window budget: how much the window may hold.
//!
//! The bound is a message count, an estimated token count, or both. Tokens
//! are estimated from character counts, which is close enough to keep
//! request payloads under backend limits without a tokenizer.

use crate::Message;
use serde::{Deserialize, Serialize};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Default token bound for a context window.
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Smallest usable message bound: the system message plus the newest message.
pub const MIN_MAX_MESSAGES: usize = 2;

/// Capacity of a [`ContextWindow`](super::window::ContextWindow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowBudget {
    /// Maximum number of messages, system message included.
    pub max_messages: Option<usize>,
    /// Maximum estimated tokens across all messages.
    pub max_tokens: Option<usize>,
    /// Characters per token used for estimation.
    pub chars_per_token: f64,
}

impl Default for WindowBudget {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl WindowBudget {
    /// A budget bounded only by message count.
    pub fn messages(max: usize) -> Self {
        Self {
            max_messages: Some(max.max(MIN_MAX_MESSAGES)),
            max_tokens: None,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// A budget bounded only by estimated tokens.
    pub fn tokens(max: usize) -> Self {
        Self {
            max_messages: None,
            max_tokens: Some(max),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    /// A budget with no bound at all.
    pub fn unbounded() -> Self {
        Self {
            max_messages: None,
            max_tokens: None,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max.max(MIN_MAX_MESSAGES));
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    /// Estimated tokens for one message. Rounded up so that any non-empty
    /// message costs at least one token.
    pub fn estimate_message_tokens(&self, message: &Message) -> usize {
        let cpt = if self.chars_per_token > 0.0 {
            self.chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        (message.char_count() as f64 / cpt).ceil() as usize
    }

    /// Measure a sequence of messages against this budget.
    pub fn estimate_usage<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) -> WindowUsage {
        let (count, tokens) = messages.into_iter().fold((0, 0), |(n, t), m| {
            (n + 1, t + self.estimate_message_tokens(m))
        });
        WindowUsage {
            messages: count,
            estimated_tokens: tokens,
            max_messages: self.max_messages,
            max_tokens: self.max_tokens,
        }
    }
}

/// Snapshot of window usage at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowUsage {
    pub messages: usize,
    pub estimated_tokens: usize,
    pub max_messages: Option<usize>,
    pub max_tokens: Option<usize>,
}

impl WindowUsage {
    /// Whether either bound is exceeded.
    pub fn is_exceeded(&self) -> bool {
        self.max_messages.is_some_and(|max| self.messages > max)
            || self.max_tokens.is_some_and(|max| self.estimated_tokens > max)
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        let bound = |max: Option<usize>| max.map_or_else(|| "∞".to_string(), |m| m.to_string());
        format!(
            "window: {}/{} messages, ~{}/{} tokens",
            self.messages,
            bound(self.max_messages),
            self.estimated_tokens,
            bound(self.max_tokens),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_bound_has_a_floor() {
        assert_eq!(WindowBudget::messages(1).max_messages, Some(MIN_MAX_MESSAGES));
        assert_eq!(WindowBudget::messages(5).max_messages, Some(5));
    }

    #[test]
    fn token_estimate_rounds_up() {
        let budget = WindowBudget::tokens(100).with_chars_per_token(4.0);
        assert_eq!(budget.estimate_message_tokens(&Message::user("abcde")), 2);
        assert_eq!(budget.estimate_message_tokens(&Message::user("")), 0);
    }

    #[test]
    fn usage_sums_across_messages() {
        let budget = WindowBudget::tokens(10).with_chars_per_token(1.0);
        let messages = [Message::system("12345"), Message::user("123456")];
        let usage = budget.estimate_usage(&messages);
        assert_eq!(usage.messages, 2);
        assert_eq!(usage.estimated_tokens, 11);
        assert!(usage.is_exceeded());
    }

    #[test]
    fn unbounded_never_exceeded() {
        let budget = WindowBudget::unbounded();
        let messages: Vec<Message> = (0..1000).map(|i| Message::user(i.to_string())).collect();
        assert!(!budget.estimate_usage(&messages).is_exceeded());
    }

    #[test]
    fn either_bound_triggers() {
        let budget = WindowBudget::messages(3).with_max_tokens(1_000);
        let four: Vec<Message> = (0..4).map(|_| Message::user("x")).collect();
        assert!(budget.estimate_usage(&four).is_exceeded());
        assert!(!budget.estimate_usage(&four[..3]).is_exceeded());
    }

    #[test]
    fn usage_log_string_format() {
        let budget = WindowBudget::messages(4);
        let log = budget.estimate_usage(&[Message::user("hi")]).to_log_string();
        assert!(log.contains("1/4 messages"));
        assert!(log.contains("tokens"));
    }

    #[test]
    fn zero_chars_per_token_falls_back_to_default() {
        let budget = WindowBudget::tokens(10).with_chars_per_token(0.0);
        assert_eq!(budget.estimate_message_tokens(&Message::user("1234567")), 2);
    }
}
