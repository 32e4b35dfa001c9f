//! Token estimation for chat payloads.
//!
//! Estimates cover the structured message the completion API is billed for,
//! not just the raw text: every message pays for its role, its author name and
//! a fixed framing overhead, and each request pays for reply priming.

use crate::conversation::Role;
use tiktoken_rs::CoreBPE;

/// Framing tokens around every message (`<|start|>{role}\n ... <|end|>`).
pub const TOKENS_PER_MESSAGE: usize = 3;
/// A `name` field costs one token on top of its own text.
pub const TOKENS_PER_NAME: usize = 1;
/// Every reply is primed with `<|start|>assistant<|message|>`.
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// One message as it is sent to the completion API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Opaque author tag, sent as the message `name`.
    pub name: String,
}

pub trait TokenCounter: Send + Sync {
    /// Tokens in a plain string.
    fn count_text(&self, text: &str) -> usize;

    /// Tokens for a list of structured messages, including framing overhead.
    fn estimate(&self, turns: &[ChatTurn]) -> usize {
        let per_message: usize = turns
            .iter()
            .map(|turn| {
                let mut tokens = TOKENS_PER_MESSAGE
                    + self.count_text(turn.role.as_str())
                    + self.count_text(&turn.content);
                if !turn.name.is_empty() {
                    tokens += self.count_text(&turn.name) + TOKENS_PER_NAME;
                }
                tokens
            })
            .sum();
        per_message + REPLY_PRIMING_TOKENS
    }
}

/// BPE counter using the `cl100k_base` vocabulary shared by the GPT-3.5 and GPT-4 families.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> anyhow::Result<Self> {
        Ok(Self {
            bpe: tiktoken_rs::cl100k_base()?,
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Charges exactly one token per content byte, so tests can pick costs directly.
    pub struct FixedCounter;

    impl TokenCounter for FixedCounter {
        fn count_text(&self, text: &str) -> usize {
            text.len()
        }

        fn estimate(&self, turns: &[ChatTurn]) -> usize {
            turns.iter().map(|t| t.content.len()).sum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str, name: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_empty_estimate_is_priming_only() {
        let counter = TiktokenCounter::cl100k().unwrap();
        assert_eq!(counter.estimate(&[]), REPLY_PRIMING_TOKENS);
    }

    #[test]
    fn test_structure_is_charged() {
        let counter = TiktokenCounter::cl100k().unwrap();
        let content = "hello world";
        let raw = counter.count_text(content);
        let estimate = counter.estimate(&[turn(Role::User, content, "")]);
        assert!(estimate > raw + TOKENS_PER_MESSAGE);

        let named = counter.estimate(&[turn(Role::User, content, "123456789")]);
        assert!(named > estimate);
    }

    #[test]
    fn test_estimate_is_deterministic_and_monotonic() {
        let counter = TiktokenCounter::cl100k().unwrap();
        let mut turns = vec![turn(Role::System, "You are a helpful bot.", "")];
        let mut previous = counter.estimate(&turns);
        assert_eq!(previous, counter.estimate(&turns));

        for content in ["hi", "a", "How are you doing today?"] {
            turns.push(turn(Role::User, content, "42"));
            let next = counter.estimate(&turns);
            assert!(next > previous);
            previous = next;
        }
    }
}
