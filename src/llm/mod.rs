pub mod client;

pub use client::LlmClient;

use crate::conversation::LanguageModel;
use crate::tokens::ChatTurn;
use async_trait::async_trait;
use thiserror::Error;

/// Any way a completion can fail; the turn treats them all alike.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request could not be built: {0}")]
    InvalidRequest(String),

    #[error("completion API returned an error: {0}")]
    Upstream(String),

    #[error("completion API returned no choices")]
    NoChoices,

    #[error("completion was stopped by the content filter")]
    ContentFiltered,

    #[error("completion finished with unexpected reason: {0}")]
    UnexpectedFinish(String),
}

#[async_trait]
pub trait Completer: Send + Sync {
    /// Generates the next assistant message for `history`.
    ///
    /// `user_tag` is an opaque per-request identifier forwarded for abuse tracking.
    async fn complete(
        &self,
        history: &[ChatTurn],
        model: LanguageModel,
        user_tag: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError>;
}
