//! Failure taxonomy for a single turn.
//!
//! Every variant is caught at the turn boundary and turned into a chat reply;
//! none of them escape into the channel serializer or the registry.

use crate::conversation::ChannelConfig;
use crate::llm::CompletionError;
use crate::quota::{QuotaError, Tier};
use thiserror::Error;

pub const NOT_CONFIGURED_NOTICE: &str = "This channel is not configured for chatting with me.  \
Someone with permissions needs to run `/config` to configure this channel.";

pub const GUILD_TOO_NEW_NOTICE: &str =
    "Sorry. To prevent abuse, your server must be older before it can use this bot.";

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("channel has not been configured")]
    ConfigMissing,

    #[error("system messages alone use {used} tokens, over the {budget} token budget")]
    ContextOverflow { used: usize, budget: usize },

    #[error("moderation service unavailable: {0}")]
    ModerationService(String),

    #[error("content was flagged by moderation")]
    ModerationViolation,

    #[error("guild has run out of {0} tokens")]
    QuotaExhausted(Tier),

    #[error("failed to update quota: {0}")]
    QuotaStore(String),

    #[error("guild is younger than the minimum allowed age")]
    GuildTooNew,

    #[error(transparent)]
    CompletionFailed(#[from] CompletionError),

    #[error("failed to deliver message: {0}")]
    Delivery(String),
}

impl TurnError {
    /// The text sent back to the channel when a turn ends with this error.
    pub fn user_message(&self, config: &ChannelConfig) -> String {
        match self {
            TurnError::ConfigMissing => NOT_CONFIGURED_NOTICE.to_string(),
            TurnError::ModerationViolation => config.moderation_violation.clone(),
            TurnError::QuotaExhausted(tier) => {
                format!("Sorry, this server has run out of {} tokens.", tier.label())
            }
            TurnError::GuildTooNew => GUILD_TOO_NEW_NOTICE.to_string(),
            TurnError::ContextOverflow { .. }
            | TurnError::ModerationService(_)
            | TurnError::QuotaStore(_)
            | TurnError::CompletionFailed(_)
            | TurnError::Delivery(_) => config.error_response.clone(),
        }
    }
}

impl From<QuotaError> for TurnError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Exhausted(tier) => TurnError::QuotaExhausted(tier),
            QuotaError::Store(msg) => TurnError::QuotaStore(msg),
        }
    }
}
