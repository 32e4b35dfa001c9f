//! One inbound message in, at most one reply out.
//!
//! Turns for a channel are run one at a time by the channel serializer. Every
//! failure is caught here, logged inside the `turn` span and answered in chat.

use crate::config::{Config, DISCORD_MESSAGE_LIMIT};
use crate::conversation::{ChannelConfig, MessageRecord, NewMessage, Role};
use crate::discord_text::split_message;
use crate::error::TurnError;
use crate::gateway::{Gateway, InboundMessage};
use crate::llm::Completer;
use crate::moderation::ModerationGate;
use crate::quota::QuotaError;
use crate::registry::{ConversationRegistry, SharedWindow};
use crate::serializer::TurnHandler;
use crate::tokens::TokenCounter;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bot_id: String,
    /// Channels the bot may answer in; empty means everywhere.
    pub allowed_channels: Vec<String>,
    pub auto_configure_channels: bool,
    pub typing_interval: Duration,
    /// Minimum guild age in seconds, if enforced.
    pub min_guild_age_secs: Option<i64>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config, bot_id: impl Into<String>) -> Self {
        let min_age_days = i64::try_from(config.min_guild_age_days).unwrap_or(i64::MAX);
        Self {
            bot_id: bot_id.into(),
            allowed_channels: config.allowed_channels.clone(),
            auto_configure_channels: config.auto_configure_channels,
            typing_interval: Duration::from_secs(config.typing_interval_secs.max(1)),
            min_guild_age_secs: (min_age_days > 0).then(|| min_age_days.saturating_mul(86_400)),
        }
    }
}

pub struct TurnPipeline {
    registry: Arc<ConversationRegistry>,
    gateway: Arc<dyn Gateway>,
    completer: Arc<dyn Completer>,
    moderation: ModerationGate,
    counter: Arc<dyn TokenCounter>,
    settings: PipelineSettings,
}

/// Keeps the typing indicator alive until dropped.
struct TypingGuard(JoinHandle<()>);

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl TurnPipeline {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        gateway: Arc<dyn Gateway>,
        completer: Arc<dyn Completer>,
        moderation: ModerationGate,
        counter: Arc<dyn TokenCounter>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            gateway,
            completer,
            moderation,
            counter,
            settings,
        }
    }

    async fn run(&self, event: InboundMessage) {
        if event.author_id == self.settings.bot_id {
            return;
        }
        if !self.settings.allowed_channels.is_empty()
            && !self.settings.allowed_channels.contains(&event.channel_id)
        {
            debug!("Channel is not in the allow-list, ignoring");
            return;
        }

        let Some(window) = self.resolve_window(&event).await else {
            if event.mentions_bot {
                info!("Channel not configured, but mentioned, replying with /config notice");
                self.report(&event, &TurnError::ConfigMissing, &ChannelConfig::default())
                    .await;
            }
            return;
        };

        let (config, recorded) = {
            let mut window = window.lock().await;
            let record = self.user_record(&event);
            let recorded = window.add_message(record).await;
            (window.config().clone(), recorded)
        };
        debug!("{}: {}", event.author_id, event.content);

        if !self.should_respond(&event, &config) {
            if let Err(e) = recorded {
                error!("Failed to record message: {}", e);
            }
            return;
        }

        let _typing = self.start_typing(&event.channel_id);
        let result = match recorded {
            Ok(()) => self.respond(&event, &window).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.report(&event, &e, &config).await;
        }
    }

    async fn resolve_window(&self, event: &InboundMessage) -> Option<SharedWindow> {
        if self.settings.auto_configure_channels {
            Some(
                self.registry
                    .get_or_create_channel(&event.guild_id, &event.channel_id)
                    .await,
            )
        } else {
            self.registry
                .find_channel(&event.guild_id, &event.channel_id)
                .await
        }
    }

    fn user_record(&self, event: &InboundMessage) -> MessageRecord {
        MessageRecord::new(
            NewMessage {
                id: Some(event.id.clone()),
                guild_id: event.guild_id.clone(),
                channel_id: event.channel_id.clone(),
                author_id: event.author_id.clone(),
                content: event.content.clone(),
                timestamp: event.created_timestamp,
                role: Role::User,
            },
            self.counter.as_ref(),
        )
    }

    fn should_respond(&self, event: &InboundMessage, config: &ChannelConfig) -> bool {
        if event.mentions_everyone_or_role && config.ignore_everyone_mentions {
            debug!("Message mentions everyone or a role, ignoring");
            return false;
        }
        if event.is_bot_author && config.ignore_bots {
            debug!("Message is from a bot, ignoring");
            return false;
        }
        if config.only_respond_to_mentions && !event.mentions_bot {
            return false;
        }
        if event.mentions_other_users && !event.mentions_bot {
            debug!("Message has mentions, but not us, ignoring");
            return false;
        }
        true
    }

    fn start_typing(&self, channel_id: &str) -> TypingGuard {
        let gateway = self.gateway.clone();
        let channel_id = channel_id.to_string();
        let interval = self.settings.typing_interval;
        TypingGuard(tokio::spawn(async move {
            loop {
                if let Err(e) = gateway.send_typing(&channel_id).await {
                    warn!("Error sending typing: {}", e);
                }
                tokio::time::sleep(interval).await;
            }
        }))
    }

    async fn respond(&self, event: &InboundMessage, window: &SharedWindow) -> Result<(), TurnError> {
        let ledger = self.registry.ledger(&event.guild_id).await;
        let mut window = window.lock().await;
        let config = window.config().clone();
        let tier = config.language_model.tier();

        let flagged = self.moderation.find_flagged(&window.contents()).await?;
        if !flagged.is_empty() {
            let removed = window.remove_flagged(&flagged).await;
            warn!(
                "Moderation violation: {} texts flagged, {} messages removed",
                flagged.len(),
                removed
            );
            return Err(TurnError::ModerationViolation);
        }

        self.check_guild_age(event)?;
        ledger.lock().await.ensure_available(tier).await?;

        info!(
            "Creating completion with prompt tokens: {}",
            window.total_tokens()
        );
        let response = self
            .completer
            .complete(
                &window.history(),
                config.language_model,
                &event.author_id,
                config.max_tokens_per_message,
            )
            .await?;

        let cost = i64::try_from(window.total_tokens()).unwrap_or(i64::MAX);
        match ledger.lock().await.debit(tier, cost).await {
            Ok(remaining) => debug!("Debited {} {} tokens, {} remaining", cost, tier, remaining),
            Err(QuotaError::Exhausted(tier)) => {
                warn!("Guild ran out of {} tokens on this turn", tier)
            }
            Err(e) => error!("Failed to record token usage: {}", e),
        }

        let response_flagged = self
            .moderation
            .find_flagged(std::slice::from_ref(&response))
            .await?;
        if !response_flagged.is_empty() {
            warn!("Moderation violation in our own response: {}", response);
            return Err(TurnError::ModerationViolation);
        }

        let record = MessageRecord::new(
            NewMessage {
                id: None,
                guild_id: event.guild_id.clone(),
                channel_id: event.channel_id.clone(),
                author_id: self.settings.bot_id.clone(),
                content: response.clone(),
                timestamp: Utc::now().timestamp(),
                role: Role::Assistant,
            },
            self.counter.as_ref(),
        );
        window.add_message(record).await?;
        info!("AI response: {}", response);

        let mut text = response;
        if !window.disclaimer_sent() && !config.disclaimer.is_empty() {
            debug!("Adding disclaimer to message");
            text = format!("{}\n\n{}", config.disclaimer, text);
            window.mark_disclaimer_sent().await;
        }
        drop(window);

        self.deliver(event, &text).await
    }

    fn check_guild_age(&self, event: &InboundMessage) -> Result<(), TurnError> {
        let Some(min_age) = self.settings.min_guild_age_secs else {
            return Ok(());
        };
        match event.guild_created_at {
            Some(created) if Utc::now().timestamp() - created >= min_age => Ok(()),
            _ => {
                warn!("Server is younger than {} seconds, ignoring message", min_age);
                Err(TurnError::GuildTooNew)
            }
        }
    }

    async fn deliver(&self, event: &InboundMessage, text: &str) -> Result<(), TurnError> {
        for chunk in split_message(text, DISCORD_MESSAGE_LIMIT) {
            let sent = if event.mentions_bot {
                self.gateway.reply(&event.channel_id, &event.id, &chunk).await
            } else {
                self.gateway.send_to_channel(&event.channel_id, &chunk).await
            };
            sent.map_err(|e| TurnError::Delivery(e.to_string()))?;
        }
        Ok(())
    }

    async fn report(&self, event: &InboundMessage, err: &TurnError, config: &ChannelConfig) {
        match err {
            TurnError::ContextOverflow { .. } => {
                error!("Channel is misconfigured and cannot respond: {}", err)
            }
            TurnError::ConfigMissing
            | TurnError::ModerationViolation
            | TurnError::QuotaExhausted(_)
            | TurnError::GuildTooNew => info!("Turn stopped: {}", err),
            _ => error!("Error: {}", err),
        }

        if let Err(e) = self
            .gateway
            .reply(&event.channel_id, &event.id, &err.user_message(config))
            .await
        {
            error!("Failed to send error reply: {}", e);
        }
    }
}

#[async_trait]
impl TurnHandler<InboundMessage> for TurnPipeline {
    async fn handle(&self, event: InboundMessage) {
        let span = info_span!(
            "turn",
            guild_id = %event.guild_id,
            channel_id = %event.channel_id,
            message_id = %event.id
        );
        self.run(event).instrument(span).await
    }
}
