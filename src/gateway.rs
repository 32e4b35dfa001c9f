use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// A guild message as the turn pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub is_bot_author: bool,
    pub content: String,
    pub mentions_bot: bool,
    pub mentions_everyone_or_role: bool,
    pub mentions_other_users: bool,
    /// Unix seconds.
    pub created_timestamp: i64,
    /// Unix seconds the guild was created, when known.
    pub guild_created_at: Option<i64>,
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_typing(&self, channel_id: &str) -> anyhow::Result<()>;

    /// Sends `text` as a reply to `message_id`.
    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> anyhow::Result<()>;

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> anyhow::Result<()>;
}

pub struct SerenityGateway {
    http: Arc<serenity::Http>,
}

impl SerenityGateway {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Gateway for SerenityGateway {
    async fn send_typing(&self, channel_id: &str) -> anyhow::Result<()> {
        let channel = serenity::ChannelId::new(parse_id(channel_id)?);
        channel.broadcast_typing(&self.http).await?;
        Ok(())
    }

    async fn reply(&self, channel_id: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        let channel = serenity::ChannelId::new(parse_id(channel_id)?);
        let original = serenity::MessageId::new(parse_id(message_id)?);
        let message = serenity::CreateMessage::new()
            .content(text)
            .reference_message((channel, original));
        channel.send_message(&self.http, message).await?;
        Ok(())
    }

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> anyhow::Result<()> {
        let channel = serenity::ChannelId::new(parse_id(channel_id)?);
        channel
            .send_message(&self.http, serenity::CreateMessage::new().content(text))
            .await?;
        Ok(())
    }
}

/// Builds the pipeline's view of a platform message. Direct messages are dropped.
pub fn inbound_from_message(message: &serenity::Message, bot_id: serenity::UserId) -> Option<InboundMessage> {
    let guild_id = message.guild_id?;
    let mentions_bot = message.mentions.iter().any(|user| user.id == bot_id);

    Some(InboundMessage {
        id: message.id.to_string(),
        guild_id: guild_id.to_string(),
        channel_id: message.channel_id.to_string(),
        author_id: message.author.id.to_string(),
        is_bot_author: message.author.bot,
        content: message.content.clone(),
        mentions_bot,
        mentions_everyone_or_role: message.mention_everyone || !message.mention_roles.is_empty(),
        mentions_other_users: message.mentions.iter().any(|user| user.id != bot_id),
        created_timestamp: message.timestamp.unix_timestamp(),
        guild_created_at: Some(guild_id.created_at().unix_timestamp()),
    })
}

/// Discord snowflakes are non-zero; `ChannelId::new(0)` panics.
pub fn parse_id(raw: &str) -> anyhow::Result<u64> {
    match raw.parse::<u64>() {
        Ok(0) => anyhow::bail!("id must be non-zero"),
        Ok(id) => Ok(id),
        Err(e) => Err(anyhow::anyhow!("invalid id '{}': {}", raw, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("1234567890").unwrap(), 1_234_567_890);
        assert!(parse_id("0").is_err());
        assert!(parse_id("general").is_err());
        assert!(parse_id("").is_err());
    }
}
