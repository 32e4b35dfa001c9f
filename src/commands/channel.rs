use super::{configured_window, location};
use crate::conversation::{ChannelConfig, ConfigUpdate, LanguageModel, Role};
use crate::{Context, Error};
use tracing::info;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ModelChoice {
    #[name = "GPT-3.5 Turbo"]
    Gpt35Turbo,
    #[name = "GPT-4"]
    Gpt4,
    #[name = "GPT-4 32k"]
    Gpt4_32k,
}

impl From<ModelChoice> for LanguageModel {
    fn from(choice: ModelChoice) -> Self {
        match choice {
            ModelChoice::Gpt35Turbo => LanguageModel::Gpt35Turbo,
            ModelChoice::Gpt4 => LanguageModel::Gpt4,
            ModelChoice::Gpt4_32k => LanguageModel::Gpt4_32k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ResetKind {
    #[name = "All - Clear ALL messages (User, System, and Bot)"]
    All,
    #[name = "User - Clear only User messages"]
    User,
    #[name = "Bot - Clear only Bot messages"]
    Bot,
    #[name = "System - Clear only System messages"]
    System,
}

impl ResetKind {
    /// Role cleared by a partial reset; `None` clears everything.
    pub fn role(&self) -> Option<Role> {
        match self {
            ResetKind::All => None,
            ResetKind::User => Some(Role::User),
            ResetKind::Bot => Some(Role::Assistant),
            ResetKind::System => Some(Role::System),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ResetKind::All => "ALL",
            ResetKind::User => "USER",
            ResetKind::Bot => "BOT",
            ResetKind::System => "SYSTEM",
        }
    }
}

pub fn describe_config(config: &ChannelConfig) -> String {
    let disclaimer = if config.disclaimer.is_empty() {
        "_none_"
    } else {
        config.disclaimer.as_str()
    };
    format!(
        "`ONLY_RESPOND_TO_MENTIONS`: {}\n\
         `IGNORE_BOTS`: {}\n\
         `IGNORE_EVERYONE_MENTIONS`: {}\n\
         `LANGUAGE_MODEL`: {}\n\
         `DISCLAIMER`: {}",
        config.only_respond_to_mentions,
        config.ignore_bots,
        config.ignore_everyone_mentions,
        config.language_model,
        disclaimer
    )
}

/// Configure the settings for this channel
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn config(
    ctx: Context<'_>,
    #[description = "Only respond to mentions (default: true)"] only_mentions: bool,
    #[description = "Which language model to use (GPT-4 is more expensive)"]
    language_model: ModelChoice,
    #[description = "Ignore messages from bots (default: true)"] ignore_bots: Option<bool>,
    #[description = "Ignore @everyone and role mentions (default: true)"]
    ignore_everyone: Option<bool>,
    #[description = "Text sent once before the first reply in this channel"]
    disclaimer: Option<String>,
) -> Result<(), Error> {
    let (guild_id, channel_id) = location(ctx)?;
    info!(
        "Config command received from {} for channel {}",
        ctx.author().name,
        channel_id
    );

    let update = ConfigUpdate {
        only_respond_to_mentions: Some(only_mentions),
        ignore_bots,
        ignore_everyone_mentions: ignore_everyone,
        language_model: Some(language_model.into()),
        disclaimer,
        max_tokens_per_message: None,
    };
    let config = ctx
        .data()
        .registry
        .configure_channel(&guild_id, &channel_id, update)
        .await;

    ctx.say(format!(
        "Channel configured with the following settings: \n{}",
        describe_config(&config)
    ))
    .await?;
    Ok(())
}

/// Show how this bot is configured here, including current system messages
#[poise::command(slash_command, guild_only)]
pub async fn who(ctx: Context<'_>) -> Result<(), Error> {
    let Some(window) = configured_window(ctx).await? else {
        return Ok(());
    };

    let response = {
        let window = window.lock().await;
        let system: Vec<&str> = window
            .messages()
            .iter()
            .filter(|m| m.role() == Role::System)
            .map(|m| m.content())
            .collect();
        let system = if system.is_empty() {
            "_No system messages._".to_string()
        } else {
            system.join("\n")
        };
        format!(
            "## Channel settings\n{}\n\n## System messages\n{}\n\n\
             History: {} messages, {} / {} tokens",
            describe_config(window.config()),
            system,
            window.messages().len(),
            window.total_tokens(),
            window.token_budget()
        )
    };

    ctx.say(response).await?;
    Ok(())
}

/// Reset the chat for this channel
#[poise::command(slash_command, guild_only)]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "What to reset"] reset_type: ResetKind,
) -> Result<(), Error> {
    let Some(window) = configured_window(ctx).await? else {
        return Ok(());
    };

    {
        let mut window = window.lock().await;
        match reset_type.role() {
            Some(role) => {
                window.remove_by_role(role).await;
            }
            None => window.clear_all().await,
        }
    }

    info!("{} reset {} messages", ctx.author().name, reset_type.label());
    ctx.say(format!(
        "{} messages have been cleared by <@{}>",
        reset_type.label(),
        ctx.author().id
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_roles() {
        assert_eq!(ResetKind::All.role(), None);
        assert_eq!(ResetKind::Bot.role(), Some(Role::Assistant));
        assert_eq!(ResetKind::System.role(), Some(Role::System));
    }

    #[test]
    fn test_describe_config() {
        let text = describe_config(&ChannelConfig {
            language_model: LanguageModel::from(ModelChoice::Gpt4),
            disclaimer: "Be kind".to_string(),
            ..ChannelConfig::default()
        });
        assert!(text.contains("`LANGUAGE_MODEL`: gpt-4"));
        assert!(text.contains("`DISCLAIMER`: Be kind"));
        assert!(text.contains("`IGNORE_BOTS`: true"));
    }
}
