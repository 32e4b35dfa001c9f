use super::configured_window;
use crate::conversation::{MessageRecord, NewMessage, Role};
use crate::{Context, Error};
use chrono::Utc;
use tracing::info;

/// Manage system messages for this channel
#[poise::command(
    slash_command,
    subcommands("add", "list"),
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn system(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add a system message
#[poise::command(slash_command)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "The message to add"] message: String,
) -> Result<(), Error> {
    let Some(window) = configured_window(ctx).await? else {
        return Ok(());
    };

    let data = ctx.data();
    {
        let mut window = window.lock().await;
        let record = MessageRecord::new(
            NewMessage {
                id: None,
                guild_id: window.guild_id().to_string(),
                channel_id: window.id().to_string(),
                author_id: data.bot_id.to_string(),
                content: message.clone(),
                timestamp: Utc::now().timestamp(),
                role: Role::System,
            },
            data.counter.as_ref(),
        );
        window.add_message(record).await?;
    }

    info!("System message added by {}", ctx.author().name);
    ctx.say(format!(
        "System message added by <@{}>: \n{}",
        ctx.author().id,
        message
    ))
    .await?;
    Ok(())
}

/// List all system messages
#[poise::command(slash_command)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let Some(window) = configured_window(ctx).await? else {
        return Ok(());
    };

    let messages = {
        let window = window.lock().await;
        window
            .messages()
            .iter()
            .filter(|m| m.role() == Role::System)
            .map(|m| m.content().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    };

    ctx.say(format!("System messages: \n{}", messages)).await?;
    Ok(())
}
