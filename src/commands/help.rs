use crate::{Context, Error};

const HELP_TEXT: &str = "\
**Getting started**
Run `/config` in a channel to enable chatting there, then mention me to talk.

**Commands**
`/config` - choose the language model and when I should respond
`/system add` - add a standing instruction for this channel
`/system list` - show the standing instructions
`/reset` - forget all, user, bot or system messages in this channel
`/who` - show this channel's settings
`/tokens` - show how many tokens this server has left

Older messages are forgotten automatically once the conversation no longer \
fits the model's context.";

/// Get help with this bot
#[poise::command(slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    ctx.send(poise::CreateReply::default().content(HELP_TEXT).ephemeral(true))
        .await?;
    Ok(())
}
