pub mod admin;
pub mod channel;
pub mod help;
pub mod system;
pub mod tokens;

use crate::registry::SharedWindow;
use crate::{Context, Data, Error};

pub const NO_CHANNEL_CONFIG: &str = "This channel does not have any configuration. Run `/config`";

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        channel::config(),
        channel::who(),
        channel::reset(),
        system::system(),
        tokens::tokens(),
        admin::quota(),
        help::help(),
    ]
}

/// Guild and channel ids of the invoking context, as stored by the registry.
fn location(ctx: Context<'_>) -> Result<(String, String), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command can only be used in a server")?;
    Ok((guild_id.to_string(), ctx.channel_id().to_string()))
}

/// The current channel's window, or an ephemeral notice when it was never configured.
async fn configured_window(ctx: Context<'_>) -> Result<Option<SharedWindow>, Error> {
    let (guild_id, channel_id) = location(ctx)?;
    let window = ctx.data().registry.find_channel(&guild_id, &channel_id).await;
    if window.is_none() {
        ctx.send(
            poise::CreateReply::default()
                .content(NO_CHANNEL_CONFIG)
                .ephemeral(true),
        )
        .await?;
    }
    Ok(window)
}
