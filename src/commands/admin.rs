use super::tokens::format_tokens;
use crate::quota::Tier;
use crate::{Context, Error};
use tracing::info;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TierChoice {
    #[name = "GPT-3.5"]
    Small,
    #[name = "GPT-4"]
    Large,
}

impl From<TierChoice> for Tier {
    fn from(choice: TierChoice) -> Self {
        match choice {
            TierChoice::Small => Tier::Small,
            TierChoice::Large => Tier::Large,
        }
    }
}

/// Manage token quotas (Owner only)
#[poise::command(slash_command, subcommands("add"), owners_only, hide_in_help, guild_only)]
pub async fn quota(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add (or with a negative amount, remove) tokens for this server
#[poise::command(slash_command, owners_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Which token pool to change"] tier: TierChoice,
    #[description = "Tokens to add; negative removes"] amount: i64,
) -> Result<(), Error> {
    let (guild_id, _) = super::location(ctx)?;
    let tier = Tier::from(tier);

    info!(
        "Quota command received from owner {}: {} {} tokens for guild {}",
        ctx.author().name,
        amount,
        tier,
        guild_id
    );
    let balance = ctx
        .data()
        .registry
        .adjust_quota(&guild_id, tier, amount)
        .await?;

    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "✅ {} balance is now {}",
                tier,
                format_tokens(balance)
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}
