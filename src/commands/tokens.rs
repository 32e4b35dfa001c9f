use super::location;
use crate::quota::Tier;
use crate::{Context, Error};

/// Groups digits in threes: `2000000` becomes `2,000,000`.
pub fn format_tokens(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if amount < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// Check how many tokens this server has left
#[poise::command(slash_command, guild_only)]
pub async fn tokens(ctx: Context<'_>) -> Result<(), Error> {
    let (guild_id, _) = location(ctx)?;
    let registry = &ctx.data().registry;

    let content = if registry.has_guild(&guild_id).await {
        let ledger = registry.ledger(&guild_id).await;
        let balances = ledger.lock().await.balances();
        format!(
            "Tokens Remaining: \n{}: {}\n{}: {}",
            Tier::Small,
            format_tokens(balances.small),
            Tier::Large,
            format_tokens(balances.large)
        )
    } else {
        "This server does not have any configuration".to_string()
    };

    ctx.send(poise::CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(1_000), "1,000");
        assert_eq!(format_tokens(80_000), "80,000");
        assert_eq!(format_tokens(2_000_000), "2,000,000");
        assert_eq!(format_tokens(-12_345), "-12,345");
    }
}
