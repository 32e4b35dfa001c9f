//! Applies completed purchases to guild ledgers.
//!
//! The payment provider's webhook listener and signature check live outside
//! this crate; they hand over an already verified [`CheckoutCompleted`].

use crate::quota::{QuotaError, Tier};
use crate::registry::ConversationRegistry;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutCompleted {
    pub guild_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub purchaser_id: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    pub quantity: i64,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("guild {0} not found")]
    UnknownGuild(String),

    #[error("channel {0} not found")]
    UnknownChannel(String),

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error(transparent)]
    Quota(#[from] QuotaError),
}

/// Credits `quantity * unit_scale` tokens to the purchasing guild and returns
/// the new balance of the purchased tier.
pub async fn apply_checkout(
    registry: &ConversationRegistry,
    checkout: &CheckoutCompleted,
    unit_scale: i64,
) -> Result<i64, CheckoutError> {
    if checkout.quantity <= 0 {
        return Err(CheckoutError::InvalidQuantity(checkout.quantity));
    }
    if !registry.has_guild(&checkout.guild_id).await {
        return Err(CheckoutError::UnknownGuild(checkout.guild_id.clone()));
    }
    if registry
        .find_channel(&checkout.guild_id, &checkout.channel_id)
        .await
        .is_none()
    {
        return Err(CheckoutError::UnknownChannel(checkout.channel_id.clone()));
    }

    let amount = checkout.quantity.saturating_mul(unit_scale);
    let balance = registry
        .adjust_quota(&checkout.guild_id, checkout.tier, amount)
        .await?;
    info!(
        "Checkout: guild {} bought {} {} tokens (purchaser: {})",
        checkout.guild_id,
        amount,
        checkout.tier,
        checkout.purchaser_id.as_deref().unwrap_or("anonymous")
    );
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::quota::Balances;
    use crate::registry::GuildDefaults;

    async fn registry() -> ConversationRegistry {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        let registry = ConversationRegistry::new(
            db,
            GuildDefaults {
                starting_balances: Balances { small: 10, large: 0 },
                ..GuildDefaults::default()
            },
        );
        registry.get_or_create_channel("g1", "c1").await;
        registry
    }

    fn checkout(json: &str) -> CheckoutCompleted {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_checkout_credits_scaled_quantity() {
        let registry = registry().await;
        let event = checkout(r#"{"guild_id":"g1","channel_id":"c1","quantity":2}"#);
        assert_eq!(event.tier, Tier::Small);

        let balance = apply_checkout(&registry, &event, 1_000_000).await.unwrap();
        assert_eq!(balance, 2_000_010);

        let stored = registry.db().load_guilds().unwrap();
        assert_eq!(stored[0].small_tier_balance, 2_000_010);
    }

    #[tokio::test]
    async fn test_checkout_for_large_tier() {
        let registry = registry().await;
        let event = checkout(r#"{"guild_id":"g1","channel_id":"c1","tier":"large","quantity":1,"purchaser_id":"42"}"#);
        assert_eq!(apply_checkout(&registry, &event, 1_000).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_checkout_rejects_unknown_targets() {
        let registry = registry().await;

        let err = apply_checkout(
            &registry,
            &checkout(r#"{"guild_id":"g2","channel_id":"c1","quantity":1}"#),
            1_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownGuild(_)));

        let err = apply_checkout(
            &registry,
            &checkout(r#"{"guild_id":"g1","channel_id":"c9","quantity":1}"#),
            1_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownChannel(_)));

        let err = apply_checkout(
            &registry,
            &checkout(r#"{"guild_id":"g1","channel_id":"c1","quantity":0}"#),
            1_000,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidQuantity(0)));
        assert!(!registry.has_guild("g2").await);
    }
}
