//! Per-guild token balances.
//!
//! All channels of a guild draw from one ledger. Balances only go up through
//! explicit top-ups and never persist below zero.

use crate::db::Database;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Model class that owns its own quota pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Small,
    Large,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Small => "GPT-3.5",
            Tier::Large => "GPT-4",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balances {
    pub small: i64,
    pub large: i64,
}

impl Balances {
    pub fn get(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Small => self.small,
            Tier::Large => self.large,
        }
    }

    fn get_mut(&mut self, tier: Tier) -> &mut i64 {
        match tier {
            Tier::Small => &mut self.small,
            Tier::Large => &mut self.large,
        }
    }
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("ran out of {0} tokens")]
    Exhausted(Tier),

    #[error("failed to persist quota balance: {0}")]
    Store(String),
}

pub struct QuotaLedger {
    guild_id: String,
    balances: Balances,
    db: Database,
}

impl QuotaLedger {
    pub fn new(guild_id: impl Into<String>, balances: Balances, db: Database) -> Self {
        Self {
            guild_id: guild_id.into(),
            balances,
            db,
        }
    }

    pub fn balance(&self, tier: Tier) -> i64 {
        self.balances.get(tier)
    }

    pub fn balances(&self) -> Balances {
        self.balances
    }

    /// Fails when the tier is already spent, clamping the stored balance to zero.
    pub async fn ensure_available(&mut self, tier: Tier) -> Result<(), QuotaError> {
        if self.balance(tier) > 0 {
            return Ok(());
        }
        self.exhaust(tier).await;
        Err(QuotaError::Exhausted(tier))
    }

    /// Subtracts `amount` from the tier's balance.
    ///
    /// Returns `Exhausted` when the balance was already spent or when this
    /// debit would take it below zero; the stored balance is zero in both cases.
    pub async fn debit(&mut self, tier: Tier, amount: i64) -> Result<i64, QuotaError> {
        let current = self.balance(tier);
        if current <= 0 {
            self.exhaust(tier).await;
            return Err(QuotaError::Exhausted(tier));
        }

        let remaining = current - amount.max(0);
        if remaining < 0 {
            self.exhaust(tier).await;
            return Err(QuotaError::Exhausted(tier));
        }

        *self.balances.get_mut(tier) = remaining;
        debug!(
            "Quota: guild {} has {} {} tokens remaining",
            self.guild_id, remaining, tier
        );
        self.persist().await?;
        Ok(remaining)
    }

    /// Top-up from a purchase or an administrator.
    pub async fn credit(&mut self, tier: Tier, amount: i64) -> Result<i64, QuotaError> {
        let balance = self.balances.get_mut(tier);
        *balance = balance.saturating_add(amount.max(0));
        let updated = *balance;
        info!(
            "Quota: credited {} {} tokens to guild {} (now {})",
            amount, tier, self.guild_id, updated
        );
        self.persist().await?;
        Ok(updated)
    }

    /// Signed administrative adjustment; the result is clamped at zero.
    pub async fn adjust(&mut self, tier: Tier, delta: i64) -> Result<i64, QuotaError> {
        if delta >= 0 {
            return self.credit(tier, delta).await;
        }
        let balance = self.balances.get_mut(tier);
        *balance = balance.saturating_add(delta).max(0);
        let updated = *balance;
        info!(
            "Quota: removed {} {} tokens from guild {} (now {})",
            -delta, tier, self.guild_id, updated
        );
        self.persist().await?;
        Ok(updated)
    }

    async fn exhaust(&mut self, tier: Tier) {
        *self.balances.get_mut(tier) = 0;
        warn!("Quota: guild {} ran out of {} tokens", self.guild_id, tier);
        if let Err(e) = self.persist().await {
            error!("{}", e);
        }
    }

    async fn persist(&self) -> Result<(), QuotaError> {
        let guild_id = self.guild_id.clone();
        let Balances { small, large } = self.balances;
        self.db
            .run_blocking(move |db| db.update_guild_balances(&guild_id, small, large))
            .await
            .map_err(|e| QuotaError::Store(e.to_string()))
    }
}
