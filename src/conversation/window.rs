//! Token-bounded conversation history for one channel.
//!
//! The window is the only writer of its history. Every append is followed by
//! eviction of the oldest non-system records until the whole history, plus
//! room for the model's reply, fits the model's context size. System records
//! are operator directives and only leave through explicit role removal.

use super::{ChannelConfig, MessageRecord, Role};
use crate::db::{ChannelRow, Database};
use crate::error::TurnError;
use crate::tokens::ChatTurn;
use std::collections::HashSet;
use tracing::{error, info, warn};

/// Tokens kept free for the model's reply.
pub const SAFETY_BUFFER: usize = 800;

pub struct ConversationWindow {
    id: String,
    guild_id: String,
    messages: Vec<MessageRecord>,
    config: ChannelConfig,
    disclaimer_sent: bool,
    db: Database,
}

impl ConversationWindow {
    pub fn new(
        id: impl Into<String>,
        guild_id: impl Into<String>,
        config: ChannelConfig,
        db: Database,
    ) -> Self {
        Self {
            id: id.into(),
            guild_id: guild_id.into(),
            messages: Vec::new(),
            config,
            disclaimer_sent: false,
            db,
        }
    }

    /// Rebuilds a window from stored state without touching the store.
    pub(crate) fn restore(
        row: ChannelRow,
        config: ChannelConfig,
        messages: Vec<MessageRecord>,
        db: Database,
    ) -> Self {
        Self {
            id: row.id,
            guild_id: row.guild_id,
            messages,
            config,
            disclaimer_sent: row.disclaimer_sent,
            db,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn disclaimer_sent(&self) -> bool {
        self.disclaimer_sent
    }

    /// Cost of everything that would be sent, system records included.
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(MessageRecord::token_cost).sum()
    }

    /// Largest history the current model accepts with room left for its reply.
    pub fn token_budget(&self) -> usize {
        self.config
            .language_model
            .token_limit()
            .saturating_sub(SAFETY_BUFFER)
    }

    /// History in the shape the completion API expects.
    pub fn history(&self) -> Vec<ChatTurn> {
        self.messages.iter().map(MessageRecord::to_turn).collect()
    }

    pub fn contents(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| m.content().to_string())
            .collect()
    }

    /// Appends a record, persists it, then evicts until the budget holds.
    ///
    /// Fails with `ContextOverflow` when only system records are left and they
    /// still exceed the budget.
    pub async fn add_message(&mut self, record: MessageRecord) -> Result<(), TurnError> {
        if let Err(e) = record.save(&self.db).await {
            error!(
                "Failed to persist message {} in channel {}: {}",
                record.id(),
                self.id,
                e
            );
        }
        self.messages.push(record);

        while self.total_tokens() > self.token_budget() {
            let Some(index) = self.messages.iter().position(|m| m.role() != Role::System) else {
                let used = self.total_tokens();
                let budget = self.token_budget();
                error!(
                    guild_id = %self.guild_id,
                    channel_id = %self.id,
                    "System messages alone use {} tokens, over the {} token budget",
                    used,
                    budget
                );
                return Err(TurnError::ContextOverflow { used, budget });
            };

            let evicted = self.messages.remove(index);
            info!(
                "Evicting message {} from channel {} to stay within the token budget (current: {})",
                evicted.id(),
                self.id,
                self.total_tokens()
            );
            self.forget(&evicted).await;
        }

        Ok(())
    }

    /// Removes every record with `role`, returning how many were removed.
    pub async fn remove_by_role(&mut self, role: Role) -> usize {
        info!("Clearing {} messages in channel {}", role, self.id);
        self.remove_where(|m| m.role() == role).await
    }

    pub async fn clear_all(&mut self) {
        info!("Clearing ALL messages in channel {}", self.id);
        for role in Role::ALL {
            self.remove_by_role(role).await;
        }
    }

    /// Removes records whose content was flagged by moderation.
    pub async fn remove_flagged(&mut self, flagged: &HashSet<String>) -> usize {
        self.remove_where(|m| flagged.contains(m.content())).await
    }

    /// Installs a new configuration. Accumulated history is dropped with it.
    pub async fn set_config(&mut self, config: ChannelConfig) {
        self.config = config;
        self.clear_all().await;
        if let Err(e) = self.save().await {
            error!("Failed to persist config for channel {}: {}", self.id, e);
        }
    }

    pub async fn mark_disclaimer_sent(&mut self) {
        if self.disclaimer_sent {
            return;
        }
        self.disclaimer_sent = true;
        if let Err(e) = self.save().await {
            error!("Failed to persist disclaimer flag for channel {}: {}", self.id, e);
        }
    }

    pub fn to_row(&self) -> anyhow::Result<ChannelRow> {
        Ok(ChannelRow {
            id: self.id.clone(),
            guild_id: self.guild_id.clone(),
            config: serde_json::to_string(&self.config)?,
            disclaimer_sent: self.disclaimer_sent,
        })
    }

    /// Upserts the channel record (config and disclaimer flag).
    pub async fn save(&self) -> anyhow::Result<()> {
        let row = self.to_row()?;
        self.db.run_blocking(move |db| db.upsert_channel(&row)).await
    }

    async fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&MessageRecord) -> bool,
    {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.messages).into_iter().partition(|m| predicate(m));
        self.messages = kept;

        for record in &removed {
            self.forget(record).await;
        }
        removed.len()
    }

    async fn forget(&self, record: &MessageRecord) {
        if let Err(e) = record.delete(&self.db).await {
            warn!(
                "Failed to delete message {} from channel {}: {}",
                record.id(),
                self.id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{LanguageModel, NewMessage};
    use crate::tokens::testing::FixedCounter;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn window(db: &Database) -> ConversationWindow {
        ConversationWindow::new("c1", "g1", ChannelConfig::default(), db.clone())
    }

    fn record(role: Role, content: String) -> MessageRecord {
        MessageRecord::new(
            NewMessage {
                id: None,
                guild_id: "g1".to_string(),
                channel_id: "c1".to_string(),
                author_id: "u1".to_string(),
                content,
                timestamp: 0,
                role,
            },
            &FixedCounter,
        )
    }

    fn sized(role: Role, tag: usize, tokens: usize) -> MessageRecord {
        let prefix = format!("{}:", tag);
        let padding = "x".repeat(tokens - prefix.len());
        record(role, format!("{}{}", prefix, padding))
    }

    #[tokio::test]
    async fn test_eviction_keeps_system_and_drops_oldest_user() {
        let db = test_db();
        let mut window = window(&db);
        window.add_message(sized(Role::System, 0, 50)).await.unwrap();

        for i in 1..=8 {
            window.add_message(sized(Role::User, i, 400)).await.unwrap();
        }
        assert_eq!(window.messages().len(), 9);
        assert_eq!(window.total_tokens(), 3250);

        window.add_message(sized(Role::User, 9, 400)).await.unwrap();

        assert_eq!(window.messages().len(), 9);
        assert_eq!(window.messages()[0].role(), Role::System);
        assert!(window.messages()[1].content().starts_with("2:"));
        assert!(window.total_tokens() <= window.token_budget());
        assert_eq!(db.load_messages("c1").unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_budget_holds_after_every_add() {
        let db = test_db();
        let mut window = window(&db);
        window.add_message(sized(Role::System, 0, 120)).await.unwrap();

        for i in 1..=40 {
            let role = if i % 3 == 0 { Role::Assistant } else { Role::User };
            window
                .add_message(sized(role, i, 50 + (i * 37) % 900))
                .await
                .unwrap();
            assert!(window.total_tokens() + SAFETY_BUFFER <= LanguageModel::Gpt35Turbo.token_limit());
            assert_eq!(window.messages()[0].role(), Role::System);
        }
    }

    #[tokio::test]
    async fn test_oversized_system_messages_overflow() {
        let db = test_db();
        let mut window = window(&db);
        window.add_message(sized(Role::User, 1, 100)).await.unwrap();

        let err = window
            .add_message(sized(Role::System, 2, 4000))
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::ContextOverflow { used: 4000, .. }));
        assert!(window.messages().iter().all(|m| m.role() == Role::System));
    }

    #[tokio::test]
    async fn test_remove_by_role_preserves_order() {
        let db = test_db();
        let mut window = window(&db);
        let roles = [Role::System, Role::User, Role::Assistant, Role::User, Role::System, Role::Assistant];
        for (i, role) in roles.into_iter().enumerate() {
            window.add_message(sized(role, i, 10)).await.unwrap();
        }

        assert_eq!(window.remove_by_role(Role::User).await, 2);
        let remaining: Vec<_> = window
            .messages()
            .iter()
            .map(|m| m.content().split(':').next().unwrap().to_string())
            .collect();
        assert_eq!(remaining, vec!["0", "2", "4", "5"]);
        assert!(window.messages().iter().all(|m| m.role() != Role::User));
        assert_eq!(db.load_messages("c1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_set_config_clears_history() {
        let db = test_db();
        let mut window = window(&db);
        window.add_message(sized(Role::System, 0, 10)).await.unwrap();
        window.add_message(sized(Role::User, 1, 10)).await.unwrap();

        let config = ChannelConfig {
            language_model: LanguageModel::Gpt4,
            ..ChannelConfig::default()
        };
        window.set_config(config.clone()).await;

        assert!(window.messages().is_empty());
        assert_eq!(window.config(), &config);
        assert_eq!(window.token_budget(), 8192 - SAFETY_BUFFER);
        assert!(db.load_messages("c1").unwrap().is_empty());
        assert_eq!(db.load_channels("g1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_flagged_only_touches_flagged() {
        let db = test_db();
        let mut window = window(&db);
        for content in ["a", "b", "c"] {
            window.add_message(record(Role::User, content.to_string())).await.unwrap();
        }

        let flagged: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert_eq!(window.remove_flagged(&flagged).await, 1);
        assert_eq!(window.contents(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_disclaimer_flag_is_one_way() {
        let db = test_db();
        let mut window = window(&db);
        assert!(!window.disclaimer_sent());
        window.mark_disclaimer_sent().await;
        window.mark_disclaimer_sent().await;
        assert!(window.disclaimer_sent());
        assert!(db.load_channels("g1").unwrap()[0].disclaimer_sent);
    }
}
