use crate::db::{Database, MessageRow};
use crate::tokens::{ChatTurn, TokenCounter};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Assistant, Role::System];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow::anyhow!("unknown message role '{}'", other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to build a [`MessageRecord`]; `id` defaults to a fresh UUID.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: i64,
    pub role: Role,
}

/// One entry of a channel's history. Content is fixed at construction, so the
/// token cost computed then stays valid for the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    id: String,
    guild_id: String,
    channel_id: String,
    author_id: String,
    content: String,
    timestamp: i64,
    role: Role,
    token_cost: usize,
}

impl MessageRecord {
    pub fn new(message: NewMessage, counter: &dyn TokenCounter) -> Self {
        let token_cost = counter.estimate(&[ChatTurn {
            role: message.role,
            content: message.content.clone(),
            name: message.author_id.clone(),
        }]);

        Self {
            id: message
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            author_id: message.author_id,
            content: message.content,
            timestamp: message.timestamp,
            role: message.role,
            token_cost,
        }
    }

    pub fn from_row(row: MessageRow) -> anyhow::Result<Self> {
        Ok(Self {
            role: row.role.parse()?,
            token_cost: usize::try_from(row.token_cost)?,
            id: row.id,
            guild_id: row.guild_id,
            channel_id: row.channel_id,
            author_id: row.author_id,
            content: row.content,
            timestamp: row.timestamp,
        })
    }

    pub fn to_row(&self) -> MessageRow {
        MessageRow {
            id: self.id.clone(),
            guild_id: self.guild_id.clone(),
            channel_id: self.channel_id.clone(),
            author_id: self.author_id.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            role: self.role.as_str().to_string(),
            token_cost: self.token_cost as i64,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token_cost(&self) -> usize {
        self.token_cost
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
            name: self.author_id.clone(),
        }
    }

    /// Upserts the record keyed by its id.
    pub async fn save(&self, db: &Database) -> anyhow::Result<()> {
        let row = self.to_row();
        db.run_blocking(move |db| db.upsert_message(&row)).await
    }

    pub async fn delete(&self, db: &Database) -> anyhow::Result<()> {
        let id = self.id.clone();
        db.run_blocking(move |db| db.delete_message(&id).map(|_| ()))
            .await
    }
}
