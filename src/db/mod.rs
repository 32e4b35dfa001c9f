use crate::config::Config;
use anyhow::Context as _;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRow {
    pub id: String,
    /// JSON-encoded default channel configuration.
    pub default_config: String,
    pub small_tier_balance: i64,
    pub large_tier_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRow {
    pub id: String,
    pub guild_id: String,
    /// JSON-encoded channel configuration.
    pub config: String,
    pub disclaimer_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: i64,
    pub role: String,
    pub token_cost: i64,
}

impl Database {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        Self::open(&config.database_url)
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection mutex poisoned"))
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        self.conn()?.execute_batch(SCHEMA)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    /// Runs a synchronous database call on the blocking pool.
    pub async fn run_blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("Database task panicked")?
    }

    // --- Guilds ---

    pub fn upsert_guild(&self, guild: &GuildRow) -> anyhow::Result<()> {
        debug!("Database: Saving guild {}", guild.id);
        self.conn()?.execute(
            "INSERT INTO guilds (id, default_config, small_tier_balance, large_tier_balance)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                default_config = ?2,
                small_tier_balance = ?3,
                large_tier_balance = ?4",
            params![
                guild.id,
                guild.default_config,
                guild.small_tier_balance,
                guild.large_tier_balance
            ],
        )?;
        Ok(())
    }

    pub fn update_guild_balances(&self, guild_id: &str, small: i64, large: i64) -> anyhow::Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE guilds SET small_tier_balance = ?2, large_tier_balance = ?3 WHERE id = ?1",
            params![guild_id, small, large],
        )?;
        if updated == 0 {
            anyhow::bail!("Guild {} has no stored record", guild_id);
        }
        Ok(())
    }

    pub fn load_guilds(&self) -> anyhow::Result<Vec<GuildRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, default_config, small_tier_balance, large_tier_balance FROM guilds ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GuildRow {
                id: row.get(0)?,
                default_config: row.get(1)?,
                small_tier_balance: row.get(2)?,
                large_tier_balance: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Channels ---

    pub fn upsert_channel(&self, channel: &ChannelRow) -> anyhow::Result<()> {
        debug!("Database: Saving channel {} in guild {}", channel.id, channel.guild_id);
        self.conn()?.execute(
            "INSERT INTO channels (id, guild_id, config, disclaimer_sent)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                guild_id = ?2,
                config = ?3,
                disclaimer_sent = ?4",
            params![
                channel.id,
                channel.guild_id,
                channel.config,
                channel.disclaimer_sent
            ],
        )?;
        Ok(())
    }

    pub fn load_channels(&self, guild_id: &str) -> anyhow::Result<Vec<ChannelRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, config, disclaimer_sent FROM channels WHERE guild_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([guild_id], |row| {
            Ok(ChannelRow {
                id: row.get(0)?,
                guild_id: row.get(1)?,
                config: row.get(2)?,
                disclaimer_sent: row.get(3)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- Messages ---

    pub fn upsert_message(&self, message: &MessageRow) -> anyhow::Result<()> {
        debug!(
            "Database: Saving {} message {} from {} in channel {}",
            message.role, message.id, message.author_id, message.channel_id
        );
        self.conn()?.execute(
            "INSERT INTO messages (id, guild_id, channel_id, author_id, content, timestamp, role, token_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                content = ?5,
                timestamp = ?6,
                role = ?7,
                token_cost = ?8",
            params![
                message.id,
                message.guild_id,
                message.channel_id,
                message.author_id,
                message.content,
                message.timestamp,
                message.role,
                message.token_cost
            ],
        )?;
        Ok(())
    }

    pub fn delete_message(&self, id: &str) -> anyhow::Result<usize> {
        let count = self
            .conn()?
            .execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(count)
    }

    /// Messages of a channel in insertion order.
    pub fn load_messages(&self, channel_id: &str) -> anyhow::Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, guild_id, channel_id, author_id, content, timestamp, role, token_cost
             FROM messages WHERE channel_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([channel_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                guild_id: row.get(1)?,
                channel_id: row.get(2)?,
                author_id: row.get(3)?,
                content: row.get(4)?,
                timestamp: row.get(5)?,
                role: row.get(6)?,
                token_cost: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open(":memory:").unwrap();
        db.execute_init().unwrap();
        db
    }

    fn message(id: &str, channel_id: &str, content: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            guild_id: "g1".to_string(),
            channel_id: channel_id.to_string(),
            author_id: "u1".to_string(),
            content: content.to_string(),
            timestamp: 1_700_000_000,
            role: "user".to_string(),
            token_cost: 7,
        }
    }

    #[test]
    fn test_db_init_is_idempotent() {
        let db = test_db();
        db.execute_init().unwrap();
        assert!(db.load_guilds().unwrap().is_empty());
    }

    #[test]
    fn test_guild_upsert_and_balances() {
        let db = test_db();
        let mut guild = GuildRow {
            id: "g1".to_string(),
            default_config: "{}".to_string(),
            small_tier_balance: 10,
            large_tier_balance: 20,
        };
        db.upsert_guild(&guild).unwrap();

        guild.default_config = "{\"ignore_bots\":false}".to_string();
        db.upsert_guild(&guild).unwrap();
        db.update_guild_balances("g1", 5, 0).unwrap();

        let guilds = db.load_guilds().unwrap();
        assert_eq!(guilds.len(), 1);
        assert_eq!(guilds[0].default_config, "{\"ignore_bots\":false}");
        assert_eq!(guilds[0].small_tier_balance, 5);
        assert_eq!(guilds[0].large_tier_balance, 0);

        assert!(db.update_guild_balances("missing", 1, 1).is_err());
    }

    #[test]
    fn test_channels_by_guild() {
        let db = test_db();
        for (id, guild) in [("c1", "g1"), ("c2", "g2"), ("c3", "g1")] {
            db.upsert_channel(&ChannelRow {
                id: id.to_string(),
                guild_id: guild.to_string(),
                config: "{}".to_string(),
                disclaimer_sent: false,
            })
            .unwrap();
        }
        db.upsert_channel(&ChannelRow {
            id: "c1".to_string(),
            guild_id: "g1".to_string(),
            config: "{}".to_string(),
            disclaimer_sent: true,
        })
        .unwrap();

        let channels = db.load_channels("g1").unwrap();
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c3"]);
        assert!(channels[0].disclaimer_sent);
    }

    #[test]
    fn test_messages_keep_insertion_order() {
        let db = test_db();
        db.upsert_message(&message("m2", "c1", "first")).unwrap();
        db.upsert_message(&message("m1", "c1", "second")).unwrap();
        db.upsert_message(&message("m3", "c2", "elsewhere")).unwrap();
        // Re-saving must not move a message to the end.
        db.upsert_message(&message("m2", "c1", "first")).unwrap();

        let contents: Vec<_> = db
            .load_messages("c1")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);

        assert_eq!(db.delete_message("m2").unwrap(), 1);
        assert_eq!(db.delete_message("m2").unwrap(), 0);
        assert_eq!(db.load_messages("c1").unwrap().len(), 1);
    }

    #[test]
    fn test_special_chars_are_bound_not_interpolated() {
        let db = test_db();
        db.upsert_message(&message("'; DROP TABLE messages; --", "c1", "x'); --"))
            .unwrap();
        assert_eq!(db.load_messages("c1").unwrap()[0].content, "x'); --");
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = test_db();
        db.run_blocking(|db| db.upsert_message(&message("m1", "c1", "hi")))
            .await
            .unwrap();
        let count = db
            .run_blocking(|db| Ok(db.load_messages("c1")?.len()))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
