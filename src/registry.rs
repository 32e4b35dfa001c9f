//! In-memory view of every guild, its channels and its quota ledger.
//!
//! Constructed empty or rehydrated from the database at startup, then passed
//! by reference to the turn pipeline and the commands.

use crate::config::Config;
use crate::conversation::{ChannelConfig, ConfigUpdate, ConversationWindow, MessageRecord};
use crate::db::{Database, GuildRow};
use crate::quota::{Balances, QuotaError, QuotaLedger, Tier};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub type SharedWindow = Arc<Mutex<ConversationWindow>>;
pub type SharedLedger = Arc<Mutex<QuotaLedger>>;

/// Values a guild starts with the first time it is seen.
#[derive(Debug, Clone, Default)]
pub struct GuildDefaults {
    pub channel_config: ChannelConfig,
    pub starting_balances: Balances,
}

impl GuildDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_config: config.default_channel_config(),
            starting_balances: config.starting_balances(),
        }
    }
}

struct Guild {
    default_config: ChannelConfig,
    channels: HashMap<String, SharedWindow>,
    ledger: SharedLedger,
}

impl Guild {
    fn new(defaults: &GuildDefaults, guild_id: &str, db: Database) -> Self {
        Self {
            default_config: defaults.channel_config.clone(),
            channels: HashMap::new(),
            ledger: Arc::new(Mutex::new(QuotaLedger::new(
                guild_id,
                defaults.starting_balances,
                db,
            ))),
        }
    }
}

fn guild_row(id: &str, default_config: &ChannelConfig, balances: Balances) -> anyhow::Result<GuildRow> {
    Ok(GuildRow {
        id: id.to_string(),
        default_config: serde_json::to_string(default_config)?,
        small_tier_balance: balances.small,
        large_tier_balance: balances.large,
    })
}

/// Entries created while the guild map was locked. They are written to the
/// database only after the lock is released.
#[derive(Default)]
struct Created {
    guild: Option<(String, SharedLedger)>,
    channel: Option<SharedWindow>,
}

pub struct ConversationRegistry {
    db: Database,
    defaults: GuildDefaults,
    guilds: Mutex<HashMap<String, Guild>>,
}

impl ConversationRegistry {
    pub fn new(db: Database, defaults: GuildDefaults) -> Self {
        Self {
            db,
            defaults,
            guilds: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every guild, then its channels, then each channel's messages.
    ///
    /// Rows that fail to decode are skipped with a warning; a stored config
    /// that no longer parses falls back to the defaults.
    pub async fn rehydrate(db: Database, defaults: GuildDefaults) -> anyhow::Result<Self> {
        let loaded = db
            .run_blocking(|db| {
                let mut loaded = Vec::new();
                for guild in db.load_guilds()? {
                    let mut channels = Vec::new();
                    for channel in db.load_channels(&guild.id)? {
                        let messages = db.load_messages(&channel.id)?;
                        channels.push((channel, messages));
                    }
                    loaded.push((guild, channels));
                }
                Ok(loaded)
            })
            .await?;

        let mut guilds = HashMap::new();
        let mut channel_count = 0;
        let mut message_count = 0;
        for (row, channel_rows) in loaded {
            let default_config = decode_config(&row.default_config, &defaults.channel_config, &row.id);
            let ledger = QuotaLedger::new(
                row.id.clone(),
                Balances {
                    small: row.small_tier_balance,
                    large: row.large_tier_balance,
                },
                db.clone(),
            );

            let mut channels = HashMap::new();
            for (channel_row, message_rows) in channel_rows {
                let config = decode_config(&channel_row.config, &default_config, &channel_row.id);
                let messages: Vec<MessageRecord> = message_rows
                    .into_iter()
                    .filter_map(|m| {
                        let id = m.id.clone();
                        MessageRecord::from_row(m)
                            .map_err(|e| warn!("Skipping stored message {}: {}", id, e))
                            .ok()
                    })
                    .collect();
                message_count += messages.len();
                channel_count += 1;

                let channel_id = channel_row.id.clone();
                let window = ConversationWindow::restore(channel_row, config, messages, db.clone());
                channels.insert(channel_id, Arc::new(Mutex::new(window)));
            }

            guilds.insert(
                row.id,
                Guild {
                    default_config,
                    channels,
                    ledger: Arc::new(Mutex::new(ledger)),
                },
            );
        }

        info!(
            "Registry: loaded {} guilds, {} channels, {} messages",
            guilds.len(),
            channel_count,
            message_count
        );

        Ok(Self {
            db,
            defaults,
            guilds: Mutex::new(guilds),
        })
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub async fn has_guild(&self, guild_id: &str) -> bool {
        self.guilds.lock().await.contains_key(guild_id)
    }

    /// Returns the channel's window, creating the guild and channel entries
    /// with inherited defaults when they do not exist yet.
    pub async fn get_or_create_channel(&self, guild_id: &str, channel_id: &str) -> SharedWindow {
        let mut created = Created::default();
        let window = {
            let mut guilds = self.guilds.lock().await;
            let guild = self.guild_entry(&mut guilds, guild_id, &mut created);

            match guild.channels.entry(channel_id.to_string()) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    info!("Registry: created channel {} in guild {}", channel_id, guild_id);
                    let window = Arc::new(Mutex::new(ConversationWindow::new(
                        channel_id,
                        guild_id,
                        guild.default_config.clone(),
                        self.db.clone(),
                    )));
                    created.channel = Some(window.clone());
                    entry.insert(window).clone()
                }
            }
        };

        self.persist(created).await;
        window
    }

    /// Looks up an existing channel without creating anything.
    pub async fn find_channel(&self, guild_id: &str, channel_id: &str) -> Option<SharedWindow> {
        self.guilds
            .lock()
            .await
            .get(guild_id)
            .and_then(|guild| guild.channels.get(channel_id).cloned())
    }

    /// Applies `update` on top of the channel's current config (or the guild
    /// default for a new channel). Existing history is cleared.
    pub async fn configure_channel(
        &self,
        guild_id: &str,
        channel_id: &str,
        update: ConfigUpdate,
    ) -> ChannelConfig {
        let window = self.get_or_create_channel(guild_id, channel_id).await;
        let mut window = window.lock().await;
        let config = window.config().with_update(update);
        window.set_config(config.clone()).await;
        info!(
            "Registry: channel {} in guild {} now uses {}",
            channel_id, guild_id, config.language_model
        );
        config
    }

    /// The guild's ledger, creating the guild if needed.
    pub async fn ledger(&self, guild_id: &str) -> SharedLedger {
        let mut created = Created::default();
        let ledger = {
            let mut guilds = self.guilds.lock().await;
            self.guild_entry(&mut guilds, guild_id, &mut created)
                .ledger
                .clone()
        };
        self.persist(created).await;
        ledger
    }

    /// Administrative top-up (or removal when `delta` is negative).
    pub async fn adjust_quota(&self, guild_id: &str, tier: Tier, delta: i64) -> Result<i64, QuotaError> {
        let ledger = self.ledger(guild_id).await;
        let mut ledger = ledger.lock().await;
        ledger.adjust(tier, delta).await
    }

    fn guild_entry<'a>(
        &self,
        guilds: &'a mut HashMap<String, Guild>,
        guild_id: &str,
        created: &mut Created,
    ) -> &'a mut Guild {
        match guilds.entry(guild_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!("Registry: guild {} not found, creating new one", guild_id);
                let guild = Guild::new(&self.defaults, guild_id, self.db.clone());
                created.guild = Some((guild_id.to_string(), guild.ledger.clone()));
                entry.insert(guild)
            }
        }
    }

    /// Writes new rows while holding the entry's own lock, so a concurrent
    /// debit or reconfigure is never overwritten by a stale row.
    async fn persist(&self, created: Created) {
        if let Some((guild_id, ledger)) = created.guild {
            let ledger = ledger.lock().await;
            match guild_row(&guild_id, &self.defaults.channel_config, ledger.balances()) {
                Ok(row) => {
                    if let Err(e) = self.db.run_blocking(move |db| db.upsert_guild(&row)).await {
                        error!("Failed to persist new guild {}: {}", guild_id, e);
                    }
                }
                Err(e) => error!("Failed to encode guild {}: {}", guild_id, e),
            }
        }

        if let Some(window) = created.channel {
            let window = window.lock().await;
            if let Err(e) = window.save().await {
                error!("Failed to persist new channel {}: {}", window.id(), e);
            }
        }
    }
}

fn decode_config(raw: &str, fallback: &ChannelConfig, owner: &str) -> ChannelConfig {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!("Stored config for {} is unreadable, using defaults: {}", owner, e);
        fallback.clone()
    })
}
