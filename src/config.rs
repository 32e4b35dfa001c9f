use crate::conversation::{ChannelConfig, LanguageModel};
use crate::quota::Balances;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub database_url: String,
    pub status_message: String,

    // Defaults inherited by every lazily created channel
    pub language_model: LanguageModel,
    pub error_response: String,
    pub moderation_violation: String,
    pub disclaimer: String,
    pub only_respond_to_mentions: bool,
    pub ignore_bots: bool,
    pub ignore_everyone_mentions: bool,
    pub max_tokens_per_message: Option<u32>,

    // Turn admission
    pub allowed_channels: Vec<String>,
    pub auto_configure_channels: bool,
    pub typing_interval_secs: u64,
    pub min_guild_age_days: u64,

    // Quota
    pub small_tier_starting_tokens: i64,
    pub large_tier_starting_tokens: i64,
    pub tokens_per_purchase_unit: i64,
}

pub const DEFAULT_ERROR_RESPONSE: &str = "Sorry, there was an error. Please try again later.";
pub const DEFAULT_MODERATION_VIOLATION: &str =
    "Some content was detected violating OpenAI's usage policies. \
The flagged messages have been removed from future responses.";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let language_model = match env::var("LANGUAGE_MODEL") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| anyhow::anyhow!("LANGUAGE_MODEL is invalid: {}", e))?,
            Err(_) => LanguageModel::default(),
        };

        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            owner_id: env::var("OWNER_ID").ok().and_then(|id| id.parse().ok()),
            openai_api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/chatrelay.db".to_string()),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Mention me to chat!".to_string()),
            language_model,
            error_response: env::var("ERROR_RESPONSE")
                .unwrap_or_else(|_| DEFAULT_ERROR_RESPONSE.to_string()),
            moderation_violation: env::var("MODERATION_VIOLATION_RESPONSE")
                .unwrap_or_else(|_| DEFAULT_MODERATION_VIOLATION.to_string()),
            disclaimer: env::var("DISCLAIMER").unwrap_or_default(),
            only_respond_to_mentions: env::var("ONLY_RESPOND_TO_MENTIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            ignore_bots: env::var("IGNORE_BOTS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            ignore_everyone_mentions: env::var("IGNORE_EVERYONE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            max_tokens_per_message: env::var("MAX_TOKENS_PER_MESSAGE")
                .ok()
                .and_then(|v| v.parse().ok()),
            allowed_channels: env::var("ONLY_RESPOND_IN_CHANNEL")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
            auto_configure_channels: env::var("AUTO_CONFIGURE_CHANNELS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            typing_interval_secs: env::var("TYPING_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            min_guild_age_days: env::var("MIN_GUILD_AGE_DAYS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            small_tier_starting_tokens: env::var("SMALL_TIER_STARTING_TOKENS")
                .unwrap_or_else(|_| "2000000".to_string())
                .parse()
                .unwrap_or(2_000_000),
            large_tier_starting_tokens: env::var("LARGE_TIER_STARTING_TOKENS")
                .unwrap_or_else(|_| "80000".to_string())
                .parse()
                .unwrap_or(80_000),
            tokens_per_purchase_unit: env::var("TOKENS_PER_PURCHASE_UNIT")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()
                .unwrap_or(1_000_000),
        })
    }

    /// Channel configuration handed to channels that were never configured explicitly.
    pub fn default_channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            error_response: self.error_response.clone(),
            moderation_violation: self.moderation_violation.clone(),
            only_respond_to_mentions: self.only_respond_to_mentions,
            ignore_bots: self.ignore_bots,
            ignore_everyone_mentions: self.ignore_everyone_mentions,
            disclaimer: self.disclaimer.clone(),
            language_model: self.language_model,
            max_tokens_per_message: self.max_tokens_per_message,
        }
    }

    pub fn starting_balances(&self) -> Balances {
        Balances {
            small: self.small_tier_starting_tokens,
            large: self.large_tier_starting_tokens,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("openai_api_key", &"[REDACTED]")
            .field("openai_base_url", &self.openai_base_url)
            .field("database_url", &self.database_url)
            .field("status_message", &self.status_message)
            .field("language_model", &self.language_model)
            .field("error_response", &self.error_response)
            .field("moderation_violation", &self.moderation_violation)
            .field("disclaimer", &self.disclaimer)
            .field("only_respond_to_mentions", &self.only_respond_to_mentions)
            .field("ignore_bots", &self.ignore_bots)
            .field("ignore_everyone_mentions", &self.ignore_everyone_mentions)
            .field("max_tokens_per_message", &self.max_tokens_per_message)
            .field("allowed_channels", &self.allowed_channels)
            .field("auto_configure_channels", &self.auto_configure_channels)
            .field("typing_interval_secs", &self.typing_interval_secs)
            .field("min_guild_age_days", &self.min_guild_age_days)
            .field(
                "small_tier_starting_tokens",
                &self.small_tier_starting_tokens,
            )
            .field(
                "large_tier_starting_tokens",
                &self.large_tier_starting_tokens,
            )
            .field("tokens_per_purchase_unit", &self.tokens_per_purchase_unit)
            .finish()
    }
}

/// Discord message limit is 2000 characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENAI_API_KEY");
        let result = Config::build();
        assert!(
            result.is_err(),
            "Should fail when required vars are missing"
        );

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        env::set_var("OPENAI_API_KEY", "secret_api_key");
        env::set_var("ONLY_RESPOND_IN_CHANNEL", "123, 456,,");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.language_model, LanguageModel::Gpt35Turbo);
        assert_eq!(config.typing_interval_secs, 5);
        assert_eq!(config.small_tier_starting_tokens, 2_000_000);
        assert_eq!(config.allowed_channels, vec!["123", "456"]);
        assert!(config.only_respond_to_mentions);

        // 3. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(!debug_output.contains("secret_api_key"));
        assert!(debug_output.contains("[REDACTED]"));

        // 4. Invalid model is rejected rather than silently defaulted
        env::set_var("LANGUAGE_MODEL", "gpt-2");
        assert!(Config::build().is_err());

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("ONLY_RESPOND_IN_CHANNEL");
        env::remove_var("LANGUAGE_MODEL");
    }

    #[test]
    fn test_parse_list() {
        assert!(parse_list("").is_empty());
        assert_eq!(parse_list(" a ,b"), vec!["a", "b"]);
    }
}
