use crate::config::{DEFAULT_ERROR_RESPONSE, DEFAULT_MODERATION_VIOLATION};
use crate::quota::Tier;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LanguageModel {
    #[default]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4")]
    Gpt4,
    #[serde(rename = "gpt-4-32k")]
    Gpt4_32k,
}

#[derive(Debug, Error)]
#[error("unknown language model '{0}'")]
pub struct UnknownModel(pub String);

impl LanguageModel {
    pub const ALL: [LanguageModel; 3] = [
        LanguageModel::Gpt35Turbo,
        LanguageModel::Gpt4,
        LanguageModel::Gpt4_32k,
    ];

    /// Model id as the completion API expects it.
    pub fn id(&self) -> &'static str {
        match self {
            LanguageModel::Gpt35Turbo => "gpt-3.5-turbo",
            LanguageModel::Gpt4 => "gpt-4",
            LanguageModel::Gpt4_32k => "gpt-4-32k",
        }
    }

    /// Context size of the model, prompt and reply combined.
    pub fn token_limit(&self) -> usize {
        match self {
            LanguageModel::Gpt35Turbo => 4096,
            LanguageModel::Gpt4 => 8192,
            LanguageModel::Gpt4_32k => 32768,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            LanguageModel::Gpt35Turbo => Tier::Small,
            LanguageModel::Gpt4 | LanguageModel::Gpt4_32k => Tier::Large,
        }
    }
}

impl FromStr for LanguageModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        LanguageModel::ALL
            .into_iter()
            .find(|model| model.id() == wanted)
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

impl std::fmt::Display for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Behaviour of one channel. Treated as an immutable value: updates build a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub error_response: String,
    pub moderation_violation: String,
    pub only_respond_to_mentions: bool,
    pub ignore_bots: bool,
    pub ignore_everyone_mentions: bool,
    pub disclaimer: String,
    pub language_model: LanguageModel,
    pub max_tokens_per_message: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            error_response: DEFAULT_ERROR_RESPONSE.to_string(),
            moderation_violation: DEFAULT_MODERATION_VIOLATION.to_string(),
            only_respond_to_mentions: true,
            ignore_bots: true,
            ignore_everyone_mentions: true,
            disclaimer: String::new(),
            language_model: LanguageModel::default(),
            max_tokens_per_message: None,
        }
    }
}

/// Options an operator may change on a channel; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub only_respond_to_mentions: Option<bool>,
    pub ignore_bots: Option<bool>,
    pub ignore_everyone_mentions: Option<bool>,
    pub language_model: Option<LanguageModel>,
    pub disclaimer: Option<String>,
    pub max_tokens_per_message: Option<u32>,
}

impl ChannelConfig {
    pub fn with_update(&self, update: ConfigUpdate) -> ChannelConfig {
        ChannelConfig {
            only_respond_to_mentions: update
                .only_respond_to_mentions
                .unwrap_or(self.only_respond_to_mentions),
            ignore_bots: update.ignore_bots.unwrap_or(self.ignore_bots),
            ignore_everyone_mentions: update
                .ignore_everyone_mentions
                .unwrap_or(self.ignore_everyone_mentions),
            language_model: update.language_model.unwrap_or(self.language_model),
            disclaimer: update.disclaimer.unwrap_or_else(|| self.disclaimer.clone()),
            max_tokens_per_message: update
                .max_tokens_per_message
                .or(self.max_tokens_per_message),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parsing() {
        assert_eq!("gpt-4".parse::<LanguageModel>().unwrap(), LanguageModel::Gpt4);
        assert_eq!(
            " GPT-3.5-Turbo ".parse::<LanguageModel>().unwrap(),
            LanguageModel::Gpt35Turbo
        );
        assert!("gpt-5".parse::<LanguageModel>().is_err());
    }

    #[test]
    fn test_model_limits_and_tiers() {
        assert_eq!(LanguageModel::Gpt35Turbo.token_limit(), 4096);
        assert_eq!(LanguageModel::Gpt4.token_limit(), 8192);
        assert_eq!(LanguageModel::Gpt4_32k.token_limit(), 32768);
        assert_eq!(LanguageModel::Gpt35Turbo.tier(), Tier::Small);
        assert_eq!(LanguageModel::Gpt4_32k.tier(), Tier::Large);
    }

    #[test]
    fn test_update_leaves_original_untouched() {
        let base = ChannelConfig::default();
        let updated = base.with_update(ConfigUpdate {
            only_respond_to_mentions: Some(false),
            language_model: Some(LanguageModel::Gpt4),
            ..ConfigUpdate::default()
        });

        assert!(base.only_respond_to_mentions);
        assert_eq!(base.language_model, LanguageModel::Gpt35Turbo);
        assert!(!updated.only_respond_to_mentions);
        assert_eq!(updated.language_model, LanguageModel::Gpt4);
        assert_eq!(updated.ignore_bots, base.ignore_bots);
        assert_eq!(updated.error_response, base.error_response);
    }

    #[test]
    fn test_config_json_shape() {
        let config = ChannelConfig {
            language_model: LanguageModel::Gpt4,
            ..ChannelConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"language_model\":\"gpt-4\""));

        // Missing fields fall back to defaults.
        let partial: ChannelConfig = serde_json::from_str("{\"ignore_bots\":false}").unwrap();
        assert!(!partial.ignore_bots);
        assert_eq!(partial.language_model, LanguageModel::Gpt35Turbo);
    }
}
