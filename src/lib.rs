pub mod billing;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod db;
pub mod discord_text;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod moderation;
pub mod pipeline;
pub mod quota;
pub mod registry;
pub mod serializer;
pub mod tokens;

use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub registry: Arc<registry::ConversationRegistry>,
    pub serializer: serializer::ChannelSerializer<gateway::InboundMessage, pipeline::TurnPipeline>,
    pub counter: Arc<dyn tokens::TokenCounter>,
    /// Bot's own user ID, used to detect mentions and author bot records
    pub bot_id: serenity::UserId,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Opens the database, restores every guild and wires the turn pipeline.
pub async fn build_data(
    config: config::Config,
    http: Arc<serenity::Http>,
    bot_id: serenity::UserId,
) -> anyhow::Result<Data> {
    let db = db::Database::new(&config)?;
    db.execute_init()?;

    let defaults = registry::GuildDefaults::from_config(&config);
    let registry = Arc::new(registry::ConversationRegistry::rehydrate(db, defaults).await?);

    let counter: Arc<dyn tokens::TokenCounter> = Arc::new(tokens::TiktokenCounter::cl100k()?);
    let llm_client = Arc::new(llm::LlmClient::new(&config));
    let pipeline = pipeline::TurnPipeline::new(
        registry.clone(),
        Arc::new(gateway::SerenityGateway::new(http)),
        llm_client.clone(),
        moderation::ModerationGate::new(llm_client),
        counter.clone(),
        pipeline::PipelineSettings::from_config(&config, bot_id.to_string()),
    );

    Ok(Data {
        config,
        registry,
        serializer: serializer::ChannelSerializer::new(Arc::new(pipeline)),
        counter,
        bot_id,
    })
}
