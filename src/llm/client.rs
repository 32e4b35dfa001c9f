use super::{CompletionError, Completer};
use crate::config::Config;
use crate::conversation::{LanguageModel, Role};
use crate::moderation::Moderator;
use crate::tokens::ChatTurn;
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateModerationRequestArgs, FinishReason,
        ModerationInput,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

/// OpenAI-compatible client serving both chat completions and moderation.
#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_base(&config.openai_base_url)
            .with_api_key(&config.openai_api_key);

        Self {
            client: Client::with_config(openai_config),
        }
    }

    fn request_message(turn: &ChatTurn) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let name = (!turn.name.is_empty()).then(|| turn.name.clone());
        let message = match turn.role {
            Role::System => {
                let mut args = ChatCompletionRequestSystemMessageArgs::default();
                args.content(turn.content.clone());
                if let Some(name) = name {
                    args.name(name);
                }
                args.build()?.into()
            }
            Role::User => {
                let mut args = ChatCompletionRequestUserMessageArgs::default();
                args.content(turn.content.clone());
                if let Some(name) = name {
                    args.name(name);
                }
                args.build()?.into()
            }
            Role::Assistant => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                args.content(turn.content.clone());
                if let Some(name) = name {
                    args.name(name);
                }
                args.build()?.into()
            }
        };
        Ok(message)
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(
        &self,
        history: &[ChatTurn],
        model: LanguageModel,
        user_tag: &str,
        max_tokens: Option<u32>,
    ) -> Result<String, CompletionError> {
        let messages = history
            .iter()
            .map(Self::request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CompletionError::InvalidRequest(e.to_string()))?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model.id()).messages(messages).user(user_tag);
        if let Some(max) = max_tokens {
            args.max_completion_tokens(max);
        }
        let request = args
            .build()
            .map_err(|e| CompletionError::InvalidRequest(e.to_string()))?;

        debug!("Sending {} messages to {}", history.len(), model);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| CompletionError::Upstream(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::NoChoices)?;

        match choice.finish_reason {
            Some(FinishReason::ContentFilter) => Err(CompletionError::ContentFiltered),
            Some(FinishReason::Stop) | Some(FinishReason::Length) | None => {
                Ok(choice.message.content.unwrap_or_default())
            }
            Some(other) => Err(CompletionError::UnexpectedFinish(format!("{:?}", other))),
        }
    }
}

#[async_trait]
impl Moderator for LlmClient {
    async fn classify(&self, texts: &[String]) -> anyhow::Result<Vec<bool>> {
        let request = CreateModerationRequestArgs::default()
            .input(ModerationInput::StringArray(texts.to_vec()))
            .build()?;

        let response = self.client.moderations().create(request).await?;
        Ok(response.results.iter().map(|result| result.flagged).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, content: &str, name: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_request_messages_keep_role_and_name() {
        let cases = [
            (turn(Role::System, "be nice", ""), "system"),
            (turn(Role::User, "hello", "1234"), "user"),
            (turn(Role::Assistant, "hi!", "999"), "assistant"),
        ];

        for (turn, role) in cases {
            let message = LlmClient::request_message(&turn).unwrap();
            let json = serde_json::to_value(&message).unwrap();
            assert_eq!(json["role"], role);
            assert_eq!(json["content"], turn.content.as_str());
            if turn.name.is_empty() {
                assert!(json.get("name").map_or(true, |v| v.is_null()));
            } else {
                assert_eq!(json["name"], turn.name.as_str());
            }
        }
    }
}
