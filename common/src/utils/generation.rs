use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

const SYSTEM_PROMPT: &str =
    "You are a careful assistant for a UK pensions and insurance provider. Follow the instructions in the user message exactly.";

/// Text-generation service: prompt in, reply text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AppError>;
}

#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(
        client: Arc<Client<OpenAIConfig>>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        Self::new(
            client,
            config.generation_model.clone(),
            Duration::from_secs(config.service_timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(SYSTEM_PROMPT.to_string()).into(),
                ChatCompletionRequestUserMessage::from(prompt.to_string()).into(),
            ])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::TransientService(format!(
                    "generation timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(AppError::from_openai)?;

        first_message_content(response)
    }
}

fn first_message_content(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| AppError::LLMParsing("No content found in LLM response".into()))?;

    debug!(length = content.len(), "generation received");
    Ok(content.trim().to_string())
}
