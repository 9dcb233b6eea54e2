//! services/questiongen/src/adapters/openai_chat.rs
//!
//! This module contains the adapter for direct chat-completion endpoints.
//! It implements the `GenerationProvider` port from the `core` crate for both
//! OpenAI (bearer token) and Azure OpenAI (`api-key` header).

use std::time::Duration;

use async_openai::{
    config::{AzureConfig, Config, OpenAIConfig},
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use questiongen_core::{
    domain::{ChatMessage, ChatRole, ContextId},
    ports::{GenerationError, GenerationProvider},
};
use tracing::debug;

/// Builds an OpenAI client with the given HTTP timeout.
pub fn openai_client(
    api_key: &str,
    endpoint: &str,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>, reqwest::Error> {
    let config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(endpoint);
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Client::with_config(config).with_http_client(http))
}

/// Builds an Azure OpenAI client. `deployment_id` takes the place of the model.
pub fn azure_client(
    api_key: &str,
    endpoint: &str,
    deployment_id: &str,
    api_version: &str,
    timeout: Duration,
) -> Result<Client<AzureConfig>, reqwest::Error> {
    let config = AzureConfig::new()
        .with_api_base(endpoint)
        .with_api_key(api_key)
        .with_deployment_id(deployment_id)
        .with_api_version(api_version);
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Client::with_config(config).with_http_client(http))
}

/// Converts a pipeline message into the chat-completion request type.
pub(crate) fn to_request_message(
    message: &ChatMessage,
) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    let message = match message.role {
        ChatRole::System => {
            let mut args = ChatCompletionRequestSystemMessageArgs::default();
            args.content(message.content.as_str());
            if let Some(name) = &message.name {
                args.name(name.as_str());
            }
            ChatCompletionRequestMessage::System(args.build()?)
        }
        ChatRole::User => {
            let mut args = ChatCompletionRequestUserMessageArgs::default();
            args.content(message.content.as_str());
            if let Some(name) = &message.name {
                args.name(name.as_str());
            }
            ChatCompletionRequestMessage::User(args.build()?)
        }
        ChatRole::Assistant => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            args.content(message.content.as_str());
            if let Some(name) = &message.name {
                args.name(name.as_str());
            }
            ChatCompletionRequestMessage::Assistant(args.build()?)
        }
    };
    Ok(message)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `GenerationProvider` against any OpenAI-compatible
/// chat-completion endpoint.
#[derive(Clone)]
pub struct OpenAiChatAdapter<C: Config> {
    client: Client<C>,
    model: String,
}

impl<C: Config> OpenAiChatAdapter<C> {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<C>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `GenerationProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl<C: Config + Send + Sync + 'static> GenerationProvider for OpenAiChatAdapter<C> {
    async fn send(
        &self,
        _context_id: ContextId,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        let messages = messages
            .iter()
            .map(to_request_message)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        debug!("Sending chat completion request to model {}.", self.model);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| GenerationError::Transport(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                GenerationError::Transport(
                    "The chat completion response contained no text content.".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_system_messages_keep_their_name() {
        let message = to_request_message(&ChatMessage::named_system("example_user", "Do this."))
            .expect("message converts");
        let json = serde_json::to_value(&message).expect("message serializes");
        assert_eq!(json["role"], "system");
        assert_eq!(json["name"], "example_user");
        assert_eq!(json["content"], "Do this.");
    }

    #[test]
    fn user_messages_have_no_name_by_default() {
        let message = to_request_message(&ChatMessage::user("French Revolution"))
            .expect("message converts");
        let json = serde_json::to_value(&message).expect("message serializes");
        assert_eq!(json["role"], "user");
        assert!(json.get("name").is_none());
    }
}
