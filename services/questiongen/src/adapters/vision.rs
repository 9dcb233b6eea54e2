//! services/questiongen/src/adapters/vision.rs
//!
//! Image-to-text through a vision-capable chat-completion model. Implements the
//! `CaptioningService` port; PDFs are not accepted here and get rasterized by
//! the extractor before they reach this adapter.

use async_openai::{
    config::Config,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use questiongen_core::{
    domain::ContextId,
    ports::{CaptioningService, PortError, PortResult},
};
use tracing::debug;

const IMAGE_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/jpg"];

pub struct OpenAiVisionAdapter<C: Config> {
    client: Client<C>,
    model: String,
}

impl<C: Config> OpenAiVisionAdapter<C> {
    pub fn new(client: Client<C>, model: String) -> Self {
        Self { client, model }
    }
}

/// One user message holding the instruction followed by the image.
fn caption_request(instruction: &str, data_url: &str) -> PortResult<ChatCompletionRequestMessage> {
    let parts = vec![
        ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText {
                text: instruction.to_string(),
            },
        ),
        ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl {
                    url: data_url.to_string(),
                    detail: Some(ImageDetail::Auto),
                },
            },
        ),
    ];
    let message = ChatCompletionRequestUserMessageArgs::default()
        .content(ChatCompletionRequestUserMessageContent::Array(parts))
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    Ok(ChatCompletionRequestMessage::User(message))
}

#[async_trait]
impl<C: Config + Send + Sync + 'static> CaptioningService for OpenAiVisionAdapter<C> {
    fn accepts_mime_type(&self, mime_type: &str) -> bool {
        IMAGE_MIME_TYPES.contains(&mime_type)
    }

    async fn caption(
        &self,
        _context_id: ContextId,
        instruction: &str,
        data_url: &str,
    ) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![caption_request(instruction, data_url)?])
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!("Sending image-to-text request to model {}.", self.model);
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PortError::Unexpected(format!("Image-to-text request failed: {}", e)))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                PortError::Unexpected("The image-to-text response contained no text.".to_string())
            })
    }
}
