//! services/questiongen/src/adapters/broker.rs
//!
//! Adapter for a managed AI broker that sits in front of the actual models and
//! enforces tenant quotas. The broker takes one prompt per request plus the
//! earlier messages as conversation context, and always answers with a JSON
//! envelope carrying a status code.
//!
//! The same endpoint serves both the `questiongeneration` purpose (text) and the
//! `itt` purpose (image to text), so this adapter implements `GenerationProvider`
//! as well as `CaptioningService`.

use std::time::Duration;

use async_trait::async_trait;
use questiongen_core::{
    domain::{ChatMessage, ContextId},
    ports::{CaptioningService, GenerationError, GenerationProvider, PortError, PortResult},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const COMPONENT: &str = "qbank_questiongen";
const GENERATION_PURPOSE: &str = "questiongeneration";
const CAPTION_PURPOSE: &str = "itt";

/// MIME types the broker's image-to-text purpose takes without rasterizing.
pub const BROKER_CAPTION_MIME_TYPES: [&str; 4] =
    ["application/pdf", "image/png", "image/jpeg", "image/jpg"];

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Serialize, PartialEq)]
struct ContextMessage<'a> {
    sender: &'a str,
    message: &'a str,
}

#[derive(Debug, Serialize, Default, PartialEq)]
struct RequestOptions<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conversationcontext: Vec<ContextMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Serialize, PartialEq)]
struct BrokerRequest<'a> {
    purpose: &'a str,
    component: &'a str,
    context_id: ContextId,
    prompt: &'a str,
    options: RequestOptions<'a>,
}

#[derive(Debug, Deserialize)]
struct BrokerResponse {
    code: u16,
    #[serde(default)]
    content: String,
    #[serde(default)]
    errormessage: String,
    #[serde(default)]
    debuginfo: Option<String>,
}

impl BrokerResponse {
    fn into_result(self) -> Result<String, GenerationError> {
        if self.code == 200 {
            Ok(self.content)
        } else {
            Err(GenerationError::Provider {
                code: self.code,
                message: self.errormessage,
                debug_info: self.debuginfo.filter(|info| !info.is_empty()),
            })
        }
    }
}

/// Splits the prompt into the broker's shape: the last message becomes the
/// prompt and everything before it the conversation context.
fn generation_request(context_id: ContextId, messages: &[ChatMessage]) -> Option<BrokerRequest<'_>> {
    let (last, context) = messages.split_last()?;
    Some(BrokerRequest {
        purpose: GENERATION_PURPOSE,
        component: COMPONENT,
        context_id,
        prompt: &last.content,
        options: RequestOptions {
            conversationcontext: context
                .iter()
                .map(|message| ContextMessage {
                    sender: message.role.as_str(),
                    message: &message.content,
                })
                .collect(),
            image: None,
        },
    })
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

pub struct AiBrokerAdapter {
    client: Client,
    request_url: String,
    api_key: Option<String>,
}

impl AiBrokerAdapter {
    /// Creates a new adapter posting to `{endpoint}/request`.
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            request_url: format!("{}/request", endpoint.trim_end_matches('/')),
            api_key,
        })
    }

    async fn post(&self, request: &BrokerRequest<'_>) -> Result<String, GenerationError> {
        debug!(
            "Sending {} request to the AI broker for context {}.",
            request.purpose, request.context_id
        );
        let mut builder = self.client.post(&self.request_url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let envelope = response
            .json::<BrokerResponse>()
            .await
            .map_err(|e| GenerationError::Transport(format!("Unreadable broker response: {}", e)))?;
        envelope.into_result()
    }
}

//=========================================================================================
// Port Implementations
//=========================================================================================

#[async_trait]
impl GenerationProvider for AiBrokerAdapter {
    async fn send(
        &self,
        context_id: ContextId,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        let request = generation_request(context_id, messages).ok_or_else(|| {
            GenerationError::Transport("Cannot send an empty prompt.".to_string())
        })?;
        self.post(&request).await
    }
}

#[async_trait]
impl CaptioningService for AiBrokerAdapter {
    fn accepts_mime_type(&self, mime_type: &str) -> bool {
        BROKER_CAPTION_MIME_TYPES.contains(&mime_type)
    }

    async fn caption(
        &self,
        context_id: ContextId,
        instruction: &str,
        data_url: &str,
    ) -> PortResult<String> {
        let request = BrokerRequest {
            purpose: CAPTION_PURPOSE,
            component: COMPONENT,
            context_id,
            prompt: instruction,
            options: RequestOptions {
                conversationcontext: Vec::new(),
                image: Some(data_url),
            },
        };
        self.post(&request).await.map_err(|e| {
            if let Some(info) = e.debug_info() {
                warn!("Image-to-text request failed. Debugging info: {}", info);
            }
            PortError::Unexpected(e.user_message())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_message_becomes_the_prompt() {
        let messages = vec![
            ChatMessage::system("primer"),
            ChatMessage::named_system("example_user", "instructions"),
            ChatMessage::user("French Revolution"),
        ];
        let request = generation_request(42, &messages).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["purpose"], "questiongeneration");
        assert_eq!(json["context_id"], 42);
        assert_eq!(json["prompt"], "French Revolution");
        let context = json["options"]["conversationcontext"].as_array().unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0]["sender"], "system");
        assert_eq!(context[1]["message"], "instructions");
        assert!(json["options"].get("image").is_none());
    }

    #[test]
    fn empty_prompt_has_no_request() {
        assert!(generation_request(1, &[]).is_none());
    }

    #[test]
    fn envelope_codes_map_to_results() {
        let ok: BrokerResponse =
            serde_json::from_str(r#"{"code":200,"content":"<quiz></quiz>"}"#).unwrap();
        assert_eq!(ok.into_result().unwrap(), "<quiz></quiz>");

        let quota: BrokerResponse = serde_json::from_str(
            r#"{"code":429,"errormessage":"You have reached the maximum number of requests.","debuginfo":"tenant=7"}"#,
        )
        .unwrap();
        let error = quota.into_result().unwrap_err();
        assert_eq!(error.user_message(), "You have reached the maximum number of requests.");
        assert_eq!(error.debug_info(), Some("tenant=7"));
    }

    #[test]
    fn broker_accepts_pdfs_for_captioning() {
        let adapter =
            AiBrokerAdapter::new("https://broker.example.org/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(adapter.request_url, "https://broker.example.org/request");
        assert!(adapter.accepts_mime_type("application/pdf"));
        assert!(!adapter.accepts_mime_type("text/plain"));
    }
}
