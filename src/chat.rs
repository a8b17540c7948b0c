//! Chat relay: forwards a user message about documents to the model provider.
//!
//! Every request is a fresh session. The persona preamble is re-sent each time
//! and nothing is kept between calls.

use crate::error::ApiError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const PERSONA_INSTRUCTION: &str = "You are an AI assistant specialized in helping users with document editing, conversion, and analysis. You can help with PPTs, CVs, Resumes, and other document types.";

pub const PERSONA_ACKNOWLEDGEMENT: &str = "I understand that I am an AI assistant specialized in document editing, conversion, and analysis. I can help users with various document types including PowerPoint presentations, CVs, resumes, and other formats. I'll provide guidance on editing, formatting, and optimizing these documents while maintaining a professional and helpful approach.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// Metadata about a file the user refers to. Content is never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// Something that can answer a list of turns with one completion.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String>;
}

/// The fixed user/assistant pair that opens every session.
pub fn persona_preamble() -> [ChatTurn; 2] {
    [
        ChatTurn::user(PERSONA_INSTRUCTION),
        ChatTurn::assistant(PERSONA_ACKNOWLEDGEMENT),
    ]
}

/// Flatten the message and attachment descriptors into one prompt string.
pub fn build_context(message: &str, attachments: &[Attachment]) -> String {
    let mut context = message.to_string();
    if !attachments.is_empty() {
        let lines = attachments
            .iter()
            .map(|a| format!("- {} ({})", a.name, a.mime_type))
            .collect::<Vec<_>>()
            .join("\n");
        context.push_str("\nAttached files:\n");
        context.push_str(&lines);
    }
    context
}

pub struct ChatRelay {
    provider: Arc<dyn ChatProvider>,
}

impl ChatRelay {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    /// Validate a request and return the model's reply verbatim.
    pub async fn reply(&self, request: ChatRequest) -> Result<String, ApiError> {
        let message = request
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or(ApiError::MissingParameter { name: "message" })?;
        let attachments = request.attachments.unwrap_or_default();

        if let Some(bad) = attachments.iter().find(|a| a.name.trim().is_empty()) {
            return Err(ApiError::validation(format!(
                "Attachment name must not be empty (type {:?})",
                bad.mime_type
            )));
        }

        let context = build_context(&message, &attachments);
        let mut turns = persona_preamble().to_vec();
        turns.push(ChatTurn::user(context).with_attachments(attachments));

        debug!(
            "Forwarding {} turns to {} ({} attachment descriptors)",
            turns.len(),
            self.provider.name(),
            turns.last().map(|t| t.attachments.len()).unwrap_or(0)
        );

        let response = self.provider.complete(&turns).await.map_err(ApiError::Chat)?;
        info!("Chat reply from {}: {} chars", self.provider.name(), response.len());
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Records every request and answers with a fixed reply (or fails).
    pub struct RecordingProvider {
        pub reply: Option<String>,
        pub requests: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl RecordingProvider {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                reply: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<Vec<ChatTurn>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, turns: &[ChatTurn]) -> Result<String> {
            self.requests.lock().unwrap().push(turns.to_vec());
            self.reply
                .clone()
                .ok_or_else(|| anyhow::anyhow!("provider unavailable (429): quota exceeded"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::RecordingProvider;
    use super::*;

    fn request(message: Option<&str>, attachments: Option<Vec<Attachment>>) -> ChatRequest {
        ChatRequest {
            message: message.map(str::to_string),
            attachments,
        }
    }

    fn cv() -> Attachment {
        Attachment {
            name: "cv.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            url: None,
        }
    }

    #[test]
    fn test_context_without_attachments() {
        assert_eq!(build_context("Hello", &[]), "Hello");
    }

    #[test]
    fn test_context_lists_attachments() {
        let deck = Attachment {
            name: "deck.pptx".to_string(),
            mime_type: "application/vnd.openxmlformats-officedocument.presentationml.presentation"
                .to_string(),
            url: Some("https://storage.example/deck.pptx".to_string()),
        };
        let context = build_context("Review these", &[cv(), deck]);
        assert_eq!(
            context,
            "Review these\nAttached files:\n- cv.pdf (application/pdf)\n- deck.pptx (application/vnd.openxmlformats-officedocument.presentationml.presentation)"
        );
    }

    #[test]
    fn test_attachment_wire_names() {
        let parsed: Attachment =
            serde_json::from_str(r#"{"name":"cv.pdf","type":"application/pdf"}"#).unwrap();
        assert_eq!(parsed, cv());
        assert!(serde_json::from_str::<Attachment>(r#"{"name":"cv.pdf"}"#).is_err());
    }

    #[tokio::test]
    async fn test_hello_sends_preamble_plus_one_turn() {
        let provider = Arc::new(RecordingProvider::replying("  Hi! *How* can I help?\n"));
        let relay = ChatRelay::new(provider.clone());

        let reply = relay.reply(request(Some("Hello"), None)).await.unwrap();
        assert_eq!(reply, "  Hi! *How* can I help?\n");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let turns = &requests[0];
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[..2], persona_preamble());
        assert_eq!(turns[2], ChatTurn::user("Hello"));
    }

    #[tokio::test]
    async fn test_each_call_is_a_fresh_session() {
        let provider = Arc::new(RecordingProvider::replying("ok"));
        let relay = ChatRelay::new(provider.clone());

        relay.reply(request(Some("first"), None)).await.unwrap();
        relay.reply(request(Some("second"), None)).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[1].len(), 3);
        assert_eq!(requests[1][2].text, "second");
    }

    #[tokio::test]
    async fn test_attachment_forwarded_as_text() {
        let provider = Arc::new(RecordingProvider::replying("ok"));
        let relay = ChatRelay::new(provider.clone());

        relay
            .reply(request(Some("Improve my CV"), Some(vec![cv()])))
            .await
            .unwrap();

        let turn = &provider.requests()[0][2];
        assert!(turn.text.contains("- cv.pdf (application/pdf)"));
        assert_eq!(turn.attachments, vec![cv()]);
    }

    #[tokio::test]
    async fn test_blank_message_rejected_before_provider() {
        let provider = Arc::new(RecordingProvider::replying("ok"));
        let relay = ChatRelay::new(provider.clone());

        for message in [None, Some(""), Some("   ")] {
            let err = relay.reply(request(message, None)).await.unwrap_err();
            assert!(matches!(err, ApiError::MissingParameter { name: "message" }));
        }
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_chat_error() {
        let relay = ChatRelay::new(Arc::new(RecordingProvider::failing()));
        let err = relay.reply(request(Some("Hello"), None)).await.unwrap_err();
        assert!(matches!(err, ApiError::Chat(_)));
    }
}
