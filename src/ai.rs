//! AI responder boundary.
//!
//! The bus hands every qualifying message to an [`AiResponder`] and posts
//! whatever comes back. Responders decide for themselves whether a message
//! deserves a reply; `None` means stay quiet. A responder failure must never
//! disturb the room, so implementations swallow their own errors.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::Message;
use crate::room::RoomId;

/// Content produced by a responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedContent {
    /// Reply text.
    pub text: String,
}

/// Room facts a responder may want to look at.
#[derive(Debug, Clone)]
pub struct RoomContext {
    /// Room the triggering message was posted in.
    pub room_id: RoomId,
    /// Room name.
    pub room_name: String,
}

/// Decides whether a message gets an AI reply, and produces it.
#[async_trait]
pub trait AiResponder: Send + Sync {
    /// Classify a message and optionally generate a reply.
    async fn classify(&self, message: &Message, context: &RoomContext)
        -> Option<GeneratedContent>;
}

/// Heuristic responder with canned replies.
///
/// Replies to messages that mention "ai" or ask a question, picking one of
/// a fixed set of responses at random.
#[derive(Default)]
pub struct KeywordResponder;

const CANNED_RESPONSES: &[&str] = &[
    "That's an excellent question about quantum mechanics! Let me break this down for you...",
    "Based on the latest research, here's what we know about this topic:",
    "I can help clarify that concept. Here's a detailed explanation:",
    "Great observation! This relates to several key principles in physics:",
];

impl KeywordResponder {
    /// Create a new keyword responder.
    pub fn new() -> Self {
        Self
    }

    fn triggers(content: &str) -> bool {
        content.to_lowercase().contains("ai") || content.contains('?')
    }
}

#[async_trait]
impl AiResponder for KeywordResponder {
    async fn classify(
        &self,
        message: &Message,
        _context: &RoomContext,
    ) -> Option<GeneratedContent> {
        if !Self::triggers(&message.content) {
            return None;
        }
        let pick = rand::rng().random_range(0..CANNED_RESPONSES.len());
        Some(GeneratedContent {
            text: CANNED_RESPONSES[pick].to_string(),
        })
    }
}

/// Responder backed by an external HTTP endpoint.
///
/// Posts the triggering message to the endpoint and relays the reply. Any
/// failure (network, timeout, bad payload) means no reply.
pub struct HttpResponder {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct ResponderRequest<'a> {
    room: &'a str,
    author: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ResponderReply {
    reply: Option<String>,
}

impl HttpResponder {
    /// Create a responder targeting `endpoint` with the given timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl AiResponder for HttpResponder {
    async fn classify(
        &self,
        message: &Message,
        context: &RoomContext,
    ) -> Option<GeneratedContent> {
        let request = ResponderRequest {
            room: &context.room_name,
            author: &message.author_name,
            content: &message.content,
        };

        let response = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %self.endpoint, "AI endpoint unreachable: {e}");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(
                endpoint = %self.endpoint,
                status = %response.status(),
                "AI endpoint returned an error"
            );
            return None;
        }

        match response.json::<ResponderReply>().await {
            Ok(ResponderReply { reply: Some(text) }) if !text.trim().is_empty() => {
                Some(GeneratedContent { text })
            }
            Ok(_) => {
                debug!(endpoint = %self.endpoint, "AI endpoint declined to reply");
                None
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, "AI endpoint sent a bad payload: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityId;
    use crate::bus::{Author, MessageKind};

    fn text_message(content: &str) -> Message {
        Message::new(
            RoomId::new(),
            1,
            Author::Identity {
                id: IdentityId::new(),
            },
            "Alice",
            content,
            MessageKind::Text,
        )
    }

    fn context() -> RoomContext {
        RoomContext {
            room_id: RoomId::new(),
            room_name: "Physics".to_string(),
        }
    }

    #[tokio::test]
    async fn test_keyword_triggers_on_question() {
        let responder = KeywordResponder::new();
        let reply = responder
            .classify(&text_message("what is entropy?"), &context())
            .await;
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn test_keyword_triggers_on_ai_mention() {
        let responder = KeywordResponder::new();
        for content in ["hey AI, help me", "explain this ai thing", "brAIded topic"] {
            let reply = responder.classify(&text_message(content), &context()).await;
            assert!(reply.is_some(), "expected a reply for {content:?}");
        }
    }

    #[tokio::test]
    async fn test_keyword_stays_quiet_otherwise() {
        let responder = KeywordResponder::new();
        let reply = responder
            .classify(&text_message("good morning everyone"), &context())
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_keyword_reply_is_canned() {
        let responder = KeywordResponder::new();
        let reply = responder
            .classify(&text_message("why?"), &context())
            .await
            .unwrap();
        assert!(CANNED_RESPONSES.contains(&reply.text.as_str()));
    }

    #[tokio::test]
    async fn test_http_unreachable_endpoint_is_silent() {
        // Nothing listens here; the responder must swallow the failure.
        let responder = HttpResponder::new(
            "http://127.0.0.1:9/responder",
            Duration::from_millis(200),
        );
        let reply = responder
            .classify(&text_message("what is entropy?"), &context())
            .await;
        assert!(reply.is_none());
    }
}
