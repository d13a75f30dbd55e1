//! Chat-completion client interface.
//!
//! Every network call the harness makes (generation, judging, fixture
//! regeneration, orchestration loops) goes through the [`MessagesClient`]
//! trait, so evaluators can be driven by a scripted fake in tests.
//!
//! ```text
//! evaluate_task / run_orchestrator_trial / ModelGrader
//!     |
//!     v
//! &dyn MessagesClient --create(request)--> MessageResponse
//!     |
//!     +-- AnthropicClient   (reqwest, retries on 429/5xx)
//!     +-- ScriptedClient    (trialkit-test-utils)
//! ```

pub mod anthropic;
pub mod ratelimit;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;

pub use anthropic::AnthropicClient;
pub use ratelimit::{RateLimits, max_workers};
pub use types::{
    ApiUsage, ContentBlock, Message, MessageRequest, MessageResponse, Role, ToolSchema,
};

/// Errors surfaced by the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode API response: {0}")]
    Decode(String),

    #[error("missing API key (set ANTHROPIC_API_KEY)")]
    MissingApiKey,
}

/// A chat-completion endpoint.
///
/// Implementations must be object-safe so evaluators can take
/// `&dyn MessagesClient`.
#[async_trait]
pub trait MessagesClient: Send + Sync {
    /// Send one request and return the model's response.
    async fn create(&self, request: &MessageRequest) -> Result<MessageResponse>;
}

// Compile-time assertion: MessagesClient must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn MessagesClient) {}
};

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoClient;

    #[async_trait]
    impl MessagesClient for EchoClient {
        async fn create(&self, request: &MessageRequest) -> Result<MessageResponse> {
            let last = request
                .messages
                .last()
                .and_then(|m| m.content.first())
                .cloned()
                .unwrap_or_else(|| ContentBlock::text(""));
            Ok(MessageResponse {
                id: "echo".into(),
                content: vec![last],
                stop_reason: Some("end_turn".into()),
                usage: ApiUsage::default(),
            })
        }
    }

    #[tokio::test]
    async fn client_is_usable_as_trait_object() {
        let client: Box<dyn MessagesClient> = Box::new(EchoClient);
        let req = MessageRequest::new("m", 5, vec![Message::user("ping")]);
        let resp = client.create(&req).await.unwrap();
        assert_eq!(resp.first_text(), "ping");
    }
}
