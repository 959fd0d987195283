//! [`ChatDriver`] – client for the external conversational service.
//!
//! Speaks the Dify-style chat API: `POST {base_url}/chat-messages` with a
//! bearer token and `response_mode: "blocking"`, so one request yields one
//! complete answer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use brewlink_runtime::chat_driver::{ChatDriver, Conversation};
//!
//! # async fn demo() -> Result<(), brewlink_runtime::ChatError> {
//! let driver = ChatDriver::new("https://api.dify.ai/v1", "app-key", "user", Duration::from_secs(30))?;
//! let reply = driver.reply("qual a temperatura ideal?", None).await?;
//! println!("{}", reply.answer);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use brewlink_types::BrewError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest slice of an error body kept in [`ChatError::Status`].
const ERROR_BODY_LIMIT: usize = 256;

/// Errors that can arise from conversational-service calls.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The service answered with a non-2xx status.
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body was not the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<ChatError> for BrewError {
    fn from(e: ChatError) -> Self {
        BrewError::ExternalService(e.to_string())
    }
}

/// The service's answer. `answer` and `conversation_id` are what callers
/// use; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationReply {
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Anything that can answer a chat message.
#[async_trait]
pub trait Conversation: Send + Sync {
    async fn reply(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConversationReply, ChatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    inputs: Map<String, Value>,
    query: &'a str,
    response_mode: &'static str,
    user: &'a str,
}

/// Async client for the chat-messages endpoint.
///
/// Construct once at startup and share; the inner [`reqwest::Client`] pools
/// connections.
pub struct ChatDriver {
    base_url: String,
    api_key: String,
    user: String,
    client: reqwest::Client,
}

impl ChatDriver {
    /// Create a driver for `base_url` (e.g. `"https://api.dify.ai/v1"`).
    ///
    /// Every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        user: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            user: user.into(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat-messages", self.base_url)
    }

    fn request_body<'a>(&'a self, query: &'a str, conversation_id: Option<&'a str>) -> ChatRequest<'a> {
        ChatRequest {
            conversation_id,
            inputs: Map::new(),
            query,
            response_mode: "blocking",
            user: &self.user,
        }
    }
}

#[async_trait]
impl Conversation for ChatDriver {
    /// # Errors
    ///
    /// [`ChatError::Http`] on transport failure or timeout,
    /// [`ChatError::Status`] on a non-2xx answer, [`ChatError::BadResponse`]
    /// when the body has no `answer`.
    async fn reply(
        &self,
        query: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConversationReply, ChatError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(query, conversation_id))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        serde_json::from_str(&body).map_err(|e| ChatError::BadResponse(e.to_string()))
    }
}
