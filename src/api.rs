//! Durable-Write Collaborator
//!
//! The REST-style capability the engine uses for durable writes and
//! catch-up reads: sending and replying, deleting, marking read, the
//! cursor fetch behind the polling fallback, and the authoritative
//! per-message reaction fetch. Consumed as `Arc<dyn MessageApi>` so tests
//! substitute an in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Reaction, ServerId, ServerMessage, UserId};

/// Failure from the durable-write collaborator.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    /// Could not reach the server at all.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with a non-success status.
    #[error("request failed: {status} - {message}")]
    Rejected { status: u16, message: String },
    /// The response body did not parse.
    #[error("failed to parse response: {0}")]
    Malformed(String),
}

/// The durable-write capability.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Persist a new message; the returned record carries the server id.
    async fn send_message(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
    ) -> Result<ServerMessage, ApiError>;

    /// Persist a reply to an existing message.
    async fn send_reply(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
        reply_to: &ServerId,
    ) -> Result<ServerMessage, ApiError>;

    /// Durably delete a message.
    async fn delete_message(&self, message_id: &ServerId) -> Result<(), ApiError>;

    /// Mark every message from `from_user` to `to_user` as read.
    async fn mark_messages_as_read(
        &self,
        from_user: &UserId,
        to_user: &UserId,
    ) -> Result<(), ApiError>;

    /// Fetch messages between the two users with `created_at` strictly
    /// greater than `cursor`. This is the polling fallback's catch-up call.
    async fn get_messages_since(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerMessage>, ApiError>;

    /// Fetch the authoritative reaction rows for the given messages.
    async fn get_reactions(
        &self,
        message_ids: &[ServerId],
    ) -> Result<HashMap<ServerId, Vec<Reaction>>, ApiError>;
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    sender_id: &'a UserId,
    recipient_id: &'a UserId,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a ServerId>,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest<'a> {
    from_user: &'a UserId,
    to_user: &'a UserId,
}

#[derive(Debug, Serialize)]
struct GetReactionsRequest<'a> {
    message_ids: &'a [ServerId],
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<ServerMessage>,
}

#[derive(Debug, Deserialize)]
struct ReactionsResponse {
    reactions: HashMap<ServerId, Vec<Reaction>>,
}

/// `MessageApi` over HTTP with JSON bodies and bearer auth.
pub struct HttpMessageApi {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpMessageApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            client: Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| status.to_string());
        Err(ApiError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn send_message(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
    ) -> Result<ServerMessage, ApiError> {
        let body = SendMessageRequest {
            sender_id,
            recipient_id,
            content,
            reply_to: None,
        };
        let response = self
            .request(self.client.post(self.url("/api/messages")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response)
            .await?
            .json::<ServerMessage>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn send_reply(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
        reply_to: &ServerId,
    ) -> Result<ServerMessage, ApiError> {
        let body = SendMessageRequest {
            sender_id,
            recipient_id,
            content,
            reply_to: Some(reply_to),
        };
        let response = self
            .request(self.client.post(self.url("/api/messages/reply")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response)
            .await?
            .json::<ServerMessage>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn delete_message(&self, message_id: &ServerId) -> Result<(), ApiError> {
        let response = self
            .request(
                self.client
                    .delete(self.url(&format!("/api/messages/{}", message_id))),
            )
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn mark_messages_as_read(
        &self,
        from_user: &UserId,
        to_user: &UserId,
    ) -> Result<(), ApiError> {
        let body = MarkReadRequest { from_user, to_user };
        let response = self
            .request(self.client.post(self.url("/api/messages/read")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn get_messages_since(
        &self,
        user_a: &UserId,
        user_b: &UserId,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerMessage>, ApiError> {
        let mut request = self
            .request(self.client.get(self.url("/api/messages")))
            .query(&[("user_a", user_a.as_str()), ("user_b", user_b.as_str())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("since", cursor.to_rfc3339())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response)
            .await?
            .json::<MessagesResponse>()
            .await
            .map(|r| r.messages)
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    async fn get_reactions(
        &self,
        message_ids: &[ServerId],
    ) -> Result<HashMap<ServerId, Vec<Reaction>>, ApiError> {
        let body = GetReactionsRequest { message_ids };
        let response = self
            .request(self.client.post(self.url("/api/reactions/query")))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response)
            .await?
            .json::<ReactionsResponse>()
            .await
            .map(|r| r.reactions)
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }
}
