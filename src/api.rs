//! Typed wrappers over the server REST API.
//!
//! Everything here is a bounded request/replace round-trip: catch-up history,
//! ring registration, media-session credentials, presence and unread polls.
//! Responses are parsed defensively; a 401-class status maps to
//! [`ClientError::AuthExpired`] and halts reconnection upstream.

use crate::error::ClientError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::types::message::{ChatEvent, EventBody};
use crate::types::{ConversationId, UserId};
use chrono::DateTime;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One history entry as the server returns it.
#[derive(Debug, Deserialize)]
struct WireHistoryEntry {
    id: i64,
    user_id: i64,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Credentials for joining the media provider.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaCredentials {
    pub app_id: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WireUnreadBucket {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub by_sender: HashMap<String, u32>,
    #[serde(default)]
    pub by_comm: HashMap<String, u32>,
}

/// Raw `/notifications` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WireNotifications {
    #[serde(default)]
    pub dms: WireUnreadBucket,
    #[serde(default)]
    pub comms: WireUnreadBucket,
    #[serde(default)]
    pub friend_reqs: u32,
}

pub struct Api {
    http: Arc<dyn HttpClient>,
    base_url: String,
    token: RwLock<String>,
}

impl Api {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>, token: String) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(token),
        }
    }

    /// Current bearer credential. Also used for WebSocket URLs.
    pub fn token(&self) -> String {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Replace the bearer credential after re-authentication.
    pub fn set_token(&self, token: String) {
        *self.token.write().expect("token lock poisoned") = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| ClientError::TransientNetwork(e.to_string()))?;
        match response.status_code {
            401 | 403 => Err(ClientError::AuthExpired),
            s if (200..300).contains(&s) => Ok(response),
            other => Err(ClientError::TransientNetwork(format!(
                "unexpected status {other}"
            ))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let request = HttpRequest::get(self.url(path)).bearer(&self.token());
        let response = self.execute(request).await?;
        response
            .json()
            .map_err(|e| ClientError::ProtocolViolation(format!("bad response for {path}: {e}")))
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<(), ClientError> {
        let request = HttpRequest::post(self.url(path))
            .bearer(&self.token())
            .json(&body)
            .map_err(|e| ClientError::ProtocolViolation(e.to_string()))?;
        self.execute(request).await?;
        Ok(())
    }

    /// Bounded catch-up window of recent events for a conversation.
    pub async fn fetch_history(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<ChatEvent>, ClientError> {
        let path = match conversation {
            ConversationId::Direct(peer) => format!("/dms/{peer}"),
            ConversationId::Group(id) => format!("/group/{id}/messages"),
            ConversationId::Community(id) => format!("/community/channel/{id}/messages"),
        };
        let entries: Vec<WireHistoryEntry> = self.get_json(&path).await?;
        debug!(target: "Api", "Fetched {} history entries for {conversation}", entries.len());
        Ok(entries
            .into_iter()
            .map(|e| ChatEvent {
                id: e.id,
                sender: UserId(e.user_id),
                conversation,
                body: EventBody::classify(&e.content),
                timestamp: e
                    .timestamp
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.to_utc()),
            })
            .collect())
    }

    /// Register an outbound direct ring server-side, so the callee is
    /// notified even if it is not currently connected to the global channel.
    pub async fn ring_direct(
        &self,
        caller: UserId,
        target: UserId,
        channel_name: &str,
    ) -> Result<(), ClientError> {
        self.post_json(
            "/call/ring/dm",
            json!({
                "caller_id": caller.0,
                "target_id": target.0,
                "channel_name": channel_name,
            }),
        )
        .await
    }

    /// Register an outbound group ring server-side.
    pub async fn ring_group(
        &self,
        caller: UserId,
        group_id: i64,
        channel_name: &str,
    ) -> Result<(), ClientError> {
        self.post_json(
            "/call/ring/group",
            json!({
                "caller_id": caller.0,
                "group_id": group_id,
                "channel_name": channel_name,
            }),
        )
        .await
    }

    /// Media-session credentials for a call channel.
    pub async fn media_credentials(
        &self,
        channel: &str,
        uid: UserId,
    ) -> Result<MediaCredentials, ClientError> {
        let path = format!(
            "/agora/token?channel={}&uid={uid}",
            urlencoding::encode(channel)
        );
        let creds: MediaCredentials = self.get_json(&path).await?;
        if creds.app_id.trim().is_empty() {
            return Err(ClientError::TransientNetwork(
                "media provider not configured".to_string(),
            ));
        }
        Ok(creds)
    }

    /// Wholesale snapshot of currently online users.
    pub async fn online_users(&self) -> Result<Vec<UserId>, ClientError> {
        let ids: Vec<i64> = self.get_json("/users/online").await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    /// Wholesale snapshot of unread counters.
    pub async fn notifications(&self) -> Result<WireNotifications, ClientError> {
        self.get_json("/notifications").await
    }

    /// Mark every message from `sender` as read.
    pub async fn mark_read(&self, sender: UserId, me: UserId) -> Result<(), ClientError> {
        self.post_json(&format!("/inbox/read/{sender}"), json!({ "uid": me.0 }))
            .await
    }

    /// Tombstone one of our messages server-side. The audit trail keeps the
    /// row; only its content is replaced.
    pub async fn delete_message(
        &self,
        msg_id: i64,
        conversation: ConversationId,
    ) -> Result<(), ClientError> {
        let kind = match conversation {
            ConversationId::Direct(_) => "dm",
            ConversationId::Group(_) => "group",
            ConversationId::Community(_) => "comm",
        };
        self.post_json(
            "/message/delete",
            json!({ "msg_id": msg_id, "type": kind }),
        )
        .await
    }

    /// HTTP fallback for community sends when the channel socket is down.
    pub async fn send_community_message(
        &self,
        channel_id: i64,
        content: &str,
    ) -> Result<(), ClientError> {
        self.post_json(
            &format!("/community/channel/{channel_id}/send"),
            json!({ "content": content }),
        )
        .await
    }
}
