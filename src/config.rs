use crate::types::UserId;

/// Server key of the global notification channel.
pub const GLOBAL_CHANNEL: &str = "Geral";

/// Endpoints and identity for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL for REST calls, e.g. `https://example.com`.
    pub http_base: String,
    /// Base URL for WebSocket connections, e.g. `wss://example.com`.
    pub ws_base: String,
    /// Our server-assigned identity.
    pub user_id: UserId,
}

impl ClientConfig {
    pub fn new(http_base: impl Into<String>, ws_base: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http_base: http_base.into().trim_end_matches('/').to_string(),
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    /// WebSocket URL for a channel: `<ws_base>/ws/<channel>/<uid>?token=...`.
    pub fn ws_url(&self, channel: &str, token: &str) -> String {
        format!(
            "{}/ws/{}/{}?token={}",
            self.ws_base,
            urlencoding::encode(channel),
            self.user_id,
            urlencoding::encode(token)
        )
    }
}
