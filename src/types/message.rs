use super::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Payload of a chat event, classified from the wire content.
///
/// Media payloads are opaque references at this layer; upload and rendering
/// live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EventBody {
    Text(String),
    /// A voice-note reference (`[AUDIO]<url>` on the wire).
    VoiceNote(String),
    /// An image/video reference delivered as a bare URL.
    Media(String),
    /// The server already replaced this entry with a tombstone.
    Tombstone,
}

impl EventBody {
    /// Classify raw wire content.
    pub fn classify(content: &str) -> Self {
        if content == "[DELETED]" {
            EventBody::Tombstone
        } else if let Some(url) = content.strip_prefix("[AUDIO]") {
            EventBody::VoiceNote(url.to_string())
        } else if content.starts_with("http://") || content.starts_with("https://") {
            EventBody::Media(content.to_string())
        } else {
            EventBody::Text(content.to_string())
        }
    }
}

/// An immutable chat event as observed by this client.
///
/// The id is assigned by the server and is stable, but arrival order is not
/// guaranteed to follow id order (catch-up can race live delivery).
#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
    pub id: i64,
    pub sender: UserId,
    #[serde(skip)]
    pub conversation: ConversationId,
    pub body: EventBody,
    pub timestamp: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bodies() {
        assert_eq!(
            EventBody::classify("hello"),
            EventBody::Text("hello".into())
        );
        assert_eq!(
            EventBody::classify("[AUDIO]https://cdn/x.webm"),
            EventBody::VoiceNote("https://cdn/x.webm".into())
        );
        assert_eq!(
            EventBody::classify("https://cdn/pic.png"),
            EventBody::Media("https://cdn/pic.png".into())
        );
        assert_eq!(EventBody::classify("[DELETED]"), EventBody::Tombstone);
    }
}
