//! Frame classification and encoding for the channel protocol.
//!
//! The global channel carries structured JSON frames (`{"type": ...}`) plus
//! a few legacy colon-delimited text verbs; conversation channels carry JSON
//! message payloads and plain-text outbound bodies. Parsing is defensive:
//! anything malformed is a `ProtocolViolation` for the caller to drop and
//! log, never a reason to tear the connection down.

use crate::error::ClientError;
use crate::types::call::CallKind;
use crate::types::message::{ChatEvent, EventBody};
use crate::types::{ConversationId, UserId};
use chrono::DateTime;
use serde::Deserialize;
use std::fmt;

/// Keepalive frame sent on the global channel.
pub const KEEPALIVE_FRAME: &str = "ping";

/// Server limit on outbound message bodies.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Verbs of the legacy `CALL_SIGNAL` text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallVerb {
    Accepted,
    Rejected,
    Cancelled,
}

impl CallVerb {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallVerb::Accepted => "accepted",
            CallVerb::Rejected => "rejected",
            CallVerb::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a `CALL_SIGNAL:<target>:<verb>:<channel>` frame.
pub fn call_signal_frame(target: UserId, verb: CallVerb, channel: &str) -> String {
    format!("CALL_SIGNAL:{target}:{verb}:{channel}")
}

/// Encode a `KICK_CALL:<uid>` frame (admin only).
pub fn kick_call_frame(target: UserId) -> String {
    format!("KICK_CALL:{target}")
}

/// Inbound frame on the global channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalFrame {
    /// Server liveness tick; doubles as a sync trigger.
    Ping,
    /// Reply to our keepalive; no action.
    Pong,
    /// A direct message arrived somewhere; refresh unread state.
    NewDm { sender: Option<UserId> },
    /// A remote offer.
    IncomingCall {
        caller: UserId,
        caller_name: Option<String>,
        channel_name: Option<String>,
        kind: CallKind,
    },
    /// The callee accepted our ring.
    CallAccepted { channel: Option<String> },
    /// The callee declined our ring.
    CallRejected,
    /// The caller cancelled before we accepted.
    CallCancelled,
    /// The remote side hung up (structured signaling path).
    CallEnded,
    /// An admin removed us from the active call.
    KickCall { from: Option<UserId> },
    /// Tombstone directive for an already-rendered message.
    MessageDeleted { msg_id: i64 },
    /// Call wallpaper sync; UI-only, recognized and skipped.
    SyncBg,
    /// Server-reported error detail.
    ServerError { detail: String },
}

#[derive(Debug, Deserialize)]
struct WireGlobalFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    sender_id: Option<i64>,
    #[serde(default)]
    caller_id: Option<i64>,
    #[serde(default)]
    caller_name: Option<String>,
    #[serde(default)]
    channel_name: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    call_type: Option<String>,
    #[serde(default)]
    from: Option<i64>,
    #[serde(default)]
    msg_id: Option<i64>,
    #[serde(default)]
    detail: Option<String>,
}

/// Classify a text frame received on the global channel.
pub fn parse_global_frame(text: &str) -> Result<GlobalFrame, ClientError> {
    let wire: WireGlobalFrame = serde_json::from_str(text)
        .map_err(|e| ClientError::ProtocolViolation(format!("unparseable global frame: {e}")))?;

    match wire.kind.as_str() {
        "ping" => Ok(GlobalFrame::Ping),
        "pong" => Ok(GlobalFrame::Pong),
        "new_dm" => Ok(GlobalFrame::NewDm {
            sender: wire.sender_id.map(UserId),
        }),
        "incoming_call" => {
            let caller = wire
                .caller_id
                .map(UserId)
                .ok_or_else(|| missing("incoming_call", "caller_id"))?;
            let kind = wire
                .call_type
                .as_deref()
                .and_then(CallKind::from_wire)
                .ok_or_else(|| missing("incoming_call", "call_type"))?;
            Ok(GlobalFrame::IncomingCall {
                caller,
                caller_name: wire.caller_name,
                channel_name: wire.channel_name.or(wire.channel),
                kind,
            })
        }
        "call_accepted" => Ok(GlobalFrame::CallAccepted {
            channel: wire.channel.or(wire.channel_name),
        }),
        "call_rejected" => Ok(GlobalFrame::CallRejected),
        "call_cancelled" => Ok(GlobalFrame::CallCancelled),
        "call_ended" => Ok(GlobalFrame::CallEnded),
        "kick_call" => Ok(GlobalFrame::KickCall {
            from: wire.from.map(UserId),
        }),
        "message_deleted" => {
            let msg_id = wire
                .msg_id
                .ok_or_else(|| missing("message_deleted", "msg_id"))?;
            Ok(GlobalFrame::MessageDeleted { msg_id })
        }
        "sync_bg" => Ok(GlobalFrame::SyncBg),
        "error" => Ok(GlobalFrame::ServerError {
            detail: wire.detail.unwrap_or_default(),
        }),
        other => Err(ClientError::ProtocolViolation(format!(
            "unknown global frame type '{other}'"
        ))),
    }
}

/// Inbound frame on a conversation channel.
#[derive(Debug, Clone)]
pub enum ChatFrame {
    Message(ChatEvent),
    Deleted { msg_id: i64 },
    Ping,
    Pong,
    ServerError { detail: String },
}

#[derive(Debug, Deserialize)]
struct WireChatFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    msg_id: Option<i64>,
    #[serde(default)]
    detail: Option<String>,
}

/// Classify a text frame received on a conversation channel.
pub fn parse_chat_frame(
    conversation: ConversationId,
    text: &str,
) -> Result<ChatFrame, ClientError> {
    let wire: WireChatFrame = serde_json::from_str(text)
        .map_err(|e| ClientError::ProtocolViolation(format!("unparseable chat frame: {e}")))?;

    match wire.kind.as_deref() {
        Some("ping") => return Ok(ChatFrame::Ping),
        Some("pong") => return Ok(ChatFrame::Pong),
        Some("error") => {
            return Ok(ChatFrame::ServerError {
                detail: wire.detail.unwrap_or_default(),
            });
        }
        Some("message_deleted") => {
            let msg_id = wire
                .msg_id
                .or(wire.id)
                .ok_or_else(|| missing("message_deleted", "msg_id"))?;
            return Ok(ChatFrame::Deleted { msg_id });
        }
        Some("msg") | None => {}
        Some(other) => {
            return Err(ClientError::ProtocolViolation(format!(
                "unknown chat frame type '{other}'"
            )));
        }
    }

    let id = wire.id.ok_or_else(|| missing("msg", "id"))?;
    let sender = wire
        .user_id
        .map(UserId)
        .ok_or_else(|| missing("msg", "user_id"))?;
    let content = wire.content.ok_or_else(|| missing("msg", "content"))?;
    Ok(ChatFrame::Message(ChatEvent {
        id,
        sender,
        conversation,
        body: EventBody::classify(&content),
        timestamp: wire
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.to_utc()),
    }))
}

fn missing(frame: &str, field: &str) -> ClientError {
    ClientError::ProtocolViolation(format!("{frame} frame missing {field}"))
}

/// Restrict a channel name to the media provider's charset and 60-byte
/// limit. Returns `None` for names that sanitize down to nothing.
pub fn sanitize_channel_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return None;
    }
    let mut out: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || " !#$%&()+-:;<=>.?@[]^_{}|~ ,".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(60);
    if out.is_empty() { None } else { Some(out) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_signal_encoding() {
        assert_eq!(
            call_signal_frame(UserId(9), CallVerb::Accepted, "call_dm_3_9"),
            "CALL_SIGNAL:9:accepted:call_dm_3_9"
        );
        assert_eq!(kick_call_frame(UserId(4)), "KICK_CALL:4");
    }

    #[test]
    fn test_parse_incoming_call() {
        let frame = parse_global_frame(
            r#"{"type":"incoming_call","caller_id":5,"caller_name":"ana","channel_name":"call_dm_2_5","call_type":"dm","target_id":2}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            GlobalFrame::IncomingCall {
                caller: UserId(5),
                caller_name: Some("ana".into()),
                channel_name: Some("call_dm_2_5".into()),
                kind: CallKind::Direct,
            }
        );
    }

    #[test]
    fn test_parse_global_rejects_missing_fields() {
        // incoming_call without a caller is dropped, not a panic
        let err = parse_global_frame(r#"{"type":"incoming_call","call_type":"dm"}"#).unwrap_err();
        assert!(matches!(err, ClientError::ProtocolViolation(_)));

        let err = parse_global_frame(r#"{"type":"message_deleted"}"#).unwrap_err();
        assert!(matches!(err, ClientError::ProtocolViolation(_)));
    }

    #[test]
    fn test_parse_unknown_verb_is_violation() {
        let err = parse_global_frame(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ClientError::ProtocolViolation(_)));
    }

    #[test]
    fn test_parse_chat_message() {
        let conv = ConversationId::Group(4);
        let frame = parse_chat_frame(
            conv,
            r#"{"type":"msg","id":42,"user_id":7,"content":"hi","timestamp":"2025-06-01T10:00:00+00:00"}"#,
        )
        .unwrap();
        match frame {
            ChatFrame::Message(ev) => {
                assert_eq!(ev.id, 42);
                assert_eq!(ev.sender, UserId(7));
                assert_eq!(ev.conversation, conv);
                assert!(ev.timestamp.is_some());
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_chat_deletion_accepts_both_id_fields() {
        let conv = ConversationId::Direct(UserId(1));
        for raw in [
            r#"{"type":"message_deleted","msg_id":10}"#,
            r#"{"type":"message_deleted","id":10}"#,
        ] {
            match parse_chat_frame(conv, raw).unwrap() {
                ChatFrame::Deleted { msg_id } => assert_eq!(msg_id, 10),
                other => panic!("expected deletion, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_sanitize_channel_name() {
        assert_eq!(
            sanitize_channel_name("call_dm_1_2").as_deref(),
            Some("call_dm_1_2")
        );
        assert_eq!(
            sanitize_channel_name("voz/geral").as_deref(),
            Some("voz_geral")
        );
        assert_eq!(sanitize_channel_name("   "), None);
        assert_eq!(sanitize_channel_name("null"), None);
        let long = "x".repeat(80);
        assert_eq!(sanitize_channel_name(&long).unwrap().len(), 60);
    }
}
