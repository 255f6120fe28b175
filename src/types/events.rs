use super::UserId;
use super::call::{CallEndReason, CallKind};
use super::message::ChatEvent;
use crate::types::ConversationId;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A channel connection was established (or re-established).
#[derive(Debug, Clone)]
pub struct ChannelConnected {
    pub channel: String,
}

/// A channel connection dropped. `will_retry` is false for intentional
/// teardown and for stale channels that are no longer reconnected.
#[derive(Debug, Clone)]
pub struct ChannelDisconnected {
    pub channel: String,
    pub will_retry: bool,
}

/// Ordered per-conversation fan-out: consumers observe materializations and
/// tombstones in exactly the order they were applied to the local log.
#[derive(Debug, Clone)]
pub enum ConversationUpdate {
    Message(ChatEvent),
    Deletion {
        conversation: ConversationId,
        event_id: i64,
    },
}

/// A remote offer is ringing locally.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub caller: UserId,
    pub caller_name: Option<String>,
    pub kind: CallKind,
    pub channel_name: String,
}

/// The call session moved to a new lifecycle phase.
#[derive(Debug, Clone)]
pub struct CallSessionUpdate {
    pub phase: crate::calls::state::CallPhase,
    pub reason: Option<CallEndReason>,
}

/// Wholesale replacement of the online-user set.
#[derive(Debug, Clone)]
pub struct PresenceSnapshot {
    pub online: std::collections::HashSet<UserId>,
}

/// Wholesale replacement of unread counts.
#[derive(Debug, Clone)]
pub struct UnreadSnapshot {
    pub counts: crate::presence::UnreadCounts,
}

/// The server rejected our credential. Reconnection is halted until the
/// embedder supplies a fresh token.
#[derive(Debug, Clone)]
pub struct AuthExpired;

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection events
    (connected, Arc<ChannelConnected>),
    (disconnected, Arc<ChannelDisconnected>),
    (auth_expired, Arc<AuthExpired>),

    // Conversation events (ordered per conversation)
    (conversation, Arc<ConversationUpdate>),

    // Call events
    (incoming_call, Arc<IncomingCall>),
    (call_state, Arc<CallSessionUpdate>),

    // Presence / unread aggregation
    (presence, Arc<PresenceSnapshot>),
    (unread, Arc<UnreadSnapshot>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
