pub mod call;
pub mod events;
pub mod message;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric user identity assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for UserId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// A logical conversation: a direct chat with a peer, a private group, or a
/// community channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationId {
    Direct(UserId),
    Group(i64),
    Community(i64),
}

impl ConversationId {
    /// Server-side channel key for this conversation, as opened by `uid`.
    ///
    /// Direct chats use a canonical ordering of the two participant ids so
    /// both sides converge on the same key regardless of who opens it.
    pub fn channel_key(&self, me: UserId) -> String {
        match self {
            ConversationId::Direct(peer) => {
                let low = me.0.min(peer.0);
                let high = me.0.max(peer.0);
                format!("dm_{low}_{high}")
            }
            ConversationId::Group(id) => format!("group_{id}"),
            ConversationId::Community(id) => format!("comm_{id}"),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Direct(peer) => write!(f, "dm:{peer}"),
            ConversationId::Group(id) => write!(f, "group:{id}"),
            ConversationId::Community(id) => write!(f, "comm:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_channel_key_is_symmetric() {
        let a = UserId(7);
        let b = UserId(3);
        let from_a = ConversationId::Direct(b).channel_key(a);
        let from_b = ConversationId::Direct(a).channel_key(b);
        assert_eq!(from_a, from_b);
        assert_eq!(from_a, "dm_3_7");
    }

    #[test]
    fn test_group_and_community_keys() {
        assert_eq!(ConversationId::Group(12).channel_key(UserId(1)), "group_12");
        assert_eq!(
            ConversationId::Community(9).channel_key(UserId(1)),
            "comm_9"
        );
    }
}
