use super::UserId;
use serde::Serialize;

/// What kind of call this is. Community voice channels have no ring phase;
/// participants join the room directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallKind {
    Direct,
    Group,
    ChannelVoice,
}

impl CallKind {
    /// Wire tag used in `incoming_call` frames.
    pub fn as_wire(&self) -> &'static str {
        match self {
            CallKind::Direct => "dm",
            CallKind::Group => "group",
            CallKind::ChannelVoice => "channel",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "dm" | "1v1" => Some(CallKind::Direct),
            "group" => Some(CallKind::Group),
            "channel" | "voice" => Some(CallKind::ChannelVoice),
            _ => None,
        }
    }
}

/// Which side of the call we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Why a call session returned to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallEndReason {
    /// Local user hung up (or cancelled before the call connected).
    LocalHangup,
    /// Local user declined an incoming ring.
    LocalDeclined,
    /// The remote side rejected our ring.
    RemoteRejected,
    /// The caller cancelled before we accepted.
    RemoteCancelled,
    /// Every remote participant left an established call.
    RemoteLeft,
    /// An admin removed us from the call.
    Kicked,
    /// The media transport could not be established (e.g. microphone denied).
    MediaFailed,
    /// The ring or accept signal could not be delivered.
    SignalingFailed,
    /// Nobody answered before the ring timer expired.
    RingTimeout,
}

/// Signaling channel name for a call, derived deterministically so both
/// parties compute the same name independently.
pub fn call_channel_name(me: UserId, kind: CallKind, target_id: i64) -> String {
    match kind {
        CallKind::Direct => {
            let low = me.0.min(target_id);
            let high = me.0.max(target_id);
            format!("call_dm_{low}_{high}")
        }
        CallKind::Group => format!("call_group_{target_id}"),
        CallKind::ChannelVoice => format!("call_channel_{target_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_call_channel_is_symmetric() {
        let a = UserId(42);
        let b = UserId(7);
        assert_eq!(
            call_channel_name(a, CallKind::Direct, b.0),
            call_channel_name(b, CallKind::Direct, a.0)
        );
        assert_eq!(call_channel_name(a, CallKind::Direct, b.0), "call_dm_7_42");
    }

    #[test]
    fn test_group_and_channel_names() {
        assert_eq!(
            call_channel_name(UserId(1), CallKind::Group, 5),
            "call_group_5"
        );
        assert_eq!(
            call_channel_name(UserId(1), CallKind::ChannelVoice, 8),
            "call_channel_8"
        );
    }

    #[test]
    fn test_wire_tags_round_trip() {
        for kind in [CallKind::Direct, CallKind::Group, CallKind::ChannelVoice] {
            assert_eq!(CallKind::from_wire(kind.as_wire()), Some(kind));
        }
        assert_eq!(CallKind::from_wire("1v1"), Some(CallKind::Direct));
        assert_eq!(CallKind::from_wire("voice"), Some(CallKind::ChannelVoice));
        assert_eq!(CallKind::from_wire("smoke-signal"), None);
    }
}
