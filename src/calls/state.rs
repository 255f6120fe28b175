//! Call session state machine.

use crate::types::UserId;
use crate::types::call::{CallKind, CallRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// Lifecycle phase of a call attempt. `Idle` only appears in notifications;
/// a stored session is always in one of the live phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    /// We rang someone and are waiting for an answer.
    RingingOut,
    /// A remote offer is ringing locally.
    RingingIn,
    /// Accepted on either side; establishing the media session.
    Connecting,
    /// At least one remote participant published media.
    Active,
}

/// Transitions applied to a live session. Teardown paths (cancel, decline,
/// reject, kick, remote hang-up) remove the session instead of transitioning
/// it, so they are always valid regardless of phase.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// The remote side accepted our ring.
    RemoteAccepted,
    /// The local user accepted an incoming ring.
    LocalAccepted,
    /// The media transport reported the first remote participant.
    MediaConnected,
}

/// The single mutable call record. At most one exists per client; it is
/// exclusively owned by the [`super::CallManager`].
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub role: CallRole,
    pub kind: CallKind,
    /// Peer user id for direct calls, group/channel entity id otherwise.
    pub target_id: i64,
    /// Deterministic signaling/media channel name (§ both sides compute the
    /// same name independently for two-party calls).
    pub channel_name: String,
    pub phase: CallPhase,
    pub created_at: DateTime<Utc>,
    /// A remote participant was seen at least once. Distinguishes "call
    /// ended" from "never connected" on teardown.
    pub ever_connected: bool,
    /// The media transport join completed; `leave()` must run exactly once.
    pub media_joined: bool,
    /// Remote participants currently in the media session.
    pub remotes: HashSet<UserId>,
}

impl CallSession {
    pub fn new_outgoing(kind: CallKind, target_id: i64, channel_name: String) -> Self {
        Self {
            role: CallRole::Caller,
            kind,
            target_id,
            channel_name,
            phase: CallPhase::RingingOut,
            created_at: Utc::now(),
            ever_connected: false,
            media_joined: false,
            remotes: HashSet::new(),
        }
    }

    pub fn new_incoming(kind: CallKind, caller: UserId, channel_name: String) -> Self {
        Self {
            role: CallRole::Callee,
            kind,
            target_id: caller.0,
            channel_name,
            phase: CallPhase::RingingIn,
            created_at: Utc::now(),
            ever_connected: false,
            media_joined: false,
            remotes: HashSet::new(),
        }
    }

    /// Voice channels have no ring phase; the session starts connecting.
    pub fn new_direct_join(kind: CallKind, target_id: i64, channel_name: String) -> Self {
        Self {
            role: CallRole::Caller,
            kind,
            target_id,
            channel_name,
            phase: CallPhase::Connecting,
            created_at: Utc::now(),
            ever_connected: false,
            media_joined: false,
            remotes: HashSet::new(),
        }
    }

    /// Apply a state transition. Returns error if the transition is invalid
    /// for the current phase; the session is left untouched in that case.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<CallPhase, InvalidTransition> {
        let next = match (self.phase, transition) {
            (CallPhase::RingingOut, CallTransition::RemoteAccepted) => CallPhase::Connecting,
            (CallPhase::RingingIn, CallTransition::LocalAccepted) => CallPhase::Connecting,
            (CallPhase::Connecting, CallTransition::MediaConnected) => CallPhase::Active,
            (current, attempted) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{attempted:?}"),
                });
            }
        };
        self.phase = next;
        Ok(next)
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> CallSession {
        CallSession::new_outgoing(CallKind::Direct, 9, "call_dm_2_9".to_string())
    }

    fn incoming() -> CallSession {
        CallSession::new_incoming(CallKind::Direct, UserId(2), "call_dm_2_9".to_string())
    }

    /// Flow: RingingOut → Connecting → Active
    #[test]
    fn test_outgoing_flow() {
        let mut session = outgoing();
        assert_eq!(session.phase, CallPhase::RingingOut);
        assert_eq!(session.role, CallRole::Caller);

        session.apply_transition(CallTransition::RemoteAccepted).unwrap();
        assert_eq!(session.phase, CallPhase::Connecting);

        session.apply_transition(CallTransition::MediaConnected).unwrap();
        assert_eq!(session.phase, CallPhase::Active);
    }

    /// Flow: RingingIn → Connecting → Active
    #[test]
    fn test_incoming_flow() {
        let mut session = incoming();
        assert_eq!(session.phase, CallPhase::RingingIn);
        assert_eq!(session.role, CallRole::Callee);

        session.apply_transition(CallTransition::LocalAccepted).unwrap();
        assert_eq!(session.phase, CallPhase::Connecting);

        session.apply_transition(CallTransition::MediaConnected).unwrap();
        assert_eq!(session.phase, CallPhase::Active);
    }

    #[test]
    fn test_voice_channel_skips_ring() {
        let session = CallSession::new_direct_join(CallKind::ChannelVoice, 4, "call_channel_4".into());
        assert_eq!(session.phase, CallPhase::Connecting);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut session = outgoing();

        // Can't accept our own outgoing ring.
        assert!(session.apply_transition(CallTransition::LocalAccepted).is_err());
        // Media can't connect before anyone accepted.
        assert!(session.apply_transition(CallTransition::MediaConnected).is_err());
        // Failed transitions leave the phase untouched.
        assert_eq!(session.phase, CallPhase::RingingOut);

        let mut session = incoming();
        assert!(session.apply_transition(CallTransition::RemoteAccepted).is_err());
        assert_eq!(session.phase, CallPhase::RingingIn);
    }
}
