//! Call manager: orchestrates the lifecycle of at most one call attempt.
//!
//! Every state transition runs under the session mutex with no suspension
//! point inside, so transitions never interleave partially even though they
//! are triggered by independent sources (user actions, global-channel
//! frames, media-transport callbacks). Suspensions (ring request,
//! credential fetch, media join) happen outside the lock; a generation
//! counter bumped on every teardown lets resumed futures detect that the
//! session they were working for is gone and discard the late result.

use super::error::CallError;
use super::state::{CallPhase, CallSession, CallTransition};
use crate::api::Api;
use crate::error::ClientError;
use crate::media::{MediaError, MediaTransport};
use crate::protocol::{CallVerb, call_signal_frame, kick_call_frame, sanitize_channel_name};
use crate::types::call::{CallEndReason, CallKind, CallRole, call_channel_name};
use crate::types::events::{CallSessionUpdate, EventBus, IncomingCall};
use crate::types::UserId;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long an unanswered outbound ring keeps the line busy.
const RING_TIMEOUT: Duration = Duration::from_secs(45);

/// Outbound signaling seam: delivers a text frame on the global channel.
/// The client wires this to the channel manager; tests use a recorder.
#[async_trait]
pub trait SignalSender: Send + Sync {
    async fn send_signal(&self, frame: String) -> Result<(), ClientError>;
}

pub struct CallManager {
    me: UserId,
    api: Arc<Api>,
    media: Arc<dyn MediaTransport>,
    signals: Arc<dyn SignalSender>,
    bus: Arc<EventBus>,
    /// The single call record; `None` is the idle state.
    session: Mutex<Option<CallSession>>,
    /// Bumped on every teardown; suspended work compares before applying
    /// results.
    generation: AtomicU64,
}

impl CallManager {
    pub fn new(
        me: UserId,
        api: Arc<Api>,
        media: Arc<dyn MediaTransport>,
        signals: Arc<dyn SignalSender>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            api,
            media,
            signals,
            bus,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> CallPhase {
        self.lock_session()
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(CallPhase::Idle)
    }

    /// Snapshot of the live session, if any.
    pub fn session_snapshot(&self) -> Option<CallSession> {
        self.lock_session().clone()
    }

    /// Start an outbound call. Rejected locally, before any signaling is
    /// sent, if a session already exists.
    pub async fn initiate(self: &Arc<Self>, kind: CallKind, target_id: i64) -> Result<(), CallError> {
        let raw = call_channel_name(self.me, kind, target_id);
        let channel = sanitize_channel_name(&raw).ok_or(CallError::BadChannelName(raw))?;

        let generation = {
            let mut session = self.lock_session();
            if session.is_some() {
                return Err(CallError::Busy);
            }
            let new = if kind == CallKind::ChannelVoice {
                CallSession::new_direct_join(kind, target_id, channel.clone())
            } else {
                CallSession::new_outgoing(kind, target_id, channel.clone())
            };
            let phase = new.phase;
            *session = Some(new);
            self.publish(phase, None);
            self.generation.load(Ordering::SeqCst)
        };

        if kind == CallKind::ChannelVoice {
            // No callee to ring; join the room directly.
            info!(target: "Calls", "Joining voice channel '{channel}'");
            return self.join_media(generation, channel).await;
        }

        info!(target: "Calls", "Ringing {kind:?} target {target_id} on '{channel}'");
        let ring = match kind {
            CallKind::Direct => {
                self.api
                    .ring_direct(self.me, UserId(target_id), &channel)
                    .await
            }
            CallKind::Group => self.api.ring_group(self.me, target_id, &channel).await,
            CallKind::ChannelVoice => unreachable!("voice channels do not ring"),
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            // Cancelled while the ring request was in flight.
            debug!(target: "Calls", "Ring completed for an abandoned session, discarding");
            return Ok(());
        }
        if let Err(e) = ring {
            warn!(target: "Calls", "Ring request failed: {e}");
            self.end_with(CallEndReason::SignalingFailed).await;
            return Err(e.into());
        }

        // Give up the line if nobody answers.
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RING_TIMEOUT).await;
            let timed_out = {
                let mut session = manager.lock_session();
                if manager.generation.load(Ordering::SeqCst) == generation
                    && session.as_ref().is_some_and(|s| s.phase == CallPhase::RingingOut)
                {
                    manager.generation.fetch_add(1, Ordering::SeqCst);
                    session.take()
                } else {
                    None
                }
            };
            if let Some(removed) = timed_out {
                info!(target: "Calls", "Ring on '{}' timed out", removed.channel_name);
                manager.publish(CallPhase::Idle, Some(CallEndReason::RingTimeout));
            }
        });
        Ok(())
    }

    /// Accept the incoming ring: signal the caller, then join media.
    pub async fn accept(&self) -> Result<(), CallError> {
        let (generation, caller, channel) = {
            let mut session = self.lock_session();
            let live = session
                .as_mut()
                .ok_or(CallError::NoSession("nothing is ringing"))?;
            live.apply_transition(CallTransition::LocalAccepted)?;
            self.publish(CallPhase::Connecting, None);
            (
                self.generation.load(Ordering::SeqCst),
                UserId(live.target_id),
                live.channel_name.clone(),
            )
        };

        let frame = call_signal_frame(caller, CallVerb::Accepted, &channel);
        if let Err(e) = self.signals.send_signal(frame).await {
            warn!(target: "Calls", "Accept signal failed: {e}");
            if self.generation.load(Ordering::SeqCst) == generation {
                self.end_with(CallEndReason::SignalingFailed).await;
            }
            return Err(e.into());
        }

        self.join_media(generation, channel).await
    }

    /// Decline the incoming ring.
    pub async fn decline(&self) -> Result<(), CallError> {
        let removed = {
            let mut session = self.lock_session();
            match session.as_ref().map(|s| s.phase) {
                Some(CallPhase::RingingIn) => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    session.take()
                }
                _ => return Err(CallError::NoSession("nothing is ringing")),
            }
        };
        if let Some(removed) = removed {
            let frame = call_signal_frame(
                UserId(removed.target_id),
                CallVerb::Rejected,
                &removed.channel_name,
            );
            if let Err(e) = self.signals.send_signal(frame).await {
                warn!(target: "Calls", "Reject signal failed: {e}");
            }
            self.publish(CallPhase::Idle, Some(CallEndReason::LocalDeclined));
        }
        Ok(())
    }

    /// Hang up / cancel from any phase, including mid-suspension (the ring
    /// request or microphone grant may still be in flight). Idempotent: a
    /// second call with no session is a no-op.
    pub async fn hang_up(&self) -> Result<(), CallError> {
        let Some(removed) = self.take_session() else {
            return Ok(());
        };

        if removed.media_joined {
            self.media.leave().await;
        }

        // A caller abandoning a ring that never connected tells the callee
        // to stop ringing.
        let cancels_ring = removed.role == CallRole::Caller
            && !removed.ever_connected
            && removed.kind != CallKind::ChannelVoice;
        if cancels_ring {
            let frame = call_signal_frame(
                UserId(removed.target_id),
                CallVerb::Cancelled,
                &removed.channel_name,
            );
            if let Err(e) = self.signals.send_signal(frame).await {
                warn!(target: "Calls", "Cancel signal failed: {e}");
            }
        }

        self.publish(CallPhase::Idle, Some(CallEndReason::LocalHangup));
        Ok(())
    }

    /// Admin action: remove a participant from the active group/channel
    /// call.
    pub async fn kick_participant(&self, target: UserId) -> Result<(), CallError> {
        self.signals
            .send_signal(kick_call_frame(target))
            .await
            .map_err(CallError::from)
    }

    /// A remote offer arrived on the global channel. Silently ignored unless
    /// idle: one line, no glare protocol.
    pub fn handle_incoming_offer(
        &self,
        caller: UserId,
        caller_name: Option<String>,
        kind: CallKind,
        channel_name: Option<String>,
    ) {
        let channel = channel_name
            .as_deref()
            .and_then(sanitize_channel_name)
            .unwrap_or_else(|| call_channel_name(self.me, kind, caller.0));

        let mut session = self.lock_session();
        if session.is_some() {
            debug!(target: "Calls", "Busy; ignoring offer from {caller}");
            return;
        }
        *session = Some(CallSession::new_incoming(kind, caller, channel.clone()));
        self.publish(CallPhase::RingingIn, None);
        let _ = self.bus.incoming_call.send(Arc::new(IncomingCall {
            caller,
            caller_name,
            kind,
            channel_name: channel,
        }));
    }

    /// The callee accepted our ring; join media on the agreed channel.
    pub async fn handle_remote_accepted(&self, channel: Option<String>) {
        let (generation, channel) = {
            let mut session = self.lock_session();
            let Some(live) = session.as_mut() else {
                debug!(target: "Calls", "Accept signal with no session, ignoring");
                return;
            };
            if live.apply_transition(CallTransition::RemoteAccepted).is_err() {
                debug!(target: "Calls", "Accept signal in phase {:?}, ignoring", live.phase);
                return;
            }
            if let Some(name) = channel.as_deref().and_then(sanitize_channel_name) {
                live.channel_name = name;
            }
            self.publish(CallPhase::Connecting, None);
            (
                self.generation.load(Ordering::SeqCst),
                live.channel_name.clone(),
            )
        };

        if let Err(e) = self.join_media(generation, channel).await {
            warn!(target: "Calls", "Media join after accept failed: {e}");
        }
    }

    /// The callee declined our ring.
    pub async fn handle_remote_rejected(&self) {
        let removed = {
            let mut session = self.lock_session();
            match session.as_ref().map(|s| s.phase) {
                Some(CallPhase::RingingOut) => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    session.take()
                }
                _ => {
                    debug!(target: "Calls", "Reject signal without outbound ring, ignoring");
                    None
                }
            }
        };
        if removed.is_some() {
            self.publish(CallPhase::Idle, Some(CallEndReason::RemoteRejected));
        }
    }

    /// The caller gave up before we answered.
    pub async fn handle_remote_cancelled(&self) {
        let removed = {
            let mut session = self.lock_session();
            match session.as_ref().map(|s| s.phase) {
                Some(CallPhase::RingingIn) => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    session.take()
                }
                _ => {
                    debug!(target: "Calls", "Cancel signal without inbound ring, ignoring");
                    None
                }
            }
        };
        if removed.is_some() {
            self.publish(CallPhase::Idle, Some(CallEndReason::RemoteCancelled));
        }
    }

    /// The remote side hung up through the structured signaling path.
    pub async fn handle_call_ended(&self) {
        if let Some(removed) = self.take_session() {
            if removed.media_joined {
                self.media.leave().await;
            }
            let reason = if removed.phase == CallPhase::RingingIn {
                CallEndReason::RemoteCancelled
            } else {
                CallEndReason::RemoteLeft
            };
            self.publish(CallPhase::Idle, Some(reason));
        }
    }

    /// Forced removal by an admin: unconditional teardown from any phase.
    pub async fn handle_kick(&self) {
        if let Some(removed) = self.take_session() {
            info!(target: "Calls", "Kicked from call '{}'", removed.channel_name);
            if removed.media_joined {
                self.media.leave().await;
            }
            self.publish(CallPhase::Idle, Some(CallEndReason::Kicked));
        }
    }

    /// Media transport callback: a remote participant published.
    pub fn handle_remote_joined(&self, user: UserId) {
        let mut session = self.lock_session();
        let Some(live) = session.as_mut() else {
            debug!(target: "Calls", "Remote joined with no session, ignoring");
            return;
        };
        live.remotes.insert(user);
        live.ever_connected = true;
        if live.phase == CallPhase::Connecting {
            // First remote publication is what makes the call active.
            if live.apply_transition(CallTransition::MediaConnected).is_ok() {
                self.publish(CallPhase::Active, None);
            }
        }
    }

    /// Media transport callback: a remote participant left. When the last
    /// one leaves an established call the session ends (call ended, not
    /// call failed).
    pub async fn handle_remote_left(&self, user: UserId) {
        let removed = {
            let mut session = self.lock_session();
            let Some(live) = session.as_mut() else {
                return;
            };
            live.remotes.remove(&user);
            if live.remotes.is_empty()
                && live.phase == CallPhase::Active
                && live.ever_connected
            {
                self.generation.fetch_add(1, Ordering::SeqCst);
                session.take()
            } else {
                None
            }
        };

        if let Some(removed) = removed {
            info!(target: "Calls", "All remote participants left '{}'", removed.channel_name);
            if removed.media_joined {
                self.media.leave().await;
            }
            self.publish(CallPhase::Idle, Some(CallEndReason::RemoteLeft));
        }
    }

    /// Fetch credentials and join the media session. Tolerates the session
    /// being torn down at every suspension point.
    async fn join_media(&self, generation: u64, channel: String) -> Result<(), CallError> {
        let creds = match self.api.media_credentials(&channel, self.me).await {
            Ok(creds) => creds,
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    warn!(target: "Calls", "Media credential fetch failed: {e}");
                    self.end_with(CallEndReason::MediaFailed).await;
                }
                return Err(e.into());
            }
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "Calls", "Session gone before media join, discarding");
            return Ok(());
        }

        match self
            .media
            .join(&creds.app_id, &channel, &creds.token, self.me)
            .await
        {
            Ok(()) => {
                let orphaned = {
                    let mut session = self.lock_session();
                    if self.generation.load(Ordering::SeqCst) != generation {
                        true
                    } else if let Some(live) = session.as_mut() {
                        live.media_joined = true;
                        false
                    } else {
                        true
                    }
                };
                if orphaned {
                    // Cancelled while the join was in flight; release the
                    // session we just established.
                    self.media.leave().await;
                }
                Ok(())
            }
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    match &e {
                        MediaError::PermissionDenied(detail) => {
                            warn!(target: "Calls", "Media permission denied: {detail}")
                        }
                        MediaError::Transport(detail) => {
                            warn!(target: "Calls", "Media join failed: {detail}")
                        }
                    }
                    self.end_with(CallEndReason::MediaFailed).await;
                }
                Err(e.into())
            }
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CallSession>> {
        self.session.lock().expect("call session lock poisoned")
    }

    /// Remove the session and invalidate suspended work.
    fn take_session(&self) -> Option<CallSession> {
        let mut session = self.lock_session();
        if session.is_some() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        session.take()
    }

    async fn end_with(&self, reason: CallEndReason) {
        if let Some(removed) = self.take_session() {
            if removed.media_joined {
                self.media.leave().await;
            }
            self.publish(CallPhase::Idle, Some(reason));
        }
    }

    fn publish(&self, phase: CallPhase, reason: Option<CallEndReason>) {
        let _ = self
            .bus
            .call_state
            .send(Arc::new(CallSessionUpdate { phase, reason }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpClient, HttpRequest, HttpResponse};
    use crate::types::events::EventBus;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Default)]
    struct FakeMedia {
        joins: AtomicU32,
        leaves: AtomicU32,
        deny_permission: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl MediaTransport for FakeMedia {
        async fn join(
            &self,
            _app_id: &str,
            _channel: &str,
            _token: &str,
            _identity: UserId,
        ) -> Result<(), MediaError> {
            if self.deny_permission.load(Ordering::SeqCst) {
                return Err(MediaError::PermissionDenied("microphone".into()));
            }
            self.joins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn leave(&self) {
            self.leaves.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingSignals {
        frames: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SignalSender for RecordingSignals {
        async fn send_signal(&self, frame: String) -> Result<(), ClientError> {
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FakeServer {
        requests: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for FakeServer {
        async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
            self.requests.lock().unwrap().push(request.url.clone());
            let body = if request.url.contains("/agora/token") {
                r#"{"app_id":"app","token":"media-token"}"#
            } else {
                r#"{"status":"ok"}"#
            };
            Ok(HttpResponse {
                status_code: 200,
                body: body.as_bytes().to_vec(),
            })
        }
    }

    struct Harness {
        manager: Arc<CallManager>,
        media: Arc<FakeMedia>,
        signals: Arc<RecordingSignals>,
        server: Arc<FakeServer>,
    }

    fn harness(me: i64) -> Harness {
        let server = Arc::new(FakeServer::default());
        let api = Arc::new(Api::new(server.clone(), "https://test", "tok".to_string()));
        let media = Arc::new(FakeMedia::default());
        let signals = Arc::new(RecordingSignals::default());
        let manager = CallManager::new(
            UserId(me),
            api,
            media.clone(),
            signals.clone(),
            Arc::new(EventBus::new()),
        );
        Harness {
            manager,
            media,
            signals,
            server,
        }
    }

    #[tokio::test]
    async fn test_initiate_rings_and_waits() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();

        assert_eq!(h.manager.phase(), CallPhase::RingingOut);
        let session = h.manager.session_snapshot().unwrap();
        assert_eq!(session.channel_name, "call_dm_2_9");

        let requests = h.server.requests.lock().unwrap();
        assert!(requests.iter().any(|u| u.contains("/call/ring/dm")));
        // No media join until the remote side accepts.
        assert_eq!(h.media.joins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_initiate_rejected_before_signaling() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        let before = h.server.requests.lock().unwrap().len();

        let err = h.manager.initiate(CallKind::Direct, 5).await.unwrap_err();
        assert!(matches!(err, CallError::Busy));
        // The rejected attempt reached neither the ring API nor the session.
        assert_eq!(h.server.requests.lock().unwrap().len(), before);
        assert_eq!(h.manager.session_snapshot().unwrap().target_id, 9);
    }

    #[tokio::test]
    async fn test_offer_while_busy_is_ignored() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();

        h.manager
            .handle_incoming_offer(UserId(5), None, CallKind::Direct, None);

        // Single-line-busy: the existing session is untouched.
        let session = h.manager.session_snapshot().unwrap();
        assert_eq!(session.phase, CallPhase::RingingOut);
        assert_eq!(session.target_id, 9);
    }

    #[tokio::test]
    async fn test_callee_accept_signals_and_joins() {
        let h = harness(9);
        h.manager.handle_incoming_offer(
            UserId(2),
            Some("ana".into()),
            CallKind::Direct,
            Some("call_dm_2_9".into()),
        );
        assert_eq!(h.manager.phase(), CallPhase::RingingIn);

        h.manager.accept().await.unwrap();
        assert_eq!(h.manager.phase(), CallPhase::Connecting);
        assert_eq!(h.media.joins.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.signals.frames.lock().unwrap().as_slice(),
            ["CALL_SIGNAL:2:accepted:call_dm_2_9"]
        );

        h.manager.handle_remote_joined(UserId(2));
        assert_eq!(h.manager.phase(), CallPhase::Active);
    }

    #[tokio::test]
    async fn test_caller_accepted_joins_same_channel() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();

        h.manager
            .handle_remote_accepted(Some("call_dm_2_9".into()))
            .await;
        assert_eq!(h.manager.phase(), CallPhase::Connecting);
        assert_eq!(h.media.joins.load(Ordering::SeqCst), 1);

        h.manager.handle_remote_joined(UserId(9));
        assert_eq!(h.manager.phase(), CallPhase::Active);
        assert!(h.manager.session_snapshot().unwrap().ever_connected);
    }

    #[tokio::test]
    async fn test_accept_signal_without_ring_is_ignored() {
        let h = harness(2);
        h.manager.handle_remote_accepted(None).await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(h.media.joins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decline_signals_rejected() {
        let h = harness(9);
        h.manager
            .handle_incoming_offer(UserId(2), None, CallKind::Direct, None);
        h.manager.decline().await.unwrap();

        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(
            h.signals.frames.lock().unwrap().as_slice(),
            ["CALL_SIGNAL:2:rejected:call_dm_2_9"]
        );
    }

    #[tokio::test]
    async fn test_cancel_during_connecting_leaves_exactly_once() {
        let h = harness(9);
        h.manager
            .handle_incoming_offer(UserId(2), None, CallKind::Direct, None);
        h.manager.accept().await.unwrap();
        assert_eq!(h.manager.phase(), CallPhase::Connecting);

        h.manager.hang_up().await.unwrap();
        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(h.media.leaves.load(Ordering::SeqCst), 1);

        // Idempotent: a second hang-up does not leave again.
        h.manager.hang_up().await.unwrap();
        assert_eq!(h.media.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancel_before_connect_sends_cancelled() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        h.manager.hang_up().await.unwrap();

        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(
            h.signals.frames.lock().unwrap().as_slice(),
            ["CALL_SIGNAL:9:cancelled:call_dm_2_9"]
        );
    }

    #[tokio::test]
    async fn test_remote_reject_ends_outbound_ring() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        h.manager.handle_remote_rejected().await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_remote_cancel_stops_inbound_ring() {
        let h = harness(9);
        h.manager
            .handle_incoming_offer(UserId(2), None, CallKind::Direct, None);
        h.manager.handle_remote_cancelled().await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied_is_fatal_to_the_attempt() {
        let h = harness(9);
        h.media.deny_permission.store(true, Ordering::SeqCst);
        h.manager
            .handle_incoming_offer(UserId(2), None, CallKind::Direct, None);

        let err = h.manager.accept().await.unwrap_err();
        assert!(matches!(err, CallError::Media(MediaError::PermissionDenied(_))));
        assert_eq!(h.manager.phase(), CallPhase::Idle);
        // Nothing joined, so nothing to leave.
        assert_eq!(h.media.leaves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_kick_tears_down_from_active() {
        let h = harness(2);
        h.manager.initiate(CallKind::Group, 4).await.unwrap();
        h.manager.handle_remote_accepted(None).await;
        h.manager.handle_remote_joined(UserId(5));
        assert_eq!(h.manager.phase(), CallPhase::Active);

        h.manager.handle_kick().await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(h.media.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_remote_leaving_ends_call() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        h.manager.handle_remote_accepted(None).await;
        h.manager.handle_remote_joined(UserId(9));
        assert_eq!(h.manager.phase(), CallPhase::Active);

        h.manager.handle_remote_left(UserId(9)).await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
        assert_eq!(h.media.leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_ring_times_out() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        assert_eq!(h.manager.phase(), CallPhase::RingingOut);

        tokio::time::sleep(RING_TIMEOUT + Duration::from_secs(1)).await;
        assert_eq!(h.manager.phase(), CallPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ring_timer_is_inert_after_accept() {
        let h = harness(2);
        h.manager.initiate(CallKind::Direct, 9).await.unwrap();
        h.manager.handle_remote_accepted(None).await;
        h.manager.handle_remote_joined(UserId(9));

        tokio::time::sleep(RING_TIMEOUT + Duration::from_secs(5)).await;
        assert_eq!(h.manager.phase(), CallPhase::Active);
    }

    #[tokio::test]
    async fn test_voice_channel_joins_without_ring() {
        let h = harness(2);
        h.manager.initiate(CallKind::ChannelVoice, 8).await.unwrap();

        assert_eq!(h.manager.phase(), CallPhase::Connecting);
        assert_eq!(h.media.joins.load(Ordering::SeqCst), 1);
        let requests = h.server.requests.lock().unwrap();
        assert!(!requests.iter().any(|u| u.contains("/call/ring")));
    }
}
