//! Channel connection manager.
//!
//! One logical channel (global, conversation chat, call signaling) maps to
//! at most one live WebSocket at a time. Each open channel gets a supervisor
//! task that owns its whole lifecycle: connect, deliver frames, and on
//! unexpected closure retry after a fixed delay — re-running the catch-up
//! fetch before live delivery resumes so reconnect gaps are closed. Tearing
//! a channel down cancels any pending backoff timer, so no timers leak.

use crate::api::Api;
use crate::config::{ClientConfig, GLOBAL_CHANNEL};
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::socket::{ChannelSocket, CloseReason, SocketError, SocketEvent};
use crate::types::ConversationId;
use crate::types::events::{AuthExpired, ChannelConnected, ChannelDisconnected, EventBus};
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;

/// Reconnect class of a channel. Delays are the empirically tuned values of
/// the original deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Global,
    DirectChat,
    GroupChat,
    CommunityChat,
}

impl ChannelClass {
    pub const fn retry_delay(&self) -> Duration {
        match self {
            ChannelClass::Global => Duration::from_secs(4),
            ChannelClass::DirectChat | ChannelClass::GroupChat => Duration::from_secs(2),
            ChannelClass::CommunityChat => Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// What to open: the channel key plus enough context for the supervisor to
/// run catch-up and decide whether a dropped channel is still worth
/// reconnecting.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub key: String,
    pub class: ChannelClass,
    pub conversation: Option<ConversationId>,
}

impl ChannelSpec {
    pub fn global() -> Self {
        Self {
            key: GLOBAL_CHANNEL.to_string(),
            class: ChannelClass::Global,
            conversation: None,
        }
    }

    pub fn conversation(me: crate::types::UserId, conversation: ConversationId) -> Self {
        let class = match conversation {
            ConversationId::Direct(_) => ChannelClass::DirectChat,
            ConversationId::Group(_) => ChannelClass::GroupChat,
            ConversationId::Community(_) => ChannelClass::CommunityChat,
        };
        Self {
            key: conversation.channel_key(me),
            class,
            conversation: Some(conversation),
        }
    }
}

/// A raw inbound text frame, tagged with its source channel.
#[derive(Debug)]
pub struct InboundFrame {
    pub channel: String,
    pub conversation: Option<ConversationId>,
    pub text: String,
}

struct ChannelEntry {
    epoch: u64,
    socket: Arc<RwLock<Option<Arc<ChannelSocket>>>>,
    state: Arc<std::sync::RwLock<ChannelState>>,
    shutdown: Arc<Notify>,
    attempts: Arc<AtomicU32>,
}

pub struct ChannelManager {
    cfg: ClientConfig,
    api: Arc<Api>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<EventBus>,
    frames_tx: mpsc::Sender<InboundFrame>,
    channels: DashMap<String, ChannelEntry>,
    halted: AtomicBool,
    next_epoch: AtomicU64,
}

impl ChannelManager {
    pub fn new(
        cfg: ClientConfig,
        api: Arc<Api>,
        dispatcher: Arc<Dispatcher>,
        bus: Arc<EventBus>,
        frames_tx: mpsc::Sender<InboundFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            api,
            dispatcher,
            bus,
            frames_tx,
            channels: DashMap::new(),
            halted: AtomicBool::new(false),
            next_epoch: AtomicU64::new(0),
        })
    }

    /// Open a channel. An existing connection for the same key is closed
    /// first; no two live sockets ever share a logical channel.
    pub async fn open(self: &Arc<Self>, spec: ChannelSpec) -> Result<(), ClientError> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(ClientError::AuthExpired);
        }

        self.close(&spec.key).await;

        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        let entry = ChannelEntry {
            epoch,
            socket: Arc::new(RwLock::new(None)),
            state: Arc::new(std::sync::RwLock::new(ChannelState::Connecting)),
            shutdown: Arc::new(Notify::new()),
            attempts: Arc::new(AtomicU32::new(0)),
        };

        let socket = entry.socket.clone();
        let state = entry.state.clone();
        let shutdown = entry.shutdown.clone();
        let attempts = entry.attempts.clone();
        self.channels.insert(spec.key.clone(), entry);

        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .supervise(spec, epoch, socket, state, shutdown, attempts)
                .await;
        });
        Ok(())
    }

    /// Close a channel and cancel its supervisor, including a pending
    /// backoff timer. Safe to call for unknown keys.
    pub async fn close(&self, key: &str) {
        if let Some((_, entry)) = self.channels.remove(key) {
            *entry.state.write().expect("state lock poisoned") = ChannelState::Closing;
            entry.shutdown.notify_one();
            let socket = entry.socket.read().await.clone();
            if let Some(socket) = socket {
                socket.close().await;
            }
        }
    }

    /// Close every channel (client shutdown).
    pub async fn close_all(&self) {
        let keys: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.close(&key).await;
        }
    }

    /// Send a text frame on an open channel.
    pub async fn send(&self, key: &str, text: &str) -> Result<(), ClientError> {
        let slot = self
            .channels
            .get(key)
            .map(|e| e.socket.clone())
            .ok_or(ClientError::NotConnected)?;
        let socket = slot.read().await.clone().ok_or(ClientError::NotConnected)?;
        socket.send_text(text).await.map_err(|e| match e {
            SocketError::SocketClosed => ClientError::NotConnected,
            other => ClientError::TransientNetwork(other.to_string()),
        })
    }

    pub fn state(&self, key: &str) -> ChannelState {
        self.channels
            .get(key)
            .map(|e| *e.state.read().expect("state lock poisoned"))
            .unwrap_or(ChannelState::Disconnected)
    }

    /// Whether reconnection is halted pending re-authentication.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Lift the auth halt after the embedder installed a fresh token.
    pub fn resume(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    /// Halt reconnection after a credential failure observed elsewhere
    /// (e.g. a 401 on an HTTP poll).
    pub fn halt_auth(&self) {
        self.halt_for_auth();
    }

    fn halt_for_auth(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            warn!(target: "Channels", "Credential rejected; halting reconnection until re-auth");
            let _ = self.bus.auth_expired.send(Arc::new(AuthExpired));
        }
    }

    fn set_state(state: &std::sync::RwLock<ChannelState>, value: ChannelState) {
        *state.write().expect("state lock poisoned") = value;
    }

    async fn supervise(
        self: Arc<Self>,
        spec: ChannelSpec,
        epoch: u64,
        socket_slot: Arc<RwLock<Option<Arc<ChannelSocket>>>>,
        state: Arc<std::sync::RwLock<ChannelState>>,
        shutdown: Arc<Notify>,
        attempts: Arc<AtomicU32>,
    ) {
        info!(target: "Channels", "Supervisor started for '{}'", spec.key);
        loop {
            if self.halted.load(Ordering::SeqCst) {
                break;
            }
            Self::set_state(&state, ChannelState::Connecting);

            let url = self.cfg.ws_url(&spec.key, &self.api.token());
            let close_reason = match ChannelSocket::connect(&url).await {
                Ok((socket, events)) => {
                    let socket = Arc::new(socket);
                    // A replacement supervisor may have been spawned for this
                    // key while we were dialing; never leave two live sockets
                    // on one logical channel.
                    let replaced = self
                        .channels
                        .get(&spec.key)
                        .is_none_or(|e| e.epoch != epoch);
                    if replaced {
                        socket.close().await;
                        break;
                    }
                    *socket_slot.write().await = Some(socket.clone());
                    Self::set_state(&state, ChannelState::Open);
                    attempts.store(0, Ordering::Relaxed);
                    let _ = self.bus.connected.send(Arc::new(ChannelConnected {
                        channel: spec.key.clone(),
                    }));

                    // Close the gap before resuming live delivery; overlap
                    // with frames already in flight is deduped downstream.
                    if let Some(conversation) = spec.conversation {
                        match self.dispatcher.catch_up(conversation).await {
                            Ok(_) => {}
                            Err(ClientError::AuthExpired) => {
                                socket.close().await;
                                self.halt_for_auth();
                                break;
                            }
                            Err(e) => {
                                warn!(target: "Channels", "Catch-up for '{}' failed: {e}", spec.key)
                            }
                        }
                    }

                    let reason = self.pump(&spec, &socket, events, &shutdown).await;
                    *socket_slot.write().await = None;
                    reason
                }
                Err(e) => {
                    warn!(target: "Channels", "Connect to '{}' failed: {e}", spec.key);
                    CloseReason::Remote
                }
            };

            match close_reason {
                CloseReason::Local => {
                    debug!(target: "Channels", "'{}' closed locally", spec.key);
                    let _ = self.bus.disconnected.send(Arc::new(ChannelDisconnected {
                        channel: spec.key.clone(),
                        will_retry: false,
                    }));
                    break;
                }
                CloseReason::AuthPolicy => {
                    self.halt_for_auth();
                    let _ = self.bus.disconnected.send(Arc::new(ChannelDisconnected {
                        channel: spec.key.clone(),
                        will_retry: false,
                    }));
                    break;
                }
                CloseReason::Remote => {}
            }

            // A conversation channel that is no longer the active one is not
            // worth a reconnect storm.
            if let Some(conversation) = &spec.conversation
                && !self.dispatcher.is_active(conversation)
            {
                info!(target: "Channels", "'{}' is stale, not reconnecting", spec.key);
                let _ = self.bus.disconnected.send(Arc::new(ChannelDisconnected {
                    channel: spec.key.clone(),
                    will_retry: false,
                }));
                break;
            }

            Self::set_state(&state, ChannelState::Disconnected);
            let _ = self.bus.disconnected.send(Arc::new(ChannelDisconnected {
                channel: spec.key.clone(),
                will_retry: true,
            }));

            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let delay = spec.class.retry_delay();
            info!(
                target: "Channels",
                "Reconnecting '{}' in {delay:?} (attempt {attempt})", spec.key
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.notified() => break,
            }
        }

        Self::set_state(&state, ChannelState::Disconnected);
        self.channels.remove_if(&spec.key, |_, e| e.epoch == epoch);
        info!(target: "Channels", "Supervisor finished for '{}'", spec.key);
    }

    /// Deliver live frames until the socket closes or teardown is requested.
    async fn pump(
        &self,
        spec: &ChannelSpec,
        socket: &Arc<ChannelSocket>,
        mut events: mpsc::Receiver<SocketEvent>,
        shutdown: &Notify,
    ) -> CloseReason {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    socket.close().await;
                    return CloseReason::Local;
                }
                event = events.recv() => match event {
                    Some(SocketEvent::Frame(text)) => {
                        let frame = InboundFrame {
                            channel: spec.key.clone(),
                            conversation: spec.conversation,
                            text,
                        };
                        if self.frames_tx.send(frame).await.is_err() {
                            // Routing loop is gone; treat as local teardown.
                            socket.close().await;
                            return CloseReason::Local;
                        }
                    }
                    Some(SocketEvent::Closed(reason)) => return reason,
                    None => return CloseReason::Remote,
                }
            }
        }
    }
}
