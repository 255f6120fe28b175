//! Client facade: owns the session-layer components and routes inbound
//! frames between them.
//!
//! Data flow: channel supervisors deliver raw frames here; frames are
//! classified and handed to the dispatcher (chat), the call manager
//! (signaling) or the presence tracker (sync ticks). Outbound signaling
//! goes back out through the global channel.

use crate::api::Api;
use crate::calls::{CallManager, SignalSender};
use crate::channels::{ChannelManager, ChannelSpec, ChannelState, InboundFrame};
use crate::config::{ClientConfig, GLOBAL_CHANNEL};
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::http::HttpClient;
use crate::media::MediaTransport;
use crate::presence::PresenceTracker;
use crate::protocol::{ChatFrame, GlobalFrame, MAX_MESSAGE_LEN, parse_chat_frame, parse_global_frame};
use crate::types::events::EventBus;
use crate::types::{ConversationId, UserId};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

/// Routes call signaling frames onto the global channel.
struct GlobalSignaler {
    channels: Arc<ChannelManager>,
}

#[async_trait]
impl SignalSender for GlobalSignaler {
    async fn send_signal(&self, frame: String) -> Result<(), ClientError> {
        self.channels.send(GLOBAL_CHANNEL, &frame).await
    }
}

pub struct Client {
    config: ClientConfig,
    api: Arc<Api>,
    bus: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    channels: Arc<ChannelManager>,
    calls: Arc<CallManager>,
    presence: Arc<PresenceTracker>,
    frames_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    shutdown_notifier: Notify,
    is_running: AtomicBool,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        auth_token: String,
        http: Arc<dyn HttpClient>,
        media: Arc<dyn MediaTransport>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let api = Arc::new(Api::new(http, config.http_base.clone(), auth_token));
        let dispatcher = Arc::new(Dispatcher::new(api.clone(), bus.clone()));
        let (frames_tx, frames_rx) = mpsc::channel(100);
        let channels = ChannelManager::new(
            config.clone(),
            api.clone(),
            dispatcher.clone(),
            bus.clone(),
            frames_tx,
        );
        let signaler = Arc::new(GlobalSignaler {
            channels: channels.clone(),
        });
        let calls = CallManager::new(config.user_id, api.clone(), media, signaler, bus.clone());
        let presence = Arc::new(PresenceTracker::new(
            api.clone(),
            bus.clone(),
            config.user_id,
        ));

        Arc::new(Self {
            config,
            api,
            bus,
            dispatcher,
            channels,
            calls,
            presence,
            frames_rx: Mutex::new(Some(frames_rx)),
            shutdown_notifier: Notify::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Open the global channel, start frame routing and the keepalive loop,
    /// and run the initial presence/unread sync.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::StateConflict("client already running"));
        }
        let running_guard = scopeguard::guard((), |_| {
            self.is_running.store(false, Ordering::SeqCst);
        });

        self.channels.open(ChannelSpec::global()).await?;

        // The routing loop lives for the client's lifetime; only the first
        // connect owns the receiver.
        if let Some(rx) = self.frames_rx.lock().expect("frames lock poisoned").take() {
            let client = self.clone();
            tokio::spawn(client.route_frames_loop(rx));
        }
        tokio::spawn(self.clone().keepalive_loop());

        match self.presence.refresh_all().await {
            Ok(()) => {}
            Err(ClientError::AuthExpired) => self.channels.halt_auth(),
            Err(e) => warn!(target: "Client", "Initial sync failed: {e}"),
        }

        scopeguard::ScopeGuard::into_inner(running_guard);
        Ok(())
    }

    /// Tear everything down: the active call, every channel, and the
    /// background loops.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting");
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown_notifier.notify_waiters();
        if let Err(e) = self.calls.hang_up().await {
            warn!(target: "Client", "Hang-up during disconnect failed: {e}");
        }
        self.channels.close_all().await;
    }

    /// Install a fresh credential after the embedder re-authenticated, and
    /// lift the reconnection halt.
    pub fn set_auth_token(&self, token: String) {
        self.api.set_token(token);
        self.channels.resume();
    }

    /// Re-open the channels that were halted by a credential failure. Call
    /// after [`Client::set_auth_token`].
    pub async fn reopen_after_auth(self: &Arc<Self>) -> Result<(), ClientError> {
        self.channels.open(ChannelSpec::global()).await?;
        if let Some(conversation) = self.dispatcher.active_conversation() {
            self.channels
                .open(ChannelSpec::conversation(self.config.user_id, conversation))
                .await?;
        }
        Ok(())
    }

    /// Make a conversation the active one and open its channel. The
    /// supervisor runs the catch-up fetch before live delivery starts.
    pub async fn open_conversation(
        self: &Arc<Self>,
        conversation: ConversationId,
    ) -> Result<(), ClientError> {
        if let Some(previous) = self.dispatcher.active_conversation()
            && previous != conversation
        {
            self.channels
                .close(&previous.channel_key(self.config.user_id))
                .await;
        }
        self.dispatcher.set_active_conversation(Some(conversation));
        self.channels
            .open(ChannelSpec::conversation(self.config.user_id, conversation))
            .await?;

        // Opening a direct conversation reads it.
        if let ConversationId::Direct(peer) = conversation
            && let Err(e) = self.presence.mark_read(peer).await
        {
            warn!(target: "Client", "Mark-read for {peer} failed: {e}");
        }
        Ok(())
    }

    /// Close the active conversation's channel. Its supervisor will not
    /// reconnect a conversation that is no longer active.
    pub async fn close_conversation(&self) {
        if let Some(conversation) = self.dispatcher.active_conversation() {
            self.dispatcher.set_active_conversation(None);
            self.channels
                .close(&conversation.channel_key(self.config.user_id))
                .await;
        }
    }

    /// Send a chat message on the active conversation. Community channels
    /// fall back to HTTP when the socket is down.
    pub async fn send_message(&self, text: &str) -> Result<(), ClientError> {
        let conversation = self
            .dispatcher
            .active_conversation()
            .ok_or(ClientError::StateConflict("no active conversation"))?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if text.len() > MAX_MESSAGE_LEN {
            return Err(ClientError::ProtocolViolation(
                "message exceeds server length limit".to_string(),
            ));
        }

        let key = conversation.channel_key(self.config.user_id);
        match self.channels.send(&key, text).await {
            Ok(()) => Ok(()),
            Err(ClientError::NotConnected) => {
                if let ConversationId::Community(id) = conversation {
                    debug!(target: "Client", "Socket down, sending via HTTP fallback");
                    self.api.send_community_message(id, text).await
                } else {
                    Err(ClientError::NotConnected)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Delete one of our messages in the active conversation: tombstone it
    /// server-side, notify the channel, and apply the tombstone locally.
    pub async fn delete_message(&self, msg_id: i64) -> Result<(), ClientError> {
        let conversation = self
            .dispatcher
            .active_conversation()
            .ok_or(ClientError::StateConflict("no active conversation"))?;
        self.api.delete_message(msg_id, conversation).await?;

        let key = conversation.channel_key(self.config.user_id);
        let frame = json!({"type": "message_deleted", "msg_id": msg_id}).to_string();
        if let Err(e) = self.channels.send(&key, &frame).await {
            debug!(target: "Client", "Deletion frame not delivered: {e}");
        }
        self.dispatcher.apply_deletion(conversation, msg_id);
        Ok(())
    }

    pub fn calls(&self) -> &Arc<CallManager> {
        &self.calls
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub(crate) fn channel_state(&self, key: &str) -> ChannelState {
        self.channels.state(key)
    }

    pub(crate) async fn send_global(&self, frame: &str) -> Result<(), ClientError> {
        self.channels.send(GLOBAL_CHANNEL, frame).await
    }

    pub(crate) async fn shutdown_notified(&self) {
        self.shutdown_notifier.notified().await
    }

    async fn route_frames_loop(self: Arc<Self>, mut frames: mpsc::Receiver<InboundFrame>) {
        info!(target: "Client", "Frame routing started");
        while let Some(frame) = frames.recv().await {
            self.route_frame(frame).await;
        }
        info!(target: "Client", "Frame routing stopped");
    }

    async fn route_frame(&self, frame: InboundFrame) {
        match frame.conversation {
            Some(conversation) => self.route_chat_frame(conversation, &frame.text).await,
            None => self.route_global_frame(&frame.text).await,
        }
    }

    async fn route_chat_frame(&self, conversation: ConversationId, text: &str) {
        let chat = match parse_chat_frame(conversation, text) {
            Ok(chat) => chat,
            Err(e) => {
                warn!(target: "Client", "Dropping bad frame on {conversation}: {e}");
                return;
            }
        };

        // A direct message received while its conversation is open counts
        // as read the moment it lands.
        let read_receipt = match (&chat, conversation) {
            (ChatFrame::Message(event), ConversationId::Direct(peer))
                if event.sender == peer && self.dispatcher.is_active(&conversation) =>
            {
                Some(peer)
            }
            _ => None,
        };

        self.dispatcher.handle_chat_frame(conversation, chat);

        if let Some(peer) = read_receipt
            && let Err(e) = self.presence.mark_read(peer).await
        {
            debug!(target: "Client", "Read receipt for {peer} failed: {e}");
        }
    }

    async fn route_global_frame(&self, text: &str) {
        let frame = match parse_global_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "Client", "Dropping bad global frame: {e}");
                return;
            }
        };

        match frame {
            // The server heartbeat doubles as a sync tick.
            GlobalFrame::Ping => {
                if let Err(ClientError::AuthExpired) = self.presence.refresh_all().await {
                    self.channels.halt_auth();
                }
            }
            GlobalFrame::Pong => {}
            GlobalFrame::NewDm { sender } => {
                let active_with_sender = matches!(
                    (sender, self.dispatcher.active_conversation()),
                    (Some(s), Some(ConversationId::Direct(peer))) if s == peer
                );
                let result = if active_with_sender {
                    // Already reading it; keep the server's counter at zero.
                    match sender {
                        Some(sender) => self.presence.mark_read(sender).await,
                        None => Ok(()),
                    }
                } else {
                    self.presence.refresh_unread().await
                };
                match result {
                    Ok(()) => {}
                    Err(ClientError::AuthExpired) => self.channels.halt_auth(),
                    Err(e) => debug!(target: "Client", "Unread refresh failed: {e}"),
                }
            }
            GlobalFrame::IncomingCall {
                caller,
                caller_name,
                channel_name,
                kind,
            } => {
                self.calls
                    .handle_incoming_offer(caller, caller_name, kind, channel_name);
            }
            GlobalFrame::CallAccepted { channel } => {
                self.calls.handle_remote_accepted(channel).await
            }
            GlobalFrame::CallRejected => self.calls.handle_remote_rejected().await,
            GlobalFrame::CallCancelled => self.calls.handle_remote_cancelled().await,
            GlobalFrame::CallEnded => self.calls.handle_call_ended().await,
            // Kick frames are addressed personally; receiving one means us.
            GlobalFrame::KickCall { from } => {
                info!(target: "Client", "Removed from call by {from:?}");
                self.calls.handle_kick().await;
            }
            GlobalFrame::MessageDeleted { msg_id } => {
                self.dispatcher.apply_deletion_anywhere(msg_id)
            }
            // Call wallpaper sync is a rendering concern.
            GlobalFrame::SyncBg => {}
            GlobalFrame::ServerError { detail } => {
                warn!(target: "Client", "Server error: {detail}")
            }
        }
    }
}

/// The media transport reports participant changes through these; they are
/// forwarded to the call manager. Provided on `Client` so embedders wiring
/// provider callbacks only need the facade.
impl Client {
    pub fn handle_remote_media_joined(&self, user: UserId) {
        self.calls.handle_remote_joined(user);
    }

    pub async fn handle_remote_media_left(&self, user: UserId) {
        self.calls.handle_remote_left(user).await;
    }
}
