use crate::socket::error::{Result, SocketError};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Why the socket stopped delivering frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// We called `close()`.
    Local,
    /// The server closed the stream or the connection dropped.
    Remote,
    /// The server refused the connection with a policy close (bad token).
    AuthPolicy,
}

/// Inbound socket event, delivered in arrival order.
#[derive(Debug)]
pub enum SocketEvent {
    Frame(String),
    Closed(CloseReason),
}

/// One live WebSocket for one logical channel. The read half runs as a
/// spawned pump feeding an `mpsc` receiver; the write half is shared behind
/// a mutex for `send_text`.
pub struct ChannelSocket {
    ws_sink: Mutex<WsSink>,
    is_connected: Arc<AtomicBool>,
    close_requested: Arc<AtomicBool>,
}

impl ChannelSocket {
    /// Dial `url` and start the read pump. Frames and the final close event
    /// arrive on the returned receiver.
    pub async fn connect(url: &str) -> Result<(Self, Receiver<SocketEvent>)> {
        debug!(target: "Socket", "Dialing {url}");
        let (ws, _response) = connect_async(url).await?;
        let (sink, stream) = ws.split();

        let (events_tx, events_rx) = mpsc::channel(100);
        let is_connected = Arc::new(AtomicBool::new(true));
        let close_requested = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::read_pump(
            stream,
            events_tx,
            is_connected.clone(),
            close_requested.clone(),
        ));

        Ok((
            Self {
                ws_sink: Mutex::new(sink),
                is_connected,
                close_requested,
            },
            events_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    /// Send one text frame.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(SocketError::SocketClosed);
        }
        let mut sink = self.ws_sink.lock().await;
        sink.send(Message::text(text.to_string())).await?;
        Ok(())
    }

    /// Close the socket. Safe to call more than once; the read pump reports
    /// a `Local` close to its receiver.
    pub async fn close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        if !self.is_connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.ws_sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(target: "Socket", "Close frame not delivered: {e}");
        }
    }

    async fn read_pump(
        mut stream: WsStream,
        events_tx: Sender<SocketEvent>,
        is_connected: Arc<AtomicBool>,
        close_requested: Arc<AtomicBool>,
    ) {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if events_tx
                        .send(SocketEvent::Frame(text.to_string()))
                        .await
                        .is_err()
                    {
                        // Receiver gone; the supervisor was torn down.
                        break CloseReason::Local;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    if close_requested.load(Ordering::SeqCst) {
                        break CloseReason::Local;
                    }
                    let policy = frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Policy);
                    if policy {
                        break CloseReason::AuthPolicy;
                    }
                    break CloseReason::Remote;
                }
                // Binary/ping/pong frames carry nothing for this protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if close_requested.load(Ordering::SeqCst) {
                        break CloseReason::Local;
                    }
                    warn!(target: "Socket", "Read error: {e}");
                    break CloseReason::Remote;
                }
                None => {
                    if close_requested.load(Ordering::SeqCst) {
                        break CloseReason::Local;
                    }
                    break CloseReason::Remote;
                }
            }
        };

        is_connected.store(false, Ordering::SeqCst);
        let _ = events_tx.send(SocketEvent::Closed(reason)).await;
        debug!(target: "Socket", "Read pump finished: {reason:?}");
    }
}
