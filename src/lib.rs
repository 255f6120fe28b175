//! Real-time session and signaling layer for the For Glory chat client.
//!
//! The crate keeps persistent WebSocket channels to the server (a global
//! notification channel plus per-conversation chat channels), deduplicates
//! and orders inbound events against the locally materialized message log,
//! aggregates presence/unread state, and drives the call-signaling state
//! machine up to the hand-off into an external media transport.

pub mod api;
pub mod calls;
pub mod channels;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod keepalive;
pub mod media;
pub mod presence;
pub mod protocol;
pub mod socket;
pub mod types;

pub use calls::{CallError, CallManager, CallPhase, CallSession};
pub use client::Client;
pub use config::{ClientConfig, GLOBAL_CHANNEL};
pub use dispatch::Dispatcher;
pub use error::ClientError;
pub use http::{HttpClient, UreqHttpClient};
pub use media::{MediaError, MediaTransport};
pub use types::call::{CallEndReason, CallKind, CallRole};
pub use types::events::EventBus;
pub use types::message::{ChatEvent, EventBody};
pub use types::{ConversationId, UserId};
