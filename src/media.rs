//! Media transport seam.
//!
//! The session layer never touches audio itself; it only establishes and
//! tears down the media session at the right state transitions. The real
//! provider SDK (and test fakes) implement this trait. Participant
//! join/leave notifications flow back into the call manager through
//! [`crate::calls::CallManager::handle_remote_joined`] and
//! [`crate::calls::CallManager::handle_remote_left`].

use crate::types::UserId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// A required device could not be acquired (microphone denied). Fatal
    /// to the call attempt; not retried.
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    /// Any other provider failure (join refused, network).
    #[error("media transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Join the named session. Called exactly once per call attempt, only
    /// after the signaling layer reached its accepted transition.
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &str,
        identity: UserId,
    ) -> Result<(), MediaError>;

    /// Leave the current session and release local devices. Must be safe to
    /// call when no session is established.
    async fn leave(&self);
}
