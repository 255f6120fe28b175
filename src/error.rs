//! Error taxonomy for the session layer.
//!
//! Nothing here is allowed to crash the process: transient failures retry,
//! credential failures halt and surface once, malformed frames are dropped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection drop, fetch timeout, refused socket. Retried automatically
    /// by the channel supervisors; never fatal.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// The server rejected our credential (401-class response or a policy
    /// close on the socket). Reconnection halts until re-authentication.
    #[error("credential rejected by server")]
    AuthExpired,

    /// The media transport could not acquire a required device (microphone).
    /// Fatal to the active call attempt, surfaced, not retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A frame that could not be understood. The frame is dropped and
    /// logged; the connection stays up.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A signal arrived that does not match the current session state
    /// (e.g. an accept with nothing ringing). Ignored without mutating state.
    #[error("state conflict: {0}")]
    StateConflict(&'static str),

    #[error("not connected")]
    NotConnected,
}

impl ClientError {
    /// Whether the channel supervisor should keep retrying after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::TransientNetwork(_))
    }
}
