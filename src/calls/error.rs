//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    /// A call session is already in progress; the new attempt was rejected
    /// before any signaling was sent.
    #[error("another call is already in progress")]
    Busy,

    /// The operation needs a session in a specific phase and none matched.
    #[error("no matching call session: {0}")]
    NoSession(&'static str),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call channel name '{0}' is not valid for the media provider")]
    BadChannelName(String),

    #[error(transparent)]
    Client(#[from] crate::error::ClientError),

    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
}
