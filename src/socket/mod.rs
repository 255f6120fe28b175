mod channel_socket;
mod error;

pub use channel_socket::{ChannelSocket, CloseReason, SocketEvent};
pub use error::{Result, SocketError};
