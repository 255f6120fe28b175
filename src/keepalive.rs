use crate::channels::ChannelState;
use crate::client::Client;
use crate::config::GLOBAL_CHANNEL;
use crate::protocol::KEEPALIVE_FRAME;
use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

// The server expects a tick roughly every 20s; the spread avoids a
// thundering herd of clients pinging in lockstep.
const KEEP_ALIVE_INTERVAL_MIN: Duration = Duration::from_secs(20);
const KEEP_ALIVE_INTERVAL_MAX: Duration = Duration::from_secs(25);

impl Client {
    /// The keepalive loop for the global channel. Spawned by `connect`.
    ///
    /// Outbound pings keep the connection alive; the server's own periodic
    /// `ping` frame is handled in frame routing, where it doubles as a
    /// presence/unread sync tick.
    pub(crate) async fn keepalive_loop(self: Arc<Self>) {
        loop {
            let interval_ms = rand::rng().random_range(
                KEEP_ALIVE_INTERVAL_MIN.as_millis()..=KEEP_ALIVE_INTERVAL_MAX.as_millis(),
            );
            let interval = Duration::from_millis(interval_ms as u64);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if !self.is_running() {
                        debug!(target: "Client/Keepalive", "Client stopped, exiting keepalive loop.");
                        return;
                    }
                    if self.channel_state(GLOBAL_CHANNEL) != ChannelState::Open {
                        // The supervisor is between reconnect attempts.
                        debug!(target: "Client/Keepalive", "Global channel not open, skipping ping");
                        continue;
                    }
                    match self.send_global(KEEPALIVE_FRAME).await {
                        Ok(()) => debug!(target: "Client/Keepalive", "Sent keepalive ping"),
                        Err(e) => warn!(target: "Client/Keepalive", "Keepalive ping failed: {e}"),
                    }
                },
                _ = self.shutdown_notified() => {
                    debug!(target: "Client/Keepalive", "Shutdown signaled, exiting keepalive loop.");
                    return;
                }
            }
        }
    }
}
