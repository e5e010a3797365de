use std::time::Duration;

/// Tunables for session lifecycles and per-player queues.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    /// How long a session waits for its roster to be fully connected before
    /// giving up. Re-armed by qualifying traffic.
    pub join_window: Duration,
    /// Depth of each player's outbound envelope queue.
    pub send_queue: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            join_window: Duration::from_secs(30 * 60),
            send_queue: 256,
        }
    }
}
