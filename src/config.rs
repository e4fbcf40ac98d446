//! Engine Configuration
//!
//! Tuning values for reconciliation windows, tombstone retention, polling,
//! and push-socket reconnection. Defaults match the documented behavior of
//! the engine; everything is overridable per conversation.

use std::time::Duration;

/// Tuning values for one conversation engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far apart a confirmation's `created_at` may be from a placeholder's
    /// and still promote it (applied as ±window).
    pub temp_match_window: Duration,
    /// How long a deleted id is remembered to block resurrection by late
    /// events. After the window the id is forgotten entirely.
    pub tombstone_grace: Duration,
    /// How often expired tombstones are swept.
    pub tombstone_sweep_interval: Duration,
    /// Catch-up fetch interval while the push link is down.
    pub poll_interval: Duration,
    /// First reconnect delay for the push socket.
    pub reconnect_base: Duration,
    /// Reconnect delay cap.
    pub reconnect_cap: Duration,
    /// Jitter factor (0.0 to 1.0) applied to reconnect delays.
    pub reconnect_jitter: f64,
    /// Capacity of the shared adapter event channel.
    pub event_channel_capacity: usize,
    /// Capacity of the outbound push frame channel.
    pub outbound_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            temp_match_window: Duration::from_secs(10),
            tombstone_grace: Duration::from_secs(30),
            tombstone_sweep_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(3),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
            reconnect_jitter: 0.1,
            event_channel_capacity: 256,
            outbound_channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    pub fn with_temp_match_window(mut self, window: Duration) -> Self {
        self.temp_match_window = window;
        self
    }

    pub fn with_tombstone_grace(mut self, grace: Duration) -> Self {
        self.tombstone_grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_cap = cap;
        self
    }
}
