use std::time::Duration;

/// Windows used to absorb client retries on the HTTP send path.
#[derive(Debug, Clone)]
pub struct DuplicateWindows {
    /// Same sender, conversation, kind and exact content.
    pub exact: Duration,
    /// Case-insensitive match for very short messages ("ok", "hey").
    pub short_content: Duration,
    /// Content at or below this many characters counts as short.
    pub short_content_max_chars: usize,
    /// Rapid-fire repeats, reported back as "throttled".
    pub throttle: Duration,
}

impl Default for DuplicateWindows {
    fn default() -> Self {
        Self {
            exact: Duration::from_secs(300),
            short_content: Duration::from_secs(300),
            short_content_max_chars: 5,
            throttle: Duration::from_secs(30),
        }
    }
}

/// Tunables of the realtime core. The server fills this from `KINDRED_*`
/// environment variables; tests use the defaults or shrink individual fields.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// A typing indicator that is not refreshed within this long is cleared.
    pub typing_timeout: Duration,
    /// Delay before the final "not in any chat" broadcast after a disconnect.
    pub offline_clear_delay: Duration,
    pub duplicate_windows: DuplicateWindows,
    /// Call-signaling frames a single user may send per minute.
    pub call_signals_per_minute: u32,
    /// How long a swipe stays undoable.
    pub undo_window: Duration,
    /// Unauthenticated sockets are closed after this long.
    pub auth_timeout: Duration,
    /// Server ping cadence. Two missed pongs drop the connection.
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_secs(10),
            offline_clear_delay: Duration::from_millis(500),
            duplicate_windows: DuplicateWindows::default(),
            call_signals_per_minute: 120,
            undo_window: Duration::from_secs(300),
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Converts a configured window for timestamp arithmetic, saturating at a century.
pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
