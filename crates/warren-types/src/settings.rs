use std::time::Duration;

/// Connection-management knobs for one tunnel run.
///
/// The defaults mirror the CLI defaults: bounded reconnection with a short
/// backoff and a keep-alive probe frequent enough to hold NAT mappings
/// open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelSettings {
    /// Maximum number of connection attempts to the ssh server. `0` means
    /// retry forever; a negative value disables retrying entirely.
    pub connection_retries: i32,
    /// Time to wait before trying to reconnect to the ssh server.
    pub wait_and_retry: Duration,
    /// Interval between keep-alive requests sent to the ssh server.
    pub keep_alive_interval: Duration,
    /// Timeout for the initial SSH handshake of each dial attempt.
    pub dial_timeout: Duration,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            connection_retries: 3,
            wait_and_retry: Duration::from_secs(3),
            keep_alive_interval: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(3),
        }
    }
}
